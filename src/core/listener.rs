//! Completion handling.
//!
//! Webhook callbacks and status polls both land here. Whatever the source,
//! a completion only moves a job that is still awaiting that exact
//! production; everything else is acknowledged and dropped.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::bus::WorkflowEvent;
use super::orchestrator::Orchestrator;
use crate::domain::{JobStatus, OutputFile, ProductionStatus, UploadJob};

/// What a completion signal means for a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionDecision {
    /// Download the enhanced output from `url`
    Resume { url: String },

    /// Provider gave up on the production
    Fail { message: String },

    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No job owns this production id
    UnknownProduction,

    /// Job already moved on (duplicate or late signal)
    NotAwaiting(JobStatus),

    /// Job is waiting on a different production
    ExternalIdMismatch,

    /// Production has not reached a terminal status
    StillRunning(ProductionStatus),

    /// Production is done but listed no outputs
    MissingOutputs,
}

/// Result of delivering a completion signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Job resumed; `status` is where it ended up
    Resumed { job_id: Uuid, status: JobStatus },

    Failed { job_id: Uuid },

    Ignored {
        job_id: Option<Uuid>,
        reason: IgnoreReason,
    },
}

impl CompletionOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored { .. })
    }
}

/// Decide how a completion signal applies to `job`
pub fn decide(
    job: &UploadJob,
    external_id: &str,
    status: ProductionStatus,
    outputs: &[OutputFile],
) -> CompletionDecision {
    if job.status != JobStatus::AwaitingCompletion {
        return CompletionDecision::Ignore(IgnoreReason::NotAwaiting(job.status));
    }

    if job.external_job_id.as_deref() != Some(external_id) {
        return CompletionDecision::Ignore(IgnoreReason::ExternalIdMismatch);
    }

    match status {
        ProductionStatus::Done => match outputs.first() {
            Some(output) => CompletionDecision::Resume {
                url: output.url.clone(),
            },
            None => CompletionDecision::Ignore(IgnoreReason::MissingOutputs),
        },
        ProductionStatus::Failed => CompletionDecision::Fail {
            message: format!("Provider reported production {} as failed", external_id),
        },
        other => CompletionDecision::Ignore(IgnoreReason::StillRunning(other)),
    }
}

/// Consumes workflow events and routes them to the orchestrator
pub struct CompletionListener {
    orchestrator: Arc<Orchestrator>,
}

impl CompletionListener {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Apply a provider callback
    pub async fn on_completion(
        &self,
        external_id: &str,
        status: ProductionStatus,
        outputs: &[OutputFile],
    ) -> Result<CompletionOutcome> {
        let outcome = self
            .orchestrator
            .complete_enhancement(external_id, status, outputs)
            .await?;

        match &outcome {
            CompletionOutcome::Ignored { reason, .. } => {
                debug!(production = %external_id, ?reason, "Completion ignored")
            }
            other => info!(production = %external_id, outcome = ?other, "Completion applied"),
        }

        Ok(outcome)
    }

    /// Handle one bus event to completion
    pub async fn handle(&self, event: WorkflowEvent) -> Result<()> {
        match event {
            WorkflowEvent::JobQueued { job_id } => {
                self.orchestrator.advance(job_id).await?;
            }
            WorkflowEvent::ProductionFinished {
                external_id,
                status,
                output_files,
            } => {
                self.on_completion(&external_id, status, &output_files)
                    .await?;
            }
        }
        Ok(())
    }

    /// Drain the bus until every sender is dropped.
    ///
    /// Each event runs on its own task; per-job locking in the orchestrator
    /// keeps same-job events serialized.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<WorkflowEvent>) {
        while let Some(event) = rx.recv().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let name = event.name();
                if let Err(e) = this.handle(event).await {
                    error!(event = name, error = %e, "Workflow event failed");
                }
            });
        }
        debug!("Event bus closed, listener stopping");
    }
}
