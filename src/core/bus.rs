//! In-process workflow event bus.
//!
//! Ingress handlers publish and return immediately; a worker drains the
//! channel and hands each event to the orchestrator.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{OutputFile, ProductionStatus};

const CHANNEL_CAPACITY: usize = 256;

/// Events that drive the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum WorkflowEvent {
    /// A validated upload is ready to run
    #[serde(rename = "audio/uploaded")]
    JobQueued { job_id: Uuid },

    /// The provider reported on a production
    #[serde(rename = "enhancement/completed")]
    ProductionFinished {
        external_id: String,
        status: ProductionStatus,
        output_files: Vec<OutputFile>,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobQueued { .. } => "audio/uploaded",
            Self::ProductionFinished { .. } => "enhancement/completed",
        }
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn send(&self, event: WorkflowEvent) -> Result<()>;
}

/// Bus backed by a bounded tokio channel
#[derive(Clone)]
pub struct ChannelEventBus {
    tx: mpsc::Sender<WorkflowEvent>,
}

impl ChannelEventBus {
    pub fn new() -> (Self, mpsc::Receiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventBus for ChannelEventBus {
    async fn send(&self, event: WorkflowEvent) -> Result<()> {
        let name = event.name();
        self.tx
            .send(event)
            .await
            .with_context(|| format!("Event bus closed, dropped {}", name))
    }
}
