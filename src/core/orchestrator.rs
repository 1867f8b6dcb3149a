//! Durable upload workflow.
//!
//! Drives each job through enhance, wait, download and store. Every
//! transition is appended to the job's event log before the next step
//! begins, so a restarted process rebuilds the job and continues from the
//! last recorded step. Steps for one job are serialized by a per-job lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{AssetFetcher, ObjectStorage, StorageError};
use crate::domain::job::{SourceData, StagedData, StoredData, SubmittedData};
use crate::domain::{
    EventType, FailureInfo, FailureReason, JobEvent, JobStatus, NewJob, OutputFile,
    ProductionStatus, StepStatus, UploadJob,
};

use super::dispatcher::EnhancementDispatcher;
use super::event_store::{generate_idempotency_key, hash_input, EventStore};
use super::keyed::KeyedLocks;
use super::listener::{decide, CompletionDecision, CompletionOutcome, IgnoreReason};
use super::retry::{retry, RetryPolicy};

const NOTIFICATION_CAPACITY: usize = 64;

/// Workflow timing and retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// How long to wait for a completion signal (default: 300 = 5 min)
    #[serde(default = "default_wait_window")]
    pub wait_window_secs: u64,

    /// How often expired waits are swept (default: 30s)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub download_retry: RetryPolicy,
}

fn default_wait_window() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    30
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            wait_window_secs: default_wait_window(),
            sweep_interval_secs: default_sweep_interval(),
            download_retry: RetryPolicy::default(),
        }
    }
}

impl WorkflowSettings {
    pub fn wait_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.wait_window_secs as i64)
    }
}

/// Published when a job reaches a terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNotification {
    Completed {
        job_id: Uuid,
        user_id: String,
        url: String,
    },
    Failed {
        job_id: Uuid,
        user_id: String,
        reason: FailureReason,
        message: String,
    },
}

/// Upload workflow engine
pub struct Orchestrator {
    jobs_dir: PathBuf,
    dispatcher: EnhancementDispatcher,
    fetcher: Arc<dyn AssetFetcher>,
    storage: Arc<dyn ObjectStorage>,
    settings: WorkflowSettings,
    locks: KeyedLocks<Uuid>,
    notifications: broadcast::Sender<JobNotification>,
}

impl Orchestrator {
    pub fn new(
        jobs_dir: impl Into<PathBuf>,
        dispatcher: EnhancementDispatcher,
        fetcher: Arc<dyn AssetFetcher>,
        storage: Arc<dyn ObjectStorage>,
        settings: WorkflowSettings,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            jobs_dir: jobs_dir.into(),
            dispatcher,
            fetcher,
            storage,
            settings,
            locks: KeyedLocks::new(),
            notifications,
        }
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Receive a notification for every job that finishes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.notifications.subscribe()
    }

    /// Record a validated, stored upload as a new job
    #[instrument(skip(self, spec), fields(user = %spec.user_id))]
    pub async fn create_job(&self, spec: NewJob) -> Result<UploadJob> {
        let job_id = Uuid::new_v4();
        let store = EventStore::open(&self.jobs_dir, job_id).await?;

        let event = JobEvent::new(
            job_id,
            None,
            EventType::JobCreated,
            format!("{}:create", job_id),
            format!("Upload '{}' validated ({} bytes)", spec.title, spec.size_bytes),
            StepStatus::Completed,
        )
        .with_data(serde_json::to_value(&spec).context("Failed to serialize job")?);
        store.append(&event).await?;

        info!(%job_id, "Job created");
        UploadJob::from_events(&[event]).context("Failed to build job state")
    }

    /// Rebuild a job from its log
    pub async fn get_job(&self, job_id: Uuid) -> Result<UploadJob> {
        let (_, job) = self.load(job_id).await?;
        Ok(job)
    }

    /// Most recent jobs first
    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<UploadJob>> {
        let mut jobs = Vec::new();
        for job_id in EventStore::list_jobs(&self.jobs_dir).await? {
            match self.get_job(job_id).await {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(%job_id, error = %e, "Skipping unreadable job"),
            }
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Run the enhancement step only. Returns once the job is waiting on
    /// the provider or has fallen back to its original asset.
    #[instrument(skip(self))]
    pub async fn begin(&self, job_id: Uuid) -> Result<UploadJob> {
        let _guard = self.locks.lock(&job_id).await;
        let (store, mut job) = self.load(job_id).await?;

        if matches!(job.status, JobStatus::Validated | JobStatus::Enhancing) {
            self.enhance(&store, &mut job).await?;
        }
        Ok(job)
    }

    /// Run every step that can run now
    #[instrument(skip(self))]
    pub async fn advance(&self, job_id: Uuid) -> Result<UploadJob> {
        let _guard = self.locks.lock(&job_id).await;
        let (store, mut job) = self.load(job_id).await?;

        if matches!(job.status, JobStatus::Validated | JobStatus::Enhancing) {
            self.enhance(&store, &mut job).await?;
        }
        if job.status == JobStatus::Downloading {
            self.download_and_store(&store, &mut job).await?;
        }
        Ok(job)
    }

    /// Deliver a provider completion for `external_id`
    #[instrument(skip(self, outputs))]
    pub async fn complete_enhancement(
        &self,
        external_id: &str,
        status: ProductionStatus,
        outputs: &[OutputFile],
    ) -> Result<CompletionOutcome> {
        let Some(job_id) = EventStore::lookup_external_id(&self.jobs_dir, external_id).await?
        else {
            return Ok(CompletionOutcome::Ignored {
                job_id: None,
                reason: IgnoreReason::UnknownProduction,
            });
        };

        let _guard = self.locks.lock(&job_id).await;
        let (store, mut job) = self.load(job_id).await?;
        self.settle(&store, &mut job, external_id, status, outputs)
            .await
    }

    /// Ask the provider about a waiting job and apply the answer
    #[instrument(skip(self))]
    pub async fn poll(&self, job_id: Uuid) -> Result<CompletionOutcome> {
        let _guard = self.locks.lock(&job_id).await;
        let (store, mut job) = self.load(job_id).await?;

        let external_id = match (&job.external_job_id, job.status) {
            (Some(id), JobStatus::AwaitingCompletion) => id.clone(),
            _ => {
                return Ok(CompletionOutcome::Ignored {
                    job_id: Some(job_id),
                    reason: IgnoreReason::NotAwaiting(job.status),
                })
            }
        };

        let production = self.dispatcher.status(&external_id).await?;
        self.settle(
            &store,
            &mut job,
            &external_id,
            production.status,
            &production.output_files,
        )
        .await
    }

    /// Resolve every job whose wait window has elapsed. Returns how many
    /// were moved on.
    pub async fn expire_waits(&self) -> Result<usize> {
        let now = Utc::now();
        let mut expired = 0;

        for job_id in EventStore::list_jobs(&self.jobs_dir).await? {
            match self.expire_one(job_id, now).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => error!(%job_id, error = %e, "Failed to expire wait"),
            }
        }

        Ok(expired)
    }

    /// Continue every unfinished job after a restart
    pub async fn recover(&self) -> Result<usize> {
        let mut resumed = 0;

        for job_id in EventStore::list_jobs(&self.jobs_dir).await? {
            let job = match self.get_job(job_id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(%job_id, error = %e, "Skipping unreadable job");
                    continue;
                }
            };

            if job.is_finished() || job.status == JobStatus::AwaitingCompletion {
                continue;
            }

            info!(%job_id, status = %job.status, "Recovering job");
            match self.advance(job_id).await {
                Ok(_) => resumed += 1,
                Err(e) => error!(%job_id, error = %e, "Recovery failed"),
            }
        }

        resumed += self.expire_waits().await?;
        Ok(resumed)
    }

    /// Periodically expire overdue waits
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = Duration::from_secs(self.settings.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match this.expire_waits().await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "Expired overdue waits"),
                    Err(e) => error!(error = %e, "Wait sweep failed"),
                }
            }
        })
    }

    async fn load(&self, job_id: Uuid) -> Result<(EventStore, UploadJob)> {
        let store = EventStore::existing(&self.jobs_dir, job_id)
            .await?
            .with_context(|| format!("Job {} not found", job_id))?;
        let job = store
            .load_job()
            .await?
            .with_context(|| format!("Job {} has no creation event", job_id))?;
        Ok((store, job))
    }

    async fn record(&self, store: &EventStore, job: &mut UploadJob, event: JobEvent) -> Result<()> {
        store.append(&event).await?;
        job.apply_event(&event);
        Ok(())
    }

    async fn enhance(&self, store: &EventStore, job: &mut UploadJob) -> Result<()> {
        let key = generate_idempotency_key(job.id, "enhance", &job.source_url);

        // A dispatch that started but never recorded an outcome may already
        // have a production at the provider. Never start a second one.
        if job.status == JobStatus::Enhancing {
            warn!(job_id = %job.id, "Interrupted dispatch, using original asset");
            return self
                .skip_enhancement(store, job, &key, "Dispatch interrupted".to_string())
                .await;
        }

        let started = JobEvent::new(
            job.id,
            Some("enhance".to_string()),
            EventType::EnhancementStarted,
            key.clone(),
            format!(
                "Dispatching to {} with preset '{}'",
                self.dispatcher.provider_name(),
                job.enhancement_preset
            ),
            StepStatus::Running,
        );
        self.record(store, job, started).await?;

        match self
            .dispatcher
            .submit(&job.source_url, &job.enhancement_preset, &job.title)
            .await
        {
            Ok(external_id) => {
                EventStore::link_external_id(&self.jobs_dir, &external_id, job.id).await?;

                let deadline = Utc::now() + self.settings.wait_window();
                let submitted = JobEvent::new(
                    job.id,
                    Some("enhance".to_string()),
                    EventType::EnhancementSubmitted,
                    key,
                    format!("Production {} started, waiting until {}", external_id, deadline),
                    StepStatus::Completed,
                )
                .with_data(serde_json::to_value(SubmittedData {
                    external_id,
                    wait_deadline: deadline,
                })?);
                self.record(store, job, submitted).await
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Enhancement dispatch failed, using original asset");
                self.skip_enhancement(store, job, &key, e.to_string()).await
            }
        }
    }

    async fn skip_enhancement(
        &self,
        store: &EventStore,
        job: &mut UploadJob,
        key: &str,
        reason: String,
    ) -> Result<()> {
        let skipped = JobEvent::new(
            job.id,
            Some("enhance".to_string()),
            EventType::EnhancementSkipped,
            key.to_string(),
            "Continuing with original asset".to_string(),
            StepStatus::Skipped,
        )
        .with_data(serde_json::to_value(SourceData {
            url: job.source_url.clone(),
            reason: Some(reason.clone()),
        })?)
        .with_error(reason);
        self.record(store, job, skipped).await
    }

    async fn settle(
        &self,
        store: &EventStore,
        job: &mut UploadJob,
        external_id: &str,
        status: ProductionStatus,
        outputs: &[OutputFile],
    ) -> Result<CompletionOutcome> {
        match decide(job, external_id, status, outputs) {
            CompletionDecision::Resume { url } => {
                let received = JobEvent::new(
                    job.id,
                    Some("complete".to_string()),
                    EventType::CompletionReceived,
                    generate_idempotency_key(job.id, "complete", external_id),
                    format!("Production {} finished", external_id),
                    StepStatus::Completed,
                )
                .with_data(serde_json::to_value(SourceData { url, reason: None })?);
                self.record(store, job, received).await?;

                self.download_and_store(store, job).await?;
                Ok(CompletionOutcome::Resumed {
                    job_id: job.id,
                    status: job.status,
                })
            }
            CompletionDecision::Fail { message } => {
                self.fail(store, job, FailureReason::ProviderFailed, message)
                    .await?;
                Ok(CompletionOutcome::Failed { job_id: job.id })
            }
            CompletionDecision::Ignore(reason) => {
                debug!(job_id = %job.id, ?reason, "Completion does not apply");
                Ok(CompletionOutcome::Ignored {
                    job_id: Some(job.id),
                    reason,
                })
            }
        }
    }

    async fn expire_one(&self, job_id: Uuid, now: chrono::DateTime<Utc>) -> Result<bool> {
        if !self.get_job(job_id).await?.wait_expired(now) {
            return Ok(false);
        }

        let _guard = self.locks.lock(&job_id).await;
        let (store, mut job) = self.load(job_id).await?;
        if !job.wait_expired(now) {
            return Ok(false);
        }

        let external_id = job.external_job_id.clone().unwrap_or_default();

        // One last look before giving up on the enhanced output
        match self.dispatcher.status(&external_id).await {
            Ok(production) => {
                let decision =
                    decide(&job, &external_id, production.status, &production.output_files);
                if !matches!(decision, CompletionDecision::Ignore(_)) {
                    self.settle(
                        &store,
                        &mut job,
                        &external_id,
                        production.status,
                        &production.output_files,
                    )
                    .await?;
                    return Ok(true);
                }
            }
            Err(e) => warn!(%job_id, error = %e, "Final status check failed"),
        }

        info!(%job_id, production = %external_id, "Wait window elapsed, using original asset");
        let expired = JobEvent::new(
            job.id,
            Some("complete".to_string()),
            EventType::WaitExpired,
            generate_idempotency_key(job.id, "expire", &external_id),
            format!("No completion within {}s", self.settings.wait_window_secs),
            StepStatus::Skipped,
        )
        .with_data(serde_json::to_value(SourceData {
            url: job.source_url.clone(),
            reason: Some("wait window elapsed".to_string()),
        })?);
        self.record(&store, &mut job, expired).await?;

        self.download_and_store(&store, &mut job).await?;
        Ok(true)
    }

    async fn download_and_store(&self, store: &EventStore, job: &mut UploadJob) -> Result<()> {
        let url = job
            .download_url
            .clone()
            .with_context(|| format!("Job {} is downloading without a source", job.id))?;

        let store_key = generate_idempotency_key(job.id, "store", &url);
        if store.is_step_completed(&store_key).await? {
            debug!(job_id = %job.id, "Asset already stored");
            return Ok(());
        }

        let Some(bytes) = self.fetch_asset(store, job, &url).await? else {
            return Ok(());
        };

        let object_path = final_object_path(job, &url);
        let content_type = if job.enhanced {
            "audio/mpeg".to_string()
        } else {
            job.mime_type.clone()
        };

        let written = match self.storage.exists(&object_path).await {
            Ok(true) => Ok(()),
            Ok(false) => match self
                .storage
                .upload(&object_path, &bytes, &content_type)
                .await
            {
                Ok(_) | Err(StorageError::AlreadyExists(_)) => Ok(()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            return self
                .fail(store, job, FailureReason::StorageFailure, e.to_string())
                .await;
        }

        let public_url = self.storage.public_url(&object_path);
        let stored = JobEvent::new(
            job.id,
            Some("store".to_string()),
            EventType::AssetStored,
            store_key,
            format!("Stored {} ({} bytes)", object_path, bytes.len()),
            StepStatus::Completed,
        )
        .with_data(serde_json::to_value(StoredData {
            path: object_path,
            url: public_url.clone(),
        })?);
        self.record(store, job, stored).await?;

        info!(job_id = %job.id, enhanced = job.enhanced, url = %public_url, "Job stored");
        let _ = self.notifications.send(JobNotification::Completed {
            job_id: job.id,
            user_id: job.user_id.clone(),
            url: public_url,
        });
        Ok(())
    }

    /// Download with retries, staging the bytes. `None` means the job failed.
    async fn fetch_asset(
        &self,
        store: &EventStore,
        job: &mut UploadJob,
        url: &str,
    ) -> Result<Option<Vec<u8>>> {
        let key = generate_idempotency_key(job.id, "download", url);
        let artifact = format!("download-{}.bin", hash_input(url));

        if store.is_step_completed(&key).await? {
            if let Some(bytes) = store.load_artifact(&artifact).await? {
                debug!(job_id = %job.id, "Using staged download");
                return Ok(Some(bytes));
            }
        }

        let started = JobEvent::new(
            job.id,
            Some("download".to_string()),
            EventType::DownloadStarted,
            key.clone(),
            format!("Downloading {}", if job.enhanced { "enhanced output" } else { "original upload" }),
            StepStatus::Running,
        );
        self.record(store, job, started).await?;

        let clock = Instant::now();
        let mut failures: Vec<(u32, String)> = Vec::new();
        let result = retry(
            &self.settings.download_retry,
            || self.fetcher.fetch(url),
            |attempt, err| failures.push((attempt, err.to_string())),
        )
        .await;

        for (attempt, err) in failures {
            let retrying = JobEvent::new(
                job.id,
                Some("download".to_string()),
                EventType::DownloadRetrying,
                format!("{}:retry:{}", key, attempt),
                format!("Download attempt {} failed", attempt),
                StepStatus::Running,
            )
            .with_error(err);
            self.record(store, job, retrying).await?;
        }

        let bytes = match result {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                self.fail(
                    store,
                    job,
                    FailureReason::DownloadFailure,
                    format!("Empty response from {}", url),
                )
                .await?;
                return Ok(None);
            }
            Err(e) => {
                self.fail(store, job, FailureReason::DownloadFailure, e.to_string())
                    .await?;
                return Ok(None);
            }
        };

        let path = store.stage_artifact(&artifact, &bytes).await?;
        let completed = JobEvent::new(
            job.id,
            Some("download".to_string()),
            EventType::DownloadCompleted,
            key,
            format!("Downloaded {} bytes", bytes.len()),
            StepStatus::Completed,
        )
        .with_duration(clock.elapsed().as_millis() as u64)
        .with_data(serde_json::to_value(StagedData {
            path,
            size_bytes: bytes.len() as u64,
        })?);
        self.record(store, job, completed).await?;

        Ok(Some(bytes))
    }

    async fn fail(
        &self,
        store: &EventStore,
        job: &mut UploadJob,
        reason: FailureReason,
        message: String,
    ) -> Result<()> {
        error!(job_id = %job.id, ?reason, %message, "Job failed");

        let failed = JobEvent::new(
            job.id,
            None,
            EventType::JobFailed,
            format!("{}:failed", job.id),
            format!("Job failed: {:?}", reason),
            StepStatus::Failed,
        )
        .with_data(serde_json::to_value(FailureInfo {
            reason,
            message: message.clone(),
        })?)
        .with_error(message.clone());
        self.record(store, job, failed).await?;

        let _ = self.notifications.send(JobNotification::Failed {
            job_id: job.id,
            user_id: job.user_id.clone(),
            reason,
            message,
        });
        Ok(())
    }
}

/// Deterministic storage path of a job's final asset
pub fn final_object_path(job: &UploadJob, source_url: &str) -> String {
    let ext = if job.enhanced {
        "mp3"
    } else {
        Path::new(&job.raw_file_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
    };

    format!(
        "{}/processed/{}-{}.{}",
        job.user_id,
        job.id,
        hash_input(source_url),
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnhancementPreset;

    fn job(enhanced: bool) -> UploadJob {
        let mut job = UploadJob::new(
            Uuid::nil(),
            Utc::now(),
            NewJob {
                user_id: "u1".to_string(),
                raw_file_path: "u1/1700000000000-fatiha.wav".to_string(),
                source_url: "http://h/fatiha.wav".to_string(),
                title: "fatiha.wav".to_string(),
                mime_type: "audio/wav".to_string(),
                size_bytes: 10,
                estimated_duration_sec: 0.1,
                preset: EnhancementPreset::Studio,
            },
        );
        job.enhanced = enhanced;
        job
    }

    #[test]
    fn test_final_path_is_deterministic() {
        let a = final_object_path(&job(true), "https://x/out.mp3");
        let b = final_object_path(&job(true), "https://x/out.mp3");

        assert_eq!(a, b);
        assert!(a.starts_with("u1/processed/00000000-0000-0000-0000-000000000000-"));
        assert!(a.ends_with(".mp3"));
    }

    #[test]
    fn test_fallback_keeps_original_extension() {
        let path = final_object_path(&job(false), "http://h/fatiha.wav");
        assert!(path.ends_with(".wav"));
        assert_ne!(path, final_object_path(&job(false), "http://h/other.wav"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings: WorkflowSettings = serde_yaml::from_str("wait_window_secs: 60").unwrap();
        assert_eq!(settings.wait_window_secs, 60);
        assert_eq!(settings.sweep_interval_secs, 30);
        assert_eq!(settings.download_retry.max_attempts, 3);
    }
}
