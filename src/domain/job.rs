//! Upload job state and reconstruction from events.
//!
//! An UploadJob tracks one uploaded recitation from validation through
//! enhancement to its final stored asset.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{EventType, JobEvent};
use super::preset::EnhancementPreset;

/// A recitation upload moving through the workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: Uuid,

    /// Owner of the upload
    pub user_id: String,

    /// Storage path of the raw upload
    pub raw_file_path: String,

    /// Publicly reachable URL of the raw upload
    pub source_url: String,

    /// Display title sent to the provider
    pub title: String,

    pub mime_type: String,
    pub size_bytes: u64,
    pub estimated_duration_sec: f64,
    pub enhancement_preset: EnhancementPreset,

    pub status: JobStatus,

    /// Production id at the provider, set at most once
    pub external_job_id: Option<String>,

    /// When the wait for a completion signal gives up
    pub wait_deadline: Option<DateTime<Utc>>,

    /// URL the final asset is fetched from
    pub download_url: Option<String>,

    /// Whether `download_url` points at the enhanced output
    pub enhanced: bool,

    /// Local copy of the downloaded asset
    pub staged_path: Option<PathBuf>,

    /// Storage path of the final asset
    pub final_path: Option<String>,

    /// Public URL of the final asset
    pub final_url: Option<String>,

    pub failure: Option<FailureInfo>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadJob {
    /// Build a job from its creation payload
    pub fn new(id: Uuid, created_at: DateTime<Utc>, spec: NewJob) -> Self {
        Self {
            id,
            user_id: spec.user_id,
            raw_file_path: spec.raw_file_path,
            source_url: spec.source_url,
            title: spec.title,
            mime_type: spec.mime_type,
            size_bytes: spec.size_bytes,
            estimated_duration_sec: spec.estimated_duration_sec,
            enhancement_preset: spec.preset,
            status: JobStatus::Validated,
            external_job_id: None,
            wait_deadline: None,
            download_url: None,
            enhanced: false,
            staged_path: None,
            final_path: None,
            final_url: None,
            failure: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
        }
    }

    /// Reconstruct job state from a sequence of events.
    ///
    /// Returns `None` unless the log opens with a well-formed `JobCreated`.
    pub fn from_events(events: &[JobEvent]) -> Option<Self> {
        let first = events.first()?;
        if first.event_type != EventType::JobCreated {
            return None;
        }

        let spec: NewJob = first.data_as()?;
        let mut job = Self::new(first.job_id, first.timestamp, spec);

        for event in &events[1..] {
            job.apply_event(event);
        }

        Some(job)
    }

    /// Apply a single event to update job state
    pub fn apply_event(&mut self, event: &JobEvent) {
        self.updated_at = event.timestamp;

        match event.event_type {
            EventType::JobCreated => {}
            EventType::EnhancementStarted => {
                self.status = JobStatus::Enhancing;
            }
            EventType::EnhancementSubmitted => {
                if let Some(data) = event.data_as::<SubmittedData>() {
                    if self.external_job_id.is_none() {
                        self.external_job_id = Some(data.external_id);
                    }
                    self.wait_deadline = Some(data.wait_deadline);
                }
                self.status = JobStatus::AwaitingCompletion;
            }
            EventType::EnhancementSkipped
            | EventType::CompletionReceived
            | EventType::WaitExpired => {
                if let Some(data) = event.data_as::<SourceData>() {
                    self.download_url = Some(data.url);
                }
                self.enhanced = event.event_type == EventType::CompletionReceived;
                self.wait_deadline = None;
                self.status = JobStatus::Downloading;
            }
            EventType::DownloadStarted | EventType::DownloadRetrying => {}
            EventType::DownloadCompleted => {
                if let Some(data) = event.data_as::<StagedData>() {
                    self.staged_path = Some(data.path);
                }
            }
            EventType::AssetStored => {
                if let Some(data) = event.data_as::<StoredData>() {
                    self.final_path = Some(data.path);
                    self.final_url = Some(data.url);
                }
                self.status = JobStatus::Stored;
                self.completed_at = Some(event.timestamp);
            }
            EventType::JobFailed => {
                self.failure = event.data_as::<FailureInfo>().or_else(|| {
                    Some(FailureInfo {
                        reason: FailureReason::Unknown,
                        message: event.error.clone().unwrap_or_default(),
                    })
                });
                self.status = JobStatus::Failed;
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    /// Check if the job has reached Stored or Failed
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// True while awaiting completion past the wait deadline
    pub fn wait_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::AwaitingCompletion
            && self.wait_deadline.map(|d| d <= now).unwrap_or(false)
    }
}

/// Where a job is in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Upload passed validation and is stored
    Validated,

    /// Being dispatched to the provider
    Enhancing,

    /// Waiting for the provider to finish
    AwaitingCompletion,

    /// Fetching the final asset
    Downloading,

    /// Final asset is in storage
    Stored,

    /// Gave up
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stored | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Enhancing => "enhancing",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::Downloading => "downloading",
            Self::Stored => "stored",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Download retries exhausted or a non-retryable fetch error
    DownloadFailure,

    /// Provider reported the production as failed
    ProviderFailed,

    /// Final asset could not be written
    StorageFailure,

    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub reason: FailureReason,
    pub message: String,
}

/// Payload of `JobCreated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub user_id: String,
    pub raw_file_path: String,
    pub source_url: String,
    pub title: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub estimated_duration_sec: f64,
    #[serde(default)]
    pub preset: EnhancementPreset,
}

/// Payload of `EnhancementSubmitted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedData {
    pub external_id: String,
    pub wait_deadline: DateTime<Utc>,
}

/// Payload of events that pick the download source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceData {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `DownloadCompleted`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedData {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Payload of `AssetStored`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredData {
    pub path: String,
    pub url: String,
}
