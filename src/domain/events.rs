//! Event types for the job log.
//!
//! Every job transition is recorded as an immutable event in an append-only
//! log. A job's state is whatever replaying its events produces.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in a job's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The job this event belongs to
    pub job_id: Uuid,

    /// Workflow step name (if applicable)
    pub step_id: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{job_id}:{step}:{input_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (NO secrets)
    pub payload_summary: String,

    /// Status of the step this event describes
    pub status: StepStatus,

    /// Structured payload, shape depends on `event_type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Time taken in milliseconds (for completed steps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        job_id: Uuid,
        step_id: Option<String>,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            job_id,
            step_id,
            event_type,
            idempotency_key,
            payload_summary,
            status,
            data: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Attach a structured payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Decode the payload as `T`, if present and well-formed
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Types of events that can occur during a job's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Upload validated and stored; job exists
    JobCreated,

    /// Dispatch to the enhancement provider began
    EnhancementStarted,

    /// Provider accepted and started a production
    EnhancementSubmitted,

    /// Dispatch failed; continuing with the original asset
    EnhancementSkipped,

    /// Provider reported a finished production
    CompletionReceived,

    /// Wait window elapsed without a usable completion
    WaitExpired,

    /// Asset download began
    DownloadStarted,

    /// A download attempt failed and will be retried
    DownloadRetrying,

    /// Asset bytes staged locally
    DownloadCompleted,

    /// Final asset written to object storage
    AssetStored,

    /// Job reached the failed terminal state
    JobFailed,
}

/// Status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped (idempotency check or fallback)
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}
