//! tilawa - Recitation audio lifecycle pipeline
//!
//! Takes a recorded Quran recitation from upload to a stored, enhanced
//! asset, and plays stored recitations back offline.
//!
//! # Architecture
//!
//! The upload workflow is event sourced:
//! - Every job transition is appended to the job's own event log
//! - Current job state is derived by replaying that log
//! - A restarted process continues each job from its last recorded step
//!
//! Completion of the external enhancement arrives by webhook or by polling;
//! both feed the same idempotent resume path.
//!
//! # Modules
//!
//! - `adapters`: Enhancement provider, object storage and HTTP fetching
//! - `core`: Workflow engine (EventStore, Orchestrator, Retry, Validation)
//! - `domain`: Data structures (JobEvent, UploadJob, EnhancementPreset)
//! - `cache`: Offline audio cache
//! - `playback`: Sequential playback queue
//! - `server`: HTTP ingress
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the upload server
//! tilawa serve
//!
//! # Check a job
//! tilawa status <job-id>
//!
//! # Download a recitation for offline use
//! tilawa cache put surah-001 https://example.com/001.m4a
//! ```

pub mod adapters;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod playback;
pub mod runtime;
pub mod server;

// Re-export main types at crate root for convenience
pub use cache::{CacheEntry, OfflineCache, TrackMetadata};
pub use core::{CompletionListener, IngestLimits, Orchestrator, RetryPolicy};
pub use domain::{EnhancementPreset, JobEvent, JobStatus, UploadJob};
pub use playback::{PlaybackQueue, PlaybackTrack};
