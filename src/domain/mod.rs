//! Domain types for the tilawa pipeline.
//!
//! This module contains the core data structures:
//! - Events: Immutable records of job transitions
//! - Job: Upload job state rebuilt from events
//! - Preset: Enhancement presets and provider parameters
//! - Production: Provider-side production state

pub mod events;
pub mod job;
pub mod preset;
pub mod production;

// Re-export commonly used types
pub use events::{EventType, JobEvent, StepStatus};
pub use job::{FailureInfo, FailureReason, JobStatus, NewJob, UploadJob};
pub use preset::{AlgorithmParams, EnhancementPreset, ReverbParams};
pub use production::{ExternalProductionJob, OutputFile, ProductionStatus};
