//! Core workflow logic.
//!
//! This module contains:
//! - EventStore: Append-only job logs
//! - Retry: Backoff policy and executor
//! - Validation: Upload limits
//! - Dispatcher: Provider submission
//! - Bus and Listener: Event delivery and completion handling
//! - Orchestrator: Main workflow engine

pub mod bus;
pub mod dispatcher;
pub mod event_store;
pub mod keyed;
pub mod listener;
pub mod orchestrator;
pub mod retry;
pub mod validation;

// Re-export commonly used types
pub use bus::{ChannelEventBus, EventBus, WorkflowEvent};
pub use dispatcher::{DispatchError, EnhancementDispatcher};
pub use event_store::{generate_idempotency_key, hash_input, EventStore};
pub use keyed::KeyedLocks;
pub use listener::{CompletionListener, CompletionOutcome, IgnoreReason};
pub use orchestrator::{JobNotification, Orchestrator, WorkflowSettings};
pub use retry::{retry, retry_if, RetryPolicy, Retryable};
pub use validation::{IngestLimits, ValidatedUpload, ValidationError};
