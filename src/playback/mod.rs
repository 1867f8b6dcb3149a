//! Offline-capable playback.

pub mod backend;
pub mod queue;

pub use backend::{AudioBackend, PlaybackError, PlaybackStatus, SessionOptions, Sound};
pub use queue::{PlaybackQueue, PlaybackState, PlaybackTrack, QueueCallbacks};
