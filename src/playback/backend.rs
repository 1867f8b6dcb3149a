//! Audio output seam.
//!
//! The queue never talks to a device directly. A backend configures the
//! platform audio session and hands out loaded sounds; the queue owns at
//! most one of them at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Failed to load '{uri}': {message}")]
    Load { uri: String, message: String },

    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// Platform audio session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub plays_in_silent_mode: bool,
    pub stays_active_in_background: bool,
    pub duck_others: bool,
}

impl SessionOptions {
    /// Keep playing with the screen off or the ringer muted
    pub fn background() -> Self {
        Self {
            plays_in_silent_mode: true,
            stays_active_in_background: true,
            duck_others: true,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::background()
    }
}

/// A status report from the loaded sound
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub is_loaded: bool,
    pub is_playing: bool,
    pub position_millis: u64,
    pub duration_millis: Option<u64>,
    pub did_just_finish: bool,
    pub is_looping: bool,
}

#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn configure_session(&self, options: &SessionOptions) -> Result<(), PlaybackError>;

    /// Load `uri`, starting playback right away if `autoplay`
    async fn load(&self, uri: &str, autoplay: bool) -> Result<Box<dyn Sound>, PlaybackError>;
}

/// A loaded, controllable sound
#[async_trait]
pub trait Sound: Send {
    async fn play(&mut self) -> Result<(), PlaybackError>;

    async fn pause(&mut self) -> Result<(), PlaybackError>;

    async fn stop(&mut self) -> Result<(), PlaybackError>;

    async fn set_position(&mut self, position_millis: u64) -> Result<(), PlaybackError>;

    /// Release the underlying resource
    async fn unload(&mut self) -> Result<(), PlaybackError>;
}
