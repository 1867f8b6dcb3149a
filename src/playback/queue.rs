//! Sequential multi-track player.
//!
//! Plays a playlist front to back with auto-advance. At most one sound is
//! loaded at any time; the previous one is always unloaded before the next
//! load starts. Tracks that fail to load are skipped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, PlaybackError, PlaybackStatus, SessionOptions, Sound};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackTrack {
    pub id: String,
    pub uri: String,
    pub title: String,
}

impl PlaybackTrack {
    pub fn new(id: impl Into<String>, uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    Completed,
}

type StatusCallback = Box<dyn FnMut(&PlaybackStatus) + Send>;
type TrackCallback = Box<dyn FnMut(usize, &PlaybackTrack) + Send>;
type CompleteCallback = Box<dyn FnMut() + Send>;

/// Observers for queue events
#[derive(Default)]
pub struct QueueCallbacks {
    on_status: Option<StatusCallback>,
    on_track_change: Option<TrackCallback>,
    on_queue_complete: Option<CompleteCallback>,
}

impl QueueCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status report from the loaded sound
    pub fn on_status(mut self, f: impl FnMut(&PlaybackStatus) + Send + 'static) -> Self {
        self.on_status = Some(Box::new(f));
        self
    }

    /// A track finished loading and is now current
    pub fn on_track_change(mut self, f: impl FnMut(usize, &PlaybackTrack) + Send + 'static) -> Self {
        self.on_track_change = Some(Box::new(f));
        self
    }

    /// The cursor moved past the last track
    pub fn on_queue_complete(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_queue_complete = Some(Box::new(f));
        self
    }
}

pub struct PlaybackQueue {
    backend: Arc<dyn AudioBackend>,
    callbacks: QueueCallbacks,
    playlist: Vec<PlaybackTrack>,
    current_index: usize,
    state: PlaybackState,
    sound: Option<Box<dyn Sound>>,
    completion_fired: bool,
}

impl PlaybackQueue {
    pub fn new(backend: Arc<dyn AudioBackend>, callbacks: QueueCallbacks) -> Self {
        Self {
            backend,
            callbacks,
            playlist: Vec::new(),
            current_index: 0,
            state: PlaybackState::Idle,
            sound: None,
            completion_fired: false,
        }
    }

    /// Replace the playlist and configure the audio session
    pub async fn initialize(&mut self, tracks: Vec<PlaybackTrack>) -> Result<(), PlaybackError> {
        self.release().await;

        self.playlist = tracks;
        self.current_index = 0;
        self.state = PlaybackState::Idle;
        self.completion_fired = false;

        self.backend
            .configure_session(&SessionOptions::background())
            .await
    }

    /// Load and start the track at the cursor. Tracks that fail to load are
    /// skipped; running off the end completes the queue.
    pub async fn play(&mut self) {
        loop {
            self.release().await;

            let Some(track) = self.playlist.get(self.current_index).cloned() else {
                self.finish();
                return;
            };

            self.state = PlaybackState::Loading;
            match self.backend.load(&track.uri, true).await {
                Ok(sound) => {
                    self.sound = Some(sound);
                    self.state = PlaybackState::Playing;
                    info!(index = self.current_index, title = %track.title, "Now playing");
                    if let Some(cb) = self.callbacks.on_track_change.as_mut() {
                        cb(self.current_index, &track);
                    }
                    return;
                }
                Err(e) => {
                    warn!(index = self.current_index, error = %e, "Skipping unplayable track");
                    self.current_index += 1;
                }
            }
        }
    }

    pub async fn pause(&mut self) -> Result<(), PlaybackError> {
        if let Some(sound) = self.sound.as_mut() {
            sound.pause().await?;
            self.state = PlaybackState::Paused;
        }
        Ok(())
    }

    pub async fn resume(&mut self) -> Result<(), PlaybackError> {
        if let Some(sound) = self.sound.as_mut() {
            sound.play().await?;
            self.state = PlaybackState::Playing;
        }
        Ok(())
    }

    /// Advance one track. Past the end there is no wrap.
    pub async fn next(&mut self) {
        if self.current_index < self.playlist.len() {
            self.current_index += 1;
        }
        self.play().await;
    }

    /// Go back one track. No-op on the first track.
    pub async fn previous(&mut self) {
        if self.playlist.is_empty() || self.current_index == 0 {
            return;
        }
        self.current_index = (self.current_index - 1).min(self.playlist.len() - 1);
        self.completion_fired = false;
        self.play().await;
    }

    pub async fn seek(&mut self, position_millis: u64) -> Result<(), PlaybackError> {
        if let Some(sound) = self.sound.as_mut() {
            sound.set_position(position_millis).await?;
        }
        Ok(())
    }

    /// Stop and unload the current sound
    pub async fn stop(&mut self) {
        if let Some(sound) = self.sound.as_mut() {
            if let Err(e) = sound.stop().await {
                warn!(error = %e, "Failed to stop sound");
            }
        }
        self.release().await;
        self.state = PlaybackState::Idle;
    }

    /// Stop and forget the playlist
    pub async fn cleanup(&mut self) {
        self.stop().await;
        self.playlist.clear();
        self.current_index = 0;
        self.completion_fired = false;
    }

    /// Feed a status report from the backend. A natural end advances unless
    /// the sound is looping.
    pub async fn handle_status(&mut self, status: PlaybackStatus) {
        if !status.is_loaded {
            return;
        }

        if let Some(cb) = self.callbacks.on_status.as_mut() {
            cb(&status);
        }

        if status.did_just_finish && !status.is_looping {
            debug!(index = self.current_index, "Track finished");
            self.next().await;
        }
    }

    pub fn current_track(&self) -> Option<&PlaybackTrack> {
        self.playlist.get(self.current_index)
    }

    pub fn playlist(&self) -> &[PlaybackTrack] {
        &self.playlist
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.sound.is_some()
    }

    fn finish(&mut self) {
        self.state = PlaybackState::Completed;
        if !self.completion_fired {
            self.completion_fired = true;
            info!("Queue complete");
            if let Some(cb) = self.callbacks.on_queue_complete.as_mut() {
                cb();
            }
        }
    }

    async fn release(&mut self) {
        if let Some(mut sound) = self.sound.take() {
            if let Err(e) = sound.unload().await {
                warn!(error = %e, "Failed to unload sound");
            }
        }
    }
}
