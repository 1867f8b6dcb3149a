//! Shared test doubles.
//!
//! Each mock counts its calls so tests can assert on side effects.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use tilawa::adapters::{
    AssetFetcher, EnhancementProvider, FetchError, ObjectInfo, ObjectStorage, ProductionRequest,
    ProviderError, SignedUpload, StorageError, StoredObject,
};
use tilawa::core::{EnhancementDispatcher, Orchestrator, RetryPolicy, WorkflowSettings};
use tilawa::domain::{EnhancementPreset, ExternalProductionJob, NewJob};
use tilawa::playback::{AudioBackend, PlaybackError, SessionOptions, Sound};

// =============================================================================
// Enhancement provider
// =============================================================================

#[derive(Default)]
pub struct MockProvider {
    pub fail_create: bool,
    pub creates: AtomicUsize,
    pub starts: AtomicUsize,
    pub status_calls: AtomicUsize,
    /// What `get_production` reports; `None` makes it fail
    pub production: Mutex<Option<ExternalProductionJob>>,
    pub requests: Mutex<Vec<ProductionRequest>>,
}

impl MockProvider {
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn report(&self, production: ExternalProductionJob) {
        *self.production.lock().unwrap() = Some(production);
    }
}

#[async_trait]
impl EnhancementProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_production(&self, request: &ProductionRequest) -> Result<String, ProviderError> {
        if self.fail_create {
            return Err(ProviderError::Transport("provider unreachable".to_string()));
        }
        self.requests.lock().unwrap().push(request.clone());
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("prod-{}", n))
    }

    async fn start_production(&self, _external_id: &str) -> Result<(), ProviderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_production(
        &self,
        external_id: &str,
    ) -> Result<ExternalProductionJob, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.production.lock().unwrap().clone() {
            Some(mut production) => {
                production.external_id = external_id.to_string();
                Ok(production)
            }
            None => Err(ProviderError::Transport("status unavailable".to_string())),
        }
    }
}

// =============================================================================
// Object storage
// =============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub uploads: AtomicUsize,
    pub fail_uploads: bool,
}

impl MemoryStorage {
    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    fn bucket(&self) -> &str {
        "recitations"
    }

    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        if self.fail_uploads {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        objects.insert(path.to_string(), bytes.to_vec());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(StoredObject {
            id: format!("obj-{}", objects.len()),
            path: path.to_string(),
        })
    }

    fn public_url(&self, path: &str) -> String {
        format!("memory://recitations/{}", path)
    }

    async fn create_signed_upload_url(&self, path: &str) -> Result<SignedUpload, StorageError> {
        Ok(SignedUpload {
            signed_url: format!("memory://signed/{}", path),
            path: path.to_string(),
            token: "token".to_string(),
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectInfo {
                name: k.clone(),
                size: v.len() as u64,
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.object(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

// =============================================================================
// Fetcher
// =============================================================================

#[derive(Default)]
pub struct MockFetcher {
    pub bodies: Mutex<HashMap<String, Vec<u8>>>,
    pub calls: AtomicUsize,
    /// Number of leading calls that fail with a network error
    pub transient_failures: AtomicU32,
    /// Fail every call with this HTTP status
    pub status: Option<u16>,
    pub delay: Option<Duration>,
}

impl MockFetcher {
    pub fn with_body(url: &str, body: &[u8]) -> Self {
        let fetcher = Self::default();
        fetcher.serve(url, body);
        fetcher
    }

    pub fn serve(&self, url: &str, body: &[u8]) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(status) = self.status {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchError::Network {
                url: url.to_string(),
                message: "connection reset".to_string(),
            });
        }

        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

// =============================================================================
// Audio backend
// =============================================================================

#[derive(Default)]
pub struct MockAudio {
    pub loads: Mutex<Vec<String>>,
    pub unloads: AtomicUsize,
    pub loaded: Arc<AtomicUsize>,
    pub max_loaded: Arc<AtomicUsize>,
    pub broken: HashSet<String>,
    pub sessions: Mutex<Vec<SessionOptions>>,
}

impl MockAudio {
    pub fn with_broken(uris: &[&str]) -> Self {
        Self {
            broken: uris.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn loaded_uris(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

pub struct MockSound {
    loaded: Arc<AtomicUsize>,
    released: bool,
}

#[async_trait]
impl AudioBackend for MockAudio {
    async fn configure_session(&self, options: &SessionOptions) -> Result<(), PlaybackError> {
        self.sessions.lock().unwrap().push(*options);
        Ok(())
    }

    async fn load(&self, uri: &str, _autoplay: bool) -> Result<Box<dyn Sound>, PlaybackError> {
        if self.broken.contains(uri) {
            return Err(PlaybackError::Load {
                uri: uri.to_string(),
                message: "unsupported format".to_string(),
            });
        }

        self.loads.lock().unwrap().push(uri.to_string());
        let now = self.loaded.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_loaded.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(MockSound {
            loaded: Arc::clone(&self.loaded),
            released: false,
        }))
    }
}

#[async_trait]
impl Sound for MockSound {
    async fn play(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn set_position(&mut self, _position_millis: u64) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn unload(&mut self) -> Result<(), PlaybackError> {
        if !self.released {
            self.released = true;
            self.loaded.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// =============================================================================
// Workflow wiring
// =============================================================================

pub const SOURCE_URL: &str = "memory://recitations/user-1/1700000000000-fatiha.mp3";
pub const ENHANCED_URL: &str = "https://provider.example/out/fatiha.enhanced.mp3";

/// Fast retries, long wait window
pub fn settings() -> WorkflowSettings {
    WorkflowSettings {
        wait_window_secs: 300,
        sweep_interval_secs: 1,
        download_retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
    }
}

pub fn orchestrator(
    jobs_dir: &Path,
    provider: Arc<MockProvider>,
    storage: Arc<MemoryStorage>,
    fetcher: Arc<MockFetcher>,
    settings: WorkflowSettings,
) -> Orchestrator {
    Orchestrator::new(
        jobs_dir,
        EnhancementDispatcher::new(provider, "http://localhost/api/auphonic/webhook"),
        fetcher,
        storage,
        settings,
    )
}

pub fn new_job(preset: EnhancementPreset) -> NewJob {
    NewJob {
        user_id: "user-1".to_string(),
        raw_file_path: "user-1/1700000000000-fatiha.mp3".to_string(),
        source_url: SOURCE_URL.to_string(),
        title: "fatiha.mp3".to_string(),
        mime_type: "audio/mpeg".to_string(),
        size_bytes: 4096,
        estimated_duration_sec: 0.25,
        preset,
    }
}
