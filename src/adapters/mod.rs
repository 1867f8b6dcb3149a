//! Adapter interfaces for external systems.
//!
//! The workflow talks to three collaborators through these traits: the
//! enhancement provider, the object store holding uploads and finished
//! assets, and the HTTP fetcher used to pull audio down.

pub mod auphonic;
pub mod fetch;
pub mod storage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::retry::Retryable;
use crate::domain::{AlgorithmParams, ExternalProductionJob};

pub use auphonic::AuphonicClient;
pub use fetch::HttpFetcher;
pub use storage::LocalObjectStorage;

/// Request body for creating a production
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductionRequest {
    pub input_file: String,
    pub metadata: ProductionMetadata,
    pub algorithms: AlgorithmParams,
    pub output_files: Vec<OutputSpec>,
    pub webhook: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductionMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// Requested output encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSpec {
    pub format: String,
    pub bitrate: u32,
    pub ending: String,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            format: "mp3".to_string(),
            bitrate: 192,
            ending: "enhanced.mp3".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Enhancement provider is not configured")]
    NotConfigured,

    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

/// Audio enhancement service
#[async_trait]
pub trait EnhancementProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Create a production and return its id
    async fn create_production(&self, request: &ProductionRequest) -> Result<String, ProviderError>;

    /// Start processing a created production
    async fn start_production(&self, external_id: &str) -> Result<(), ProviderError>;

    /// Current state of a production
    async fn get_production(&self, external_id: &str)
        -> Result<ExternalProductionJob, ProviderError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Invalid or expired upload token")]
    InvalidToken,

    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
    pub path: String,
}

/// A listed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// One-shot upload target for a client that uploads directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUpload {
    pub signed_url: String,
    pub path: String,
    pub token: String,
}

/// A single bucket of an object store
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn bucket(&self) -> &str;

    /// Write a new object; never overwrites
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    fn public_url(&self, path: &str) -> String;

    async fn create_signed_upload_url(&self, path: &str) -> Result<SignedUpload, StorageError>;

    /// Objects directly under `prefix`, newest first
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("Not authorized to fetch {url} (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Unauthorized { .. } | Self::InvalidUrl(_) | Self::Io(_) => false,
        }
    }
}

/// Downloads a remote asset into memory
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}
