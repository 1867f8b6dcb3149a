//! Filesystem-backed object storage.
//!
//! Layout: `<root>/<bucket>/<path>`. Objects are written through a temp
//! file in the destination directory and linked into place without
//! clobbering, so a reader never sees a partial object and an existing
//! object is never replaced.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{ObjectInfo, ObjectStorage, SignedUpload, StorageError, StoredObject};

const LIST_LIMIT: usize = 100;

struct PendingUpload {
    path: String,
    expires_at: SystemTime,
}

pub struct LocalObjectStorage {
    root: PathBuf,
    bucket: String,
    public_base_url: String,
    signed_ttl: Duration,
    pending: Mutex<HashMap<String, PendingUpload>>,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signed_ttl: Duration::from_secs(2 * 60 * 60),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_signed_ttl(mut self, ttl: Duration) -> Self {
        self.signed_ttl = ttl;
        self
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    /// Resolve an object path, rejecting anything that could escape the bucket
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let invalid = path.is_empty()
            || path.starts_with('/')
            || path.contains('\\')
            || path
                .split('/')
                .any(|seg| seg.is_empty() || seg == "." || seg == "..");

        if invalid {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        Ok(self.bucket_dir().join(path))
    }

    /// Consume a signed upload token and store the bytes at its path
    pub async fn redeem_signed_upload(
        &self,
        token: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let path = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let now = SystemTime::now();
            pending.retain(|_, p| p.expires_at > now);
            pending
                .remove(token)
                .map(|p| p.path)
                .ok_or(StorageError::InvalidToken)?
        };

        self.upload(&path, bytes, content_type).await
    }
}

fn write_new(dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = dest
        .parent()
        .ok_or_else(|| StorageError::InvalidPath(dest.display().to_string()))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;

    tmp.persist_noclobber(dest).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            StorageError::AlreadyExists(dest.display().to_string())
        } else {
            StorageError::Io(e.error)
        }
    })?;

    Ok(())
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let dest = self.resolve(path)?;
        let data = bytes.to_vec();

        tokio::task::spawn_blocking(move || write_new(&dest, &data))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))??;

        debug!(bucket = %self.bucket, path, content_type, "Stored object");

        Ok(StoredObject {
            id: Uuid::new_v4().to_string(),
            path: path.to_string(),
        })
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/storage/{}/{}", self.public_base_url, self.bucket, path)
    }

    async fn create_signed_upload_url(&self, path: &str) -> Result<SignedUpload, StorageError> {
        self.resolve(path)?;

        let token = Uuid::new_v4().simple().to_string();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(
                token.clone(),
                PendingUpload {
                    path: path.to_string(),
                    expires_at: SystemTime::now() + self.signed_ttl,
                },
            );
        }

        Ok(SignedUpload {
            signed_url: format!("{}/storage/signed/{}", self.public_base_url, token),
            path: path.to_string(),
            token,
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let dir = self.resolve(prefix)?;
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
            objects.push(ObjectInfo {
                name,
                size: meta.len(),
                created_at: DateTime::<Utc>::from(modified),
            });
        }

        objects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        objects.truncate(LIST_LIMIT);
        Ok(objects)
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        Ok(fs::try_exists(&full).await?)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve(path)?;
        match fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
