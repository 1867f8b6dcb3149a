//! Offline audio cache.
//!
//! Downloads recitations into a local directory and keeps a persistent
//! index of what is there. An entry in the index always points at a file
//! that existed when it was written; entries whose file has since vanished
//! are dropped the next time they are looked up.

pub mod index;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{AssetFetcher, FetchError};
use crate::core::event_store::hash_input;
use crate::core::keyed::KeyedLocks;

pub use index::{CacheIndex, CACHE_INDEX_KEY};

pub const CACHE_DIR_NAME: &str = "audio_cache";
const FILE_EXTENSION: &str = "m4a";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Downloaded file for '{id}' is empty")]
    EmptyDownload { id: String },

    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache index error: {0}")]
    Index(#[from] serde_json::Error),

    #[error("Cache task failed: {0}")]
    Task(String),
}

/// One cached recitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: String,
    pub url: String,
    pub local_path: PathBuf,
    pub surah_name: String,
    pub reciter_name: String,
    /// Epoch milliseconds
    pub cached_at: i64,
    pub size: u64,
}

/// Display metadata stored with a cached recitation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub surah_name: String,
    pub reciter_name: String,
}

pub struct OfflineCache {
    dir: PathBuf,
    index: CacheIndex,
    fetcher: Arc<dyn AssetFetcher>,
    in_flight: KeyedLocks<String>,
    max_size_bytes: Option<u64>,
}

impl OfflineCache {
    /// Open (creating if needed) a cache rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>, fetcher: Arc<dyn AssetFetcher>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        Ok(Self {
            index: CacheIndex::new(&dir),
            dir,
            fetcher,
            in_flight: KeyedLocks::new(),
            max_size_bytes: None,
        })
    }

    /// Evict oldest entries once the cache grows past `limit` bytes
    pub fn with_max_size(mut self, limit: Option<u64>) -> Self {
        self.max_size_bytes = limit;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the file for `id` lives
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file_stem(id), FILE_EXTENSION))
    }

    /// Download `url` into the cache under `id`.
    ///
    /// Concurrent calls for one id share a single download. An id that is
    /// already cached returns its path without fetching.
    #[instrument(skip(self, metadata))]
    pub async fn cache(
        &self,
        id: &str,
        url: &str,
        metadata: &TrackMetadata,
    ) -> Result<PathBuf, CacheError> {
        let _guard = self.in_flight.lock(&id.to_string()).await;

        if let Some(path) = self.lookup(id).await? {
            debug!("Already cached");
            return Ok(path);
        }

        let bytes = self.fetcher.fetch(url).await?;
        if bytes.is_empty() {
            return Err(CacheError::EmptyDownload { id: id.to_string() });
        }

        let path = self.path_for(id);
        let size = bytes.len() as u64;
        write_atomic(&self.dir, &path, bytes).await?;

        let entry = CacheEntry {
            id: id.to_string(),
            url: url.to_string(),
            local_path: path.clone(),
            surah_name: metadata.surah_name.clone(),
            reciter_name: metadata.reciter_name.clone(),
            cached_at: Utc::now().timestamp_millis(),
            size,
        };

        let limit = self.max_size_bytes;
        let keep = id.to_string();
        let evicted = self
            .index
            .update(move |entries| {
                entries.retain(|e| e.id != entry.id);
                entries.push(entry);
                match limit {
                    Some(limit) => evict_oldest(entries, limit, &keep),
                    None => Vec::new(),
                }
            })
            .await?;

        for victim in evicted {
            info!(id = %victim.id, size = victim.size, "Evicted cached recitation");
            remove_file(&victim.local_path).await?;
        }

        info!(size, path = %path.display(), "Cached recitation");
        Ok(path)
    }

    /// Path of a cached recitation, if present
    pub async fn get(&self, id: &str) -> Result<Option<PathBuf>, CacheError> {
        self.lookup(id).await
    }

    pub async fn is_cached(&self, id: &str) -> Result<bool, CacheError> {
        Ok(self.lookup(id).await?.is_some())
    }

    /// Drop one recitation from the cache
    pub async fn remove(&self, id: &str) -> Result<(), CacheError> {
        let _guard = self.in_flight.lock(&id.to_string()).await;

        let target = id.to_string();
        let removed = self
            .index
            .update(move |entries| {
                let (gone, kept): (Vec<_>, Vec<_>) =
                    entries.drain(..).partition(|e| e.id == target);
                *entries = kept;
                gone
            })
            .await?;

        remove_file(&self.path_for(id)).await?;
        for entry in removed {
            remove_file(&entry.local_path).await?;
        }
        Ok(())
    }

    /// Wipe the cache directory and the index
    pub async fn clear(&self) -> Result<(), CacheError> {
        let removed = self.index.reset().await?;
        info!(removed, dir = %self.dir.display(), "Cache cleared");
        Ok(())
    }

    /// Sum of indexed entry sizes in bytes
    pub async fn total_size(&self) -> Result<u64, CacheError> {
        Ok(self.index.load().await?.iter().map(|e| e.size).sum())
    }

    /// All entries, newest first
    pub async fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = self.index.load().await?;
        entries.sort_by(|a, b| b.cached_at.cmp(&a.cached_at));
        Ok(entries)
    }

    async fn lookup(&self, id: &str) -> Result<Option<PathBuf>, CacheError> {
        let entries = self.index.load().await?;
        let Some(entry) = entries.into_iter().find(|e| e.id == id) else {
            return Ok(None);
        };

        let present = fs::metadata(&entry.local_path)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if present {
            return Ok(Some(entry.local_path));
        }

        warn!(id, path = %entry.local_path.display(), "Cached file missing, dropping entry");
        self.index.forget(&entry).await?;
        Ok(None)
    }
}

/// File-system-safe stem for an id
fn file_stem(id: &str) -> String {
    let safe = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if safe {
        id.to_string()
    } else {
        hash_input(id)
    }
}

/// Remove oldest entries until the total fits `limit`, never touching `keep`
fn evict_oldest(entries: &mut Vec<CacheEntry>, limit: u64, keep: &str) -> Vec<CacheEntry> {
    let mut total: u64 = entries.iter().map(|e| e.size).sum();
    let mut evicted = Vec::new();

    entries.sort_by_key(|e| e.cached_at);
    while total > limit {
        let Some(pos) = entries.iter().position(|e| e.id != keep) else {
            break;
        };
        let victim = entries.remove(pos);
        total = total.saturating_sub(victim.size);
        evicted.push(victim);
    }

    evicted
}

async fn write_atomic(dir: &Path, dest: &Path, bytes: Vec<u8>) -> Result<(), CacheError> {
    let dir = dir.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), CacheError> {
        use std::io::Write;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&dest).map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| CacheError::Task(e.to_string()))?
}

async fn remove_file(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
