//! Persistent cache index.
//!
//! A JSON array of entries in the cache directory. Every read-modify-write
//! runs under an in-process mutex and an exclusive lock file, and the new
//! index replaces the old one by rename.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::warn;

use super::{CacheEntry, CacheError};

/// Storage key of the index
pub const CACHE_INDEX_KEY: &str = "tilawa_audio_cache_index";

const LOCK_FILE: &str = ".index.lock";

pub struct CacheIndex {
    dir: PathBuf,
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl CacheIndex {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(format!("{}.json", CACHE_INDEX_KEY)),
            lock_path: dir.join(LOCK_FILE),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current entries. A missing or unreadable index reads as empty.
    pub async fn load(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let _guard = self.guard.lock().await;
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        blocking(move || {
            let lock = open_lock(&lock_path)?;
            lock.lock_shared()?;
            let entries = read_entries(&path);
            let _ = lock.unlock();
            entries
        })
        .await
    }

    /// Apply `change` to the entries and persist the result
    pub async fn update<F, T>(&self, change: F) -> Result<T, CacheError>
    where
        F: FnOnce(&mut Vec<CacheEntry>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.guard.lock().await;
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        blocking(move || {
            let lock = open_lock(&lock_path)?;
            lock.lock_exclusive()?;

            let result = read_entries(&path).and_then(|mut entries| {
                let out = change(&mut entries);
                write_entries(&path, &entries)?;
                Ok(out)
            });

            let _ = lock.unlock();
            result
        })
        .await
    }

    /// Drop `stale` only if the index still holds that exact entry.
    ///
    /// A lookup that saw a missing file must not remove an entry that a
    /// concurrent download has written since.
    pub async fn forget(&self, stale: &CacheEntry) -> Result<bool, CacheError> {
        let stale = stale.clone();
        self.update(move |entries| {
            let before = entries.len();
            entries.retain(|e| {
                !(e.id == stale.id
                    && e.local_path == stale.local_path
                    && e.cached_at == stale.cached_at)
            });
            entries.len() != before
        })
        .await
    }

    /// Delete everything in the cache directory and start an empty index.
    ///
    /// Files the index does not know about go too. Returns how many
    /// directory entries were removed.
    pub async fn reset(&self) -> Result<usize, CacheError> {
        let _guard = self.guard.lock().await;
        let dir = self.dir.clone();
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        blocking(move || {
            let lock = open_lock(&lock_path)?;
            lock.lock_exclusive()?;

            let result = wipe_dir(&dir, &lock_path).and_then(|removed| {
                write_entries(&path, &[])?;
                Ok(removed)
            });

            let _ = lock.unlock();
            result
        })
        .await
    }
}

fn wipe_dir(dir: &Path, keep: &Path) -> Result<usize, CacheError> {
    let mut removed = 0;
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        if path == keep {
            continue;
        }

        let outcome = if item.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match outcome {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

async fn blocking<T, F>(work: F) -> Result<T, CacheError>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
}

fn open_lock(path: &Path) -> Result<fs::File, CacheError> {
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?)
}

fn read_entries(path: &Path) -> Result<Vec<CacheEntry>, CacheError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&content) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cache index unreadable, starting empty");
            Ok(Vec::new())
        }
    }
}

fn write_entries(path: &Path, entries: &[CacheEntry]) -> Result<(), CacheError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;

    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, entries)?;
        writer.flush()?;
    }

    tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;
    Ok(())
}
