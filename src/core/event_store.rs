//! Append-only job log with file-based persistence.
//!
//! Each job gets its own directory holding `events.jsonl` and an
//! `artifacts/` folder for staged downloads. Appends take an exclusive
//! file lock so concurrent writers never interleave a line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::domain::{JobEvent, StepStatus, UploadJob};

const EVENTS_FILE: &str = "events.jsonl";
const EXTERNAL_INDEX_DIR: &str = "by-external-id";

/// File-based event store for one job, using JSONL format
pub struct EventStore {
    /// Directory containing the job
    job_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Path to artifacts directory
    artifacts_dir: PathBuf,
}

impl EventStore {
    /// Create or open the event store for a job under `jobs_dir`
    pub async fn open(jobs_dir: &Path, job_id: Uuid) -> Result<Self> {
        let job_dir = jobs_dir.join(job_id.to_string());
        let artifacts_dir = job_dir.join("artifacts");

        fs::create_dir_all(&artifacts_dir).await.with_context(|| {
            format!(
                "Failed to create artifacts directory: {}",
                artifacts_dir.display()
            )
        })?;

        Ok(Self {
            events_path: job_dir.join(EVENTS_FILE),
            job_dir,
            artifacts_dir,
        })
    }

    /// Open the store only if the job already has a log
    pub async fn existing(jobs_dir: &Path, job_id: Uuid) -> Result<Option<Self>> {
        let events_path = jobs_dir.join(job_id.to_string()).join(EVENTS_FILE);
        if !fs::try_exists(&events_path).await.unwrap_or(false) {
            return Ok(None);
        }
        Self::open(jobs_dir, job_id).await.map(Some)
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Write downloaded bytes to the artifacts directory
    pub async fn stage_artifact(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let artifact_path = self.artifacts_dir.join(name);

        fs::write(&artifact_path, content)
            .await
            .with_context(|| format!("Failed to write artifact: {}", artifact_path.display()))?;

        Ok(artifact_path)
    }

    /// Load a staged artifact, if present
    pub async fn load_artifact(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let artifact_path = self.artifacts_dir.join(name);

        if !fs::try_exists(&artifact_path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = fs::read(&artifact_path)
            .await
            .with_context(|| format!("Failed to read artifact: {}", artifact_path.display()))?;

        Ok(Some(content))
    }

    /// Append an event to the log
    pub async fn append(&self, event: &JobEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        let path = self.events_path.clone();

        tokio::task::spawn_blocking(move || append_line(&path, &json))
            .await
            .context("Event append task panicked")?
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<JobEvent>> {
        if !fs::try_exists(&self.events_path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path).await.with_context(|| {
            format!("Failed to open events file: {}", self.events_path.display())
        })?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: JobEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild the job from its log
    pub async fn load_job(&self) -> Result<Option<UploadJob>> {
        let events = self.replay().await?;
        Ok(UploadJob::from_events(&events))
    }

    /// Check if a step with this key already completed (idempotency check)
    pub async fn is_step_completed(&self, idempotency_key: &str) -> Result<bool> {
        let events = self.replay().await?;

        Ok(events
            .iter()
            .any(|e| e.idempotency_key == idempotency_key && e.status == StepStatus::Completed))
    }

    /// Find events matching a predicate
    pub async fn find_events<F>(&self, predicate: F) -> Result<Vec<JobEvent>>
    where
        F: Fn(&JobEvent) -> bool,
    {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(predicate).collect())
    }

    /// List all job IDs under `jobs_dir`
    pub async fn list_jobs(jobs_dir: &Path) -> Result<Vec<Uuid>> {
        if !fs::try_exists(jobs_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();
        let mut entries = fs::read_dir(jobs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        jobs.push(uuid);
                    }
                }
            }
        }

        Ok(jobs)
    }

    /// Record which job owns a provider production id
    pub async fn link_external_id(jobs_dir: &Path, external_id: &str, job_id: Uuid) -> Result<()> {
        let index_dir = jobs_dir.join(EXTERNAL_INDEX_DIR);
        fs::create_dir_all(&index_dir)
            .await
            .with_context(|| format!("Failed to create index: {}", index_dir.display()))?;

        let entry = index_dir.join(hash_input(external_id));
        fs::write(&entry, job_id.to_string())
            .await
            .with_context(|| format!("Failed to write index entry: {}", entry.display()))
    }

    /// Find the job that owns a provider production id
    pub async fn lookup_external_id(jobs_dir: &Path, external_id: &str) -> Result<Option<Uuid>> {
        let entry = jobs_dir
            .join(EXTERNAL_INDEX_DIR)
            .join(hash_input(external_id));

        match fs::read_to_string(&entry).await {
            Ok(content) => Ok(Uuid::parse_str(content.trim()).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read index: {}", entry.display())),
        }
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open events file: {}", path.display()))?;

    file.lock_exclusive()
        .with_context(|| format!("Failed to lock events file: {}", path.display()))?;

    let written = writeln!(file, "{}", line).and_then(|_| file.flush());
    let _ = file.unlock();

    written.context("Failed to write event")
}

/// Generate an idempotency key for a step
pub fn generate_idempotency_key(job_id: Uuid, step_name: &str, input: &str) -> String {
    let input_hash = hash_input(input);
    format!("{}:{}:{}", job_id, step_name, input_hash)
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
