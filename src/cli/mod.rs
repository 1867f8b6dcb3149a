//! Command-line interface for tilawa.
//!
//! Provides commands for running the upload server, inspecting and
//! resuming jobs, validating files, and managing the offline cache.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{self, ResolvedConfig};
use crate::core::validation::mime_for_extension;
use crate::core::{ChannelEventBus, CompletionListener, JobNotification};
use crate::domain::{EnhancementPreset, UploadJob};
use crate::runtime::Runtime;
use crate::server::{self, ServerState};

pub mod cache;

/// tilawa - Recitation upload, enhancement and offline playback pipeline
#[derive(Parser, Debug)]
#[command(name = "tilawa")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server and workflow workers
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Check a local file against the upload limits
    Validate {
        /// Audio file to check
        file: PathBuf,

        /// Declared MIME type (guessed from the extension if not provided)
        #[arg(long)]
        mime: Option<String>,
    },

    /// List recent jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the status of a job
    Status {
        /// Job ID (UUID)
        job_id: String,
    },

    /// Run every step of a job that can run now
    Resume {
        /// Job ID to resume
        job_id: String,
    },

    /// Ask the provider about a job waiting on enhancement
    Poll {
        /// Job ID to poll
        job_id: String,
    },

    /// Show enhancement presets and their algorithm parameters
    Presets,

    /// Show resolved configuration (debug)
    Config,

    /// Manage the offline cache
    Cache {
        #[command(subcommand)]
        command: cache::CacheCommands,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { bind } => serve(bind).await,
            Commands::Validate { file, mime } => validate_file(file, mime).await,
            Commands::Jobs { limit } => list_jobs(limit).await,
            Commands::Status { job_id } => show_status(&job_id).await,
            Commands::Resume { job_id } => resume_job(&job_id).await,
            Commands::Poll { job_id } => poll_job(&job_id).await,
            Commands::Presets => show_presets(),
            Commands::Config => show_config(),
            Commands::Cache { command } => {
                let cfg = config::config()?;
                let runtime = Runtime::from_config(cfg)?;
                let cache = runtime.offline_cache(cfg).await?;
                cache::execute(&cache, command).await
            }
        }
    }
}

fn parse_job_id(job_id: &str) -> Result<Uuid> {
    Uuid::parse_str(job_id).with_context(|| format!("Invalid job ID: {}", job_id))
}

fn runtime() -> Result<(&'static ResolvedConfig, Runtime)> {
    let cfg = config::config()?;
    let runtime = Runtime::from_config(cfg)?;
    Ok((cfg, runtime))
}

/// Run the server until interrupted
async fn serve(bind: Option<String>) -> Result<()> {
    let (cfg, runtime) = runtime()?;
    let orchestrator = Arc::clone(&runtime.orchestrator);

    let (bus, rx) = ChannelEventBus::new();
    let listener = Arc::new(CompletionListener::new(Arc::clone(&orchestrator)));
    tokio::spawn(listener.run(rx));

    let _sweeper = orchestrator.spawn_sweeper();

    let recovering = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        match recovering.recover().await {
            Ok(0) => {}
            Ok(n) => info!(jobs = n, "Recovered unfinished jobs"),
            Err(e) => error!(error = %e, "Recovery failed"),
        }
    });

    let mut notifications = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            match notification {
                JobNotification::Completed { job_id, user_id, url } => {
                    info!(%job_id, user = %user_id, %url, "Recitation ready")
                }
                JobNotification::Failed {
                    job_id,
                    user_id,
                    reason,
                    message,
                } => error!(%job_id, user = %user_id, ?reason, %message, "Recitation failed"),
            }
        }
    });

    if cfg.api_tokens.is_empty() {
        warn!("No API tokens configured, every user route will return 401");
    }

    let state = ServerState::new(
        orchestrator,
        runtime.storage,
        Arc::new(bus),
        cfg.ingest.clone(),
        cfg.api_tokens.clone(),
    );

    let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
    server::run_server(state, &bind).await
}

/// Validate a local file
async fn validate_file(file: PathBuf, mime: Option<String>) -> Result<()> {
    let cfg = config::config()?;

    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let mime = match mime {
        Some(m) => m,
        None => file
            .extension()
            .and_then(|e| e.to_str())
            .and_then(mime_for_extension)
            .unwrap_or("application/octet-stream")
            .to_string(),
    };

    match cfg.ingest.validate(&bytes, &mime) {
        Ok(ok) => {
            println!("OK: {}", file.display());
            println!("  Type:      {}", ok.mime_type);
            println!("  Size:      {} bytes", ok.size_bytes);
            println!("  Duration:  ~{:.0}s (estimated)", ok.estimated_duration_sec);
            Ok(())
        }
        Err(e) => anyhow::bail!("{} rejected ({}): {}", file.display(), e.reason(), e),
    }
}

/// List recent jobs
async fn list_jobs(limit: usize) -> Result<()> {
    let (_, runtime) = runtime()?;
    let jobs = runtime.orchestrator.list_jobs(limit).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<14} {:<20}",
        "JOB ID", "STATUS", "PRESET", "CREATED"
    );
    println!("{}", "-".repeat(94));

    for job in jobs {
        println!(
            "{:<38} {:<20} {:<14} {:<20}",
            job.id,
            job.status.as_str(),
            job.enhancement_preset.as_str(),
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn print_job(job: &UploadJob) {
    println!("Job ID:      {}", job.id);
    println!("User:        {}", job.user_id);
    println!("Title:       {}", job.title);
    println!("Status:      {}", job.status);
    println!("Preset:      {}", job.enhancement_preset);
    println!("Raw file:    {}", job.raw_file_path);
    if let Some(ref id) = job.external_job_id {
        println!("Production:  {}", id);
    }
    if let Some(deadline) = job.wait_deadline {
        println!("Wait until:  {}", deadline);
    }
    if let Some(ref url) = job.download_url {
        println!(
            "Download:    {} ({})",
            url,
            if job.enhanced { "enhanced" } else { "original" }
        );
    }
    if let Some(ref url) = job.final_url {
        println!("Final URL:   {}", url);
    }
    if let Some(ref failure) = job.failure {
        println!("Failure:     {:?}: {}", failure.reason, failure.message);
    }
    println!("Created:     {}", job.created_at);
    if let Some(completed) = job.completed_at {
        println!("Completed:   {}", completed);
    }
}

/// Show the status of a job
async fn show_status(job_id: &str) -> Result<()> {
    let job_id = parse_job_id(job_id)?;
    let (_, runtime) = runtime()?;

    let job = runtime.orchestrator.get_job(job_id).await?;
    print_job(&job);

    Ok(())
}

/// Resume a job
async fn resume_job(job_id: &str) -> Result<()> {
    let job_id = parse_job_id(job_id)?;
    let (_, runtime) = runtime()?;

    let job = runtime.orchestrator.advance(job_id).await?;
    print_job(&job);

    if job.status.is_terminal() {
        eprintln!("\n[Job {} finished: {}]", job.id, job.status);
    } else {
        eprintln!("\n[Job {} now {}]", job.id, job.status);
    }

    Ok(())
}

/// Poll the provider for a job
async fn poll_job(job_id: &str) -> Result<()> {
    let job_id = parse_job_id(job_id)?;
    let (_, runtime) = runtime()?;

    let outcome = runtime.orchestrator.poll(job_id).await?;
    eprintln!("[Poll outcome: {:?}]", outcome);

    let job = runtime.orchestrator.get_job(job_id).await?;
    print_job(&job);

    Ok(())
}

/// Print the preset table
fn show_presets() -> Result<()> {
    let unknown = EnhancementPreset::Unrecognized("<other>".to_string());

    for preset in EnhancementPreset::known().iter().chain(std::iter::once(&unknown)) {
        let params = serde_json::to_string(&preset.algorithm_params())
            .context("Failed to serialize preset")?;
        println!("{:<14} {}", preset.as_str(), params);
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("tilawa configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Jobs:                {}", cfg.jobs_dir().display());
    println!("  Storage:             {}", cfg.storage_dir.display());
    println!("  Cache:               {}", cfg.cache_dir.display());
    println!();
    println!("Server:");
    println!("  Bind:        {}", cfg.server.bind);
    println!("  Public URL:  {}", cfg.server.public_url);
    println!("  Bucket:      {}", cfg.server.bucket);
    println!("  API tokens:  {}", cfg.api_tokens.len());
    println!();
    println!("Provider:");
    println!("  API URL:     {}", cfg.provider.api_url);
    println!(
        "  API key:     {}",
        if cfg.provider.api_key.is_some() {
            "(set)"
        } else {
            "(not set - enhancement disabled)"
        }
    );
    println!("  Webhook:     {}", cfg.provider.webhook_url);
    println!();
    println!("Workflow:");
    println!("  Wait window:     {}s", cfg.workflow.wait_window_secs);
    println!("  Sweep interval:  {}s", cfg.workflow.sweep_interval_secs);
    println!(
        "  Download retry:  {} attempts, {}ms initial, x{}",
        cfg.workflow.download_retry.max_attempts,
        cfg.workflow.download_retry.initial_delay_ms,
        cfg.workflow.download_retry.backoff_multiplier
    );
    println!();
    println!("Ingest limits:");
    println!("  Max size:      {} bytes", cfg.ingest.max_file_bytes);
    println!("  Max duration:  {}s", cfg.ingest.max_duration_seconds);
    println!();
    println!("Cache:");
    match cfg.cache_max_size_bytes {
        Some(limit) => println!("  Max size:  {}", cache::format_bytes(limit)),
        None => println!("  Max size:  (unbounded)"),
    }

    Ok(())
}
