//! Wiring of concrete adapters into a running engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::adapters::{AssetFetcher, AuphonicClient, HttpFetcher, LocalObjectStorage};
use crate::cache::OfflineCache;
use crate::config::ResolvedConfig;
use crate::core::{EnhancementDispatcher, Orchestrator};

const FETCH_TIMEOUT_SECS: u64 = 120;

/// Everything a command needs, built once from configuration
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub storage: Arc<LocalObjectStorage>,
    pub fetcher: Arc<dyn AssetFetcher>,
}

impl Runtime {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        std::fs::create_dir_all(config.jobs_dir()).with_context(|| {
            format!("Failed to create jobs dir: {}", config.jobs_dir().display())
        })?;

        let storage = Arc::new(LocalObjectStorage::new(
            &config.storage_dir,
            &config.server.bucket,
            &config.server.public_url,
        ));

        // Provider outputs are only downloadable with the API key
        let mut http = HttpFetcher::new(Duration::from_secs(FETCH_TIMEOUT_SECS));
        if let Some(ref key) = config.provider.api_key {
            http = http.with_bearer(config.provider.api_url.as_str(), key.as_str());
        }
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(http);

        let provider = AuphonicClient::new(
            &config.provider.api_url,
            config.provider.api_key.clone(),
            Duration::from_secs(config.provider.timeout_secs),
        );
        if !provider.is_configured() {
            warn!("AUPHONIC_API_KEY not set, uploads will skip enhancement");
        }

        let dispatcher =
            EnhancementDispatcher::new(Arc::new(provider), &config.provider.webhook_url);

        let orchestrator = Arc::new(Orchestrator::new(
            config.jobs_dir(),
            dispatcher,
            Arc::clone(&fetcher),
            storage.clone(),
            config.workflow.clone(),
        ));

        info!(
            home = %config.home.display(),
            storage = %config.storage_dir.display(),
            "Runtime ready"
        );

        Ok(Self {
            orchestrator,
            storage,
            fetcher,
        })
    }

    /// Offline cache backed by the shared fetcher
    pub async fn offline_cache(&self, config: &ResolvedConfig) -> Result<OfflineCache> {
        let cache = OfflineCache::open(&config.cache_dir, Arc::clone(&self.fetcher))
            .await
            .with_context(|| format!("Failed to open cache: {}", config.cache_dir.display()))?;
        Ok(cache.with_max_size(config.cache_max_size_bytes))
    }
}
