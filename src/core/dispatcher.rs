//! Submits uploads to the enhancement provider.
//!
//! A submission is two calls: create the production, then start it. Either
//! failing is reported so the caller can fall back to the original asset.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::adapters::{
    EnhancementProvider, OutputSpec, ProductionMetadata, ProductionRequest, ProviderError,
};
use crate::domain::{EnhancementPreset, ExternalProductionJob};

pub const DEFAULT_ARTIST: &str = "Tilawa User";
pub const DEFAULT_ALBUM: &str = "Quran Recitations";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Enhancement provider is not configured")]
    NotConfigured,

    #[error("Failed to create production: {0}")]
    Create(#[source] ProviderError),

    #[error("Failed to start production {external_id}: {source}")]
    Start {
        external_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("Failed to query production {external_id}: {source}")]
    Status {
        external_id: String,
        #[source]
        source: ProviderError,
    },
}

pub struct EnhancementDispatcher {
    provider: Arc<dyn EnhancementProvider>,
    webhook_url: String,
}

impl EnhancementDispatcher {
    pub fn new(provider: Arc<dyn EnhancementProvider>, webhook_url: impl Into<String>) -> Self {
        Self {
            provider,
            webhook_url: webhook_url.into(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Build the provider request for an asset
    pub fn build_request(
        &self,
        asset_url: &str,
        preset: &EnhancementPreset,
        title: &str,
    ) -> ProductionRequest {
        ProductionRequest {
            input_file: asset_url.to_string(),
            metadata: ProductionMetadata {
                title: title.to_string(),
                artist: DEFAULT_ARTIST.to_string(),
                album: DEFAULT_ALBUM.to_string(),
            },
            algorithms: preset.algorithm_params(),
            output_files: vec![OutputSpec::default()],
            webhook: self.webhook_url.clone(),
        }
    }

    /// Create and start a production. Returns the provider's id.
    #[instrument(skip(self), fields(provider = %self.provider.name()))]
    pub async fn submit(
        &self,
        asset_url: &str,
        preset: &EnhancementPreset,
        title: &str,
    ) -> Result<String, DispatchError> {
        let request = self.build_request(asset_url, preset, title);

        let external_id = self
            .provider
            .create_production(&request)
            .await
            .map_err(|e| match e {
                ProviderError::NotConfigured => DispatchError::NotConfigured,
                other => DispatchError::Create(other),
            })?;

        self.provider
            .start_production(&external_id)
            .await
            .map_err(|source| DispatchError::Start {
                external_id: external_id.clone(),
                source,
            })?;

        info!(production = %external_id, preset = %preset, "Enhancement started");
        Ok(external_id)
    }

    /// Ask the provider for the current state of a production
    pub async fn status(&self, external_id: &str) -> Result<ExternalProductionJob, DispatchError> {
        self.provider
            .get_production(external_id)
            .await
            .map_err(|source| DispatchError::Status {
                external_id: external_id.to_string(),
                source,
            })
    }
}
