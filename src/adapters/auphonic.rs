//! Auphonic API client.
//!
//! Endpoints:
//! - POST /productions.json
//! - POST /production/{uuid}/start.json
//! - GET  /production/{uuid}.json
//!
//! Auth: Bearer token

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{EnhancementProvider, ProductionRequest, ProviderError};
use crate::domain::{ExternalProductionJob, OutputFile, ProductionStatus};

pub const DEFAULT_API_URL: &str = "https://auphonic.com/api";

/// Auphonic REST client
pub struct AuphonicClient {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

/// Envelope around every Auphonic response
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Production fields shared by API responses and webhook callbacks.
///
/// Status may arrive as a string, a numeric code, or `status_string`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionPayload {
    #[serde(default)]
    pub uuid: Option<String>,

    #[serde(default)]
    pub status: Option<serde_json::Value>,

    #[serde(default)]
    pub status_string: Option<String>,

    #[serde(default)]
    pub output_files: Vec<OutputFile>,
}

impl ProductionPayload {
    pub fn production_status(&self) -> ProductionStatus {
        if let Some(ref s) = self.status_string {
            return ProductionStatus::parse(s);
        }
        match &self.status {
            Some(serde_json::Value::String(s)) => ProductionStatus::parse(s),
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .map(ProductionStatus::from_code)
                .unwrap_or(ProductionStatus::Processing),
            _ => ProductionStatus::Processing,
        }
    }

    pub fn into_job(self, fallback_id: &str) -> ExternalProductionJob {
        let status = self.production_status();
        ExternalProductionJob {
            external_id: self.uuid.unwrap_or_else(|| fallback_id.to_string()),
            status,
            output_files: self.output_files,
        }
    }
}

impl AuphonicClient {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or(ProviderError::NotConfigured)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn transport(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport(err.to_string())
}

#[async_trait]
impl EnhancementProvider for AuphonicClient {
    fn name(&self) -> &str {
        "auphonic"
    }

    #[instrument(skip(self, request), fields(input = %request.input_file))]
    async fn create_production(&self, request: &ProductionRequest) -> Result<String, ProviderError> {
        let key = self.key()?;

        let response = self
            .client
            .post(self.endpoint("productions.json"))
            .bearer_auth(key)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let envelope: Envelope<ProductionPayload> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let uuid = envelope
            .data
            .uuid
            .ok_or_else(|| ProviderError::Malformed("missing data.uuid".to_string()))?;

        debug!(production = %uuid, "Production created");
        Ok(uuid)
    }

    #[instrument(skip(self))]
    async fn start_production(&self, external_id: &str) -> Result<(), ProviderError> {
        let key = self.key()?;

        let response = self
            .client
            .post(self.endpoint(&format!("production/{}/start.json", external_id)))
            .bearer_auth(key)
            .send()
            .await
            .map_err(transport)?;

        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_production(
        &self,
        external_id: &str,
    ) -> Result<ExternalProductionJob, ProviderError> {
        let key = self.key()?;

        let response = self
            .client
            .get(self.endpoint(&format!("production/{}.json", external_id)))
            .bearer_auth(key)
            .send()
            .await
            .map_err(transport)?;

        let envelope: Envelope<ProductionPayload> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(envelope.data.into_job(external_id))
    }
}
