//! HTTP asset fetcher.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{AssetFetcher, FetchError};

/// Fetches assets over HTTP(S), optionally attaching a bearer token for
/// URLs under a configured prefix.
pub struct HttpFetcher {
    client: reqwest::Client,
    credentials: Vec<(String, String)>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            credentials: Vec::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` to URLs starting with `prefix`
    pub fn with_bearer(mut self, prefix: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials.push((prefix.into(), token.into()));
        self
    }

    fn token_for(&self, url: &str) -> Option<&str> {
        self.credentials
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, token)| token.as_str())
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_builder() {
        FetchError::InvalidUrl(url.to_string())
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let mut request = self.client.get(url);
        if let Some(token) = self.token_for(url) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| classify(url, e))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(FetchError::Unauthorized {
                url: url.to_string(),
                status,
            });
        }
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let bytes = response.bytes().await.map_err(|e| classify(url, e))?;
        debug!(url, bytes = bytes.len(), "Fetched asset");
        Ok(bytes.to_vec())
    }
}
