//! Content resolution over HTTP
//!
//! Blocks stored through a `url` storage keep the URL as content; this
//! adapter downloads it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::debug;

use crate::domain::graph::{ContentResolver, Storage, StorageKind};
use crate::error::{Error, Result};

/// Default request timeout (in seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct HttpContentResolver {
    http_client: HttpClient,
}

impl HttpContentResolver {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::NetworkError)?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ContentResolver for HttpContentResolver {
    async fn resolve(&self, storage: &Storage, content: &str) -> Result<Vec<u8>> {
        match storage.kind {
            StorageKind::Url => {
                let url = content.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(Error::InvalidInput(format!(
                        "storage '{}' expects an http(s) URL, got '{}'",
                        storage.name, url
                    )));
                }

                let response = self
                    .http_client
                    .get(url)
                    .send()
                    .await?
                    .error_for_status()?;
                let bytes = response.bytes().await?;

                debug!(storage = %storage.name, url, size = bytes.len(), "Content fetched");
                Ok(bytes.to_vec())
            }
        }
    }
}
