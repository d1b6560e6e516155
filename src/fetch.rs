//! Remote source fetching for URL ingest.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{Error, Result};

const PDF_SIGNATURE: &[u8] = b"%PDF-";

/// Downloads the bytes behind a URL.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

/// HTTP(S) fetcher with a size cap and a PDF signature check.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::InvalidInput(format!(
                    "unsupported URL scheme: {}",
                    other
                )))
            }
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::SourceFetchFailed(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SourceFetchFailed(format!(
                "{} returned {}",
                url, status
            )));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(Error::SourceFetchFailed(format!(
                    "{} is {} bytes, over the {} byte limit",
                    url, len, self.max_bytes
                )));
            }
        }

        let mut body = response.bytes_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| Error::SourceFetchFailed(format!("{}: {}", url, e)))?;
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(Error::SourceFetchFailed(format!(
                    "{} exceeds the {} byte limit",
                    url, self.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if !bytes.starts_with(PDF_SIGNATURE) {
            return Err(Error::SourceFetchFailed(format!(
                "{} did not return a PDF",
                url
            )));
        }

        debug!(url = %url, bytes = bytes.len(), "Fetched source");
        Ok(bytes)
    }
}
