//! Downloads media referenced by URL before it is uploaded to the protocol.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

const DEFAULT_MEDIA_MAX_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum MediaFetchError {
    #[error("media fetching is not configured")]
    Disabled,
    #[error("unsupported media url '{0}'")]
    UnsupportedUrl(String),
    #[error("failed to build media http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to fetch media from '{url}': {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("media url '{url}' answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("media at '{url}' exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, MediaFetchError>;
}

/// Fetcher that refuses every request; the default for offline managers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledMediaFetcher;

#[async_trait]
impl MediaFetcher for DisabledMediaFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, MediaFetchError> {
        Err(MediaFetchError::Disabled)
    }
}

/// HTTP(S) fetcher with a request timeout and a body size cap.
#[derive(Debug, Clone)]
pub struct HttpMediaFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self, MediaFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MediaFetchError::Client)?;
        Ok(Self {
            client,
            max_bytes: DEFAULT_MEDIA_MAX_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, MediaFetchError> {
        let trimmed = url.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(MediaFetchError::UnsupportedUrl(url.to_string()));
        }
        let request_error = |source| MediaFetchError::Request {
            url: trimmed.to_string(),
            source,
        };

        let mut response = self
            .client
            .get(trimmed)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaFetchError::Status {
                url: trimmed.to_string(),
                status: status.as_u16(),
            });
        }
        let too_large = || MediaFetchError::TooLarge {
            url: trimmed.to_string(),
            limit: self.max_bytes,
        };
        if response
            .content_length()
            .is_some_and(|length| length > self.max_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        debug!(url = trimmed, bytes = body.len(), "media fetched");
        Ok(body)
    }
}
