//! Downloading source videos.

use async_trait::async_trait;
use futures::StreamExt;
use gifforge_common::{Error, Result};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Downloads a remote resource into a local file.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Download `url` into `dest`, sending `accept` as the `Accept` header.
    ///
    /// Returns the number of bytes written. Anything but a `200 OK` with a
    /// non-empty body is a [`Error::FetchFailed`].
    async fn fetch(&self, url: &Url, accept: &str, dest: &Path) -> Result<u64>;
}

/// [`Fetch`] implementation over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose downloads give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gifforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::fetch_with("failed to build HTTP client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url, accept: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|e| Error::fetch_with(format!("request to {} failed", url), e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::fetch(format!(
                "unexpected status {} from {}",
                status, url
            )));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::temp_file("open", e))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| Error::fetch_with(format!("download from {} interrupted", url), e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::temp_file("write", e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| Error::temp_file("write", e))?;

        if written == 0 {
            return Err(Error::fetch(format!("empty response body from {}", url)));
        }

        tracing::debug!(%url, bytes = written, "Downloaded source");
        Ok(written)
    }
}
