//! Source model download.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::PrepError;

/// Downloads a remote file to disk.
///
/// On error a partially written destination may remain; removing it is up to
/// the caller.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Returns the number of bytes written.
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, PrepError>;
}

/// HTTP(S) fetcher that streams the body chunk by chunk.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, PrepError> {
        info!(url, destination = %destination.display(), "Downloading");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PrepError::transfer(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PrepError::transfer(format!("GET {url} returned {status}")));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(destination).await?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                PrepError::transfer(format!("connection dropped after {written} bytes: {e}"))
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(url, bytes = written, "Download complete");
        Ok(written)
    }
}

/// Remove a partial download, ignoring a file that was never created.
pub fn discard_partial(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
