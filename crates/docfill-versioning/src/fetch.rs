//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Streaming artifact downloads with progress and cancellation."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::FetchError;

/// Bytes received so far; `total` is known only when the server sends a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes written to disk.
    pub downloaded: u64,
    /// Announced size.
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Completion in percent, when the size is known.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        self.total.filter(|total| *total > 0).map(|total| {
            let pct = self.downloaded.saturating_mul(100) / total;
            u8::try_from(pct.min(100)).unwrap_or(100)
        })
    }
}

/// Progress callback handed to fetchers.
pub type ProgressFn = dyn Fn(DownloadProgress) + Send + Sync;

/// Shared cancellation request, observed between download chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, uncancelled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Downloads an artifact to a local file.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Write the artifact at `url` to `dest`, returning the byte count.
    ///
    /// A cancelled or failed fetch may leave a partial `dest`; callers own its cleanup.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressFn,
        cancel: &CancelFlag,
    ) -> Result<u64, FetchError>;
}

/// Fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("DocumentFiller-Updater/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressFn,
        cancel: &CancelFlag,
    ) -> Result<u64, FetchError> {
        info!(url, dest = %dest.display(), "downloading update artifact");
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let total = response.content_length();
        let mut downloaded: u64 = 0;
        let mut file = File::create(dest)?;
        let mut stream = response.bytes_stream();

        progress(DownloadProgress { downloaded, total });
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                debug!(downloaded, "download cancelled");
                return Err(FetchError::Cancelled);
            }
            let chunk = chunk?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            progress(DownloadProgress { downloaded, total });
        }
        file.flush()?;
        file.sync_all()?;

        info!(bytes = downloaded, "download complete");
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_needs_a_known_size() {
        let unknown = DownloadProgress {
            downloaded: 10,
            total: None,
        };
        assert_eq!(unknown.percent(), None);
        let half = DownloadProgress {
            downloaded: 50,
            total: Some(100),
        };
        assert_eq!(half.percent(), Some(50));
        let overshoot = DownloadProgress {
            downloaded: 150,
            total: Some(100),
        };
        assert_eq!(overshoot.percent(), Some(100));
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }
}
