//! Background local-to-remote sweep.
//!
//! One uploader per `(local, remote)` store pair. Each poll lists the local
//! stage, uploads a bounded batch with bounded concurrency, and deletes the
//! local copy on success. Failed uploads stay in place and are retried on
//! the next sweep; remote keys equal local keys so re-uploads are
//! idempotent.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::store::{StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct FileUploaderConfig {
    pub poll_interval: Duration,
    /// Uploads running at once within a sweep.
    pub max_concurrent: usize,
    /// Files picked up per sweep; the rest wait for the next poll.
    pub list_limit: usize,
    /// Bound on the final drain sweep after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for FileUploaderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_concurrent: 5,
            list_limit: 250,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

pub struct FileUploader {
    local: Arc<dyn ObjectStore>,
    remote: Arc<dyn ObjectStore>,
    config: FileUploaderConfig,
}

impl FileUploader {
    pub fn new(local: Arc<dyn ObjectStore>, remote: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(local, remote, FileUploaderConfig::default())
    }

    pub fn with_config(
        local: Arc<dyn ObjectStore>,
        remote: Arc<dyn ObjectStore>,
        config: FileUploaderConfig,
    ) -> Self {
        Self { local, remote, config }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        debug!("starting file uploader");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    match tokio::time::timeout(self.config.shutdown_grace, self.sweep()).await {
                        Ok(Ok(uploaded)) => info!(uploaded, "file uploader drained on shutdown"),
                        Ok(Err(err)) => warn!(error = %err, "final upload sweep failed, files stay staged locally"),
                        Err(_) => warn!(
                            grace = ?self.config.shutdown_grace,
                            "upload may not be complete: timed out draining on shutdown"
                        ),
                    }
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(err) = self.sweep().await {
                        warn!(error = %err, "upload sweep failed, will retry on next poll");
                    }
                }
            }
        }
    }

    /// One pass: list, upload concurrently, delete local copies. Returns
    /// how many files made it to the remote store.
    async fn sweep(&self) -> StoreResult<usize> {
        let mut listing = self.local.list(None);
        let mut locations = Vec::new();
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(|e| StoreError::Storage(e.to_string()))?;
            locations.push(meta.location);
            if locations.len() >= self.config.list_limit {
                break;
            }
        }
        drop(listing);

        if locations.is_empty() {
            return Ok(0);
        }

        let results: Vec<(Path, StoreResult<()>)> = futures::stream::iter(locations)
            .map(|location| async move {
                let result = self.upload_one(&location).await;
                (location, result)
            })
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await;

        let mut uploaded = 0;
        for (location, result) in results {
            match result {
                Ok(()) => uploaded += 1,
                Err(err) => {
                    warn!(file = %location, error = %err, "upload failed, leaving file for next sweep");
                }
            }
        }
        Ok(uploaded)
    }

    async fn upload_one(&self, location: &Path) -> StoreResult<()> {
        let content = self
            .local
            .get(location)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        self.remote
            .put(location, PutPayload::from(content))
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        // Local copy only goes away once the remote write is acknowledged
        self.local
            .delete(location)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        debug!(file = %location, "uploaded file");
        Ok(())
    }
}
