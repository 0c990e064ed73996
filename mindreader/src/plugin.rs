//! Pipeline orchestration.
//!
//! The plugin owns the two queues decoupling ingest, decode, and store:
//! `lines` feeds the console reader and `blocks` feeds the consumer task.
//! Shutdown is ordered: closing `lines` drives the reader to EOF, which
//! closes `blocks`, which lets the consumer drain, shut the archiver down,
//! and signal completion. No queued block is lost on a graceful stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use object_store::ObjectStore;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use bundle::validate_one_block_suffix;
use common::{create_object_store, Block, FileStore, ObjectStoreConfig, WallClock};

use crate::archiver::Archiver;
use crate::archiver_io::{ArchiverStoreIo, ONE_BLOCK_EXTENSION};
use crate::block_stream::BlockStreamServer;
use crate::config::MindReaderConfig;
use crate::console::{ConsoleReader, ConsoleReaderFactory, ReadError};
use crate::error::{Error, Result};
use crate::shutdown::Shutdown;
use crate::uploader::{FileUploader, FileUploaderConfig};

pub use crate::shutdown::OnShutdown;

/// Hook invoked for every block passing the start gate, before archiving.
pub type HeadBlockUpdate = Arc<dyn Fn(u64, &str, DateTime<Utc>) + Send + Sync>;

/// The five object stores behind a pipeline. Built from configuration by
/// [`MindReaderPlugin::new`]; tests inject in-memory stores directly.
pub struct PluginStores {
    pub mergeable: Arc<dyn ObjectStore>,
    pub uploadable_one_blocks: Arc<dyn ObjectStore>,
    pub uploadable_merged: Arc<dyn ObjectStore>,
    pub one_blocks_remote: Arc<dyn ObjectStore>,
    pub merged_remote: Arc<dyn ObjectStore>,
}

/// Components consumed when the pipeline launches.
struct LaunchParts {
    archiver: Archiver,
    one_block_uploader: FileUploader,
    merged_uploader: FileUploader,
    console_reader_factory: ConsoleReaderFactory,
}

pub struct MindReaderPlugin {
    config: MindReaderConfig,
    shutdown: Shutdown,
    block_stream: Option<Arc<BlockStreamServer>>,
    head_block_update: Option<HeadBlockUpdate>,

    launch_parts: Mutex<Option<LaunchParts>>,
    lines_tx: Mutex<Option<mpsc::Sender<String>>>,
    consume_done_rx: Mutex<Option<watch::Receiver<bool>>>,
}

impl MindReaderPlugin {
    /// Builds the plugin and its stores from configuration.
    pub fn new(
        config: MindReaderConfig,
        console_reader_factory: ConsoleReaderFactory,
        on_shutdown: Option<OnShutdown>,
        block_stream: Option<Arc<BlockStreamServer>>,
        head_block_update: Option<HeadBlockUpdate>,
    ) -> Result<Self> {
        let working = std::path::Path::new(&config.working_directory);
        let local_store = |name: &str| -> Result<Arc<dyn ObjectStore>> {
            let path = working.join(name).to_string_lossy().into_owned();
            create_object_store(&ObjectStoreConfig::Local { path })
                .map_err(|e| Error::Config(e.to_string()))
        };
        let remote_store = |url: &str| -> Result<Arc<dyn ObjectStore>> {
            let store_config =
                ObjectStoreConfig::from_url(url).map_err(|e| Error::Config(e.to_string()))?;
            create_object_store(&store_config).map_err(|e| Error::Config(e.to_string()))
        };

        let stores = PluginStores {
            mergeable: local_store("mergeable")?,
            uploadable_one_blocks: local_store("uploadable-oneblock")?,
            uploadable_merged: local_store("uploadable-merged")?,
            one_blocks_remote: remote_store(&config.archive_store_url)?,
            merged_remote: remote_store(&config.merge_archive_store_url)?,
        };

        Self::with_stores(
            config,
            stores,
            console_reader_factory,
            on_shutdown,
            block_stream,
            head_block_update,
        )
    }

    /// Builds the plugin over caller-supplied stores.
    pub fn with_stores(
        config: MindReaderConfig,
        stores: PluginStores,
        console_reader_factory: ConsoleReaderFactory,
        on_shutdown: Option<OnShutdown>,
        block_stream: Option<Arc<BlockStreamServer>>,
        head_block_update: Option<HeadBlockUpdate>,
    ) -> Result<Self> {
        info!(
            archive_store_url = %config.archive_store_url,
            merge_archive_store_url = %config.merge_archive_store_url,
            one_block_suffix = %config.one_block_suffix,
            batch_mode = config.batch_mode,
            bundle_size = config.bundle_size,
            merge_threshold_age_secs = config.merge_threshold_age_secs,
            working_directory = %config.working_directory,
            start_block_num = config.start_block_num,
            stop_block_num = config.stop_block_num,
            channel_capacity = config.channel_capacity,
            with_head_block_update = head_block_update.is_some(),
            with_block_stream = block_stream.is_some(),
            "creating mindreader plugin"
        );

        validate_one_block_suffix(&config.one_block_suffix)
            .map_err(|e| Error::Config(e.to_string()))?;

        let mergeable = FileStore::new(Arc::clone(&stores.mergeable), ONE_BLOCK_EXTENSION);
        let uploadable_one_blocks =
            FileStore::new(Arc::clone(&stores.uploadable_one_blocks), ONE_BLOCK_EXTENSION);
        let uploadable_merged =
            FileStore::new(Arc::clone(&stores.uploadable_merged), ONE_BLOCK_EXTENSION);
        let merged_remote = FileStore::new(Arc::clone(&stores.merged_remote), ONE_BLOCK_EXTENSION);

        let archiver_io = ArchiverStoreIo::new(
            mergeable,
            uploadable_one_blocks,
            uploadable_merged,
            merged_remote,
            &config.one_block_suffix,
        );
        let archiver = Archiver::new(
            config.bundle_size,
            Arc::new(archiver_io),
            config.batch_mode,
            &config.one_block_suffix,
            chrono::Duration::seconds(config.merge_threshold_age_secs as i64),
            Arc::new(WallClock),
        );

        let uploader_config = FileUploaderConfig {
            poll_interval: Duration::from_millis(config.upload_poll_interval_ms),
            max_concurrent: config.upload_concurrency,
            shutdown_grace: Duration::from_millis(config.wait_upload_complete_on_shutdown_ms),
            ..FileUploaderConfig::default()
        };
        let one_block_uploader = FileUploader::with_config(
            stores.uploadable_one_blocks,
            stores.one_blocks_remote,
            uploader_config.clone(),
        );
        let merged_uploader = FileUploader::with_config(
            stores.uploadable_merged,
            stores.merged_remote,
            uploader_config,
        );

        Ok(Self {
            config,
            shutdown: Shutdown::new(on_shutdown),
            block_stream,
            head_block_update,
            launch_parts: Mutex::new(Some(LaunchParts {
                archiver,
                one_block_uploader,
                merged_uploader,
                console_reader_factory,
            })),
            lines_tx: Mutex::new(None),
            consume_done_rx: Mutex::new(None),
        })
    }

    /// Starts the pipeline: console reader over `lines`, archiver recovery,
    /// uploaders, consumer task, ingest task. Failures trigger shutdown
    /// instead of returning; the caller observes them via the callback.
    pub async fn launch(&self) {
        info!("starting mindreader");
        let Some(parts) = self.launch_parts.lock().await.take() else {
            warn!("mindreader was already launched");
            return;
        };
        let LaunchParts {
            mut archiver,
            one_block_uploader,
            merged_uploader,
            console_reader_factory,
        } = parts;

        let (lines_tx, lines_rx) = mpsc::channel(self.config.lines_channel_capacity);
        *self.lines_tx.lock().await = Some(lines_tx);

        let reader = match console_reader_factory(lines_rx) {
            Ok(reader) => reader,
            Err(err) => {
                self.shutdown.trigger(Some(err));
                return;
            }
        };

        debug!("starting archiver");
        if let Err(err) = archiver.start().await {
            self.shutdown.trigger(Some(err));
            return;
        }

        debug!("starting file uploaders");
        tokio::spawn(one_block_uploader.run(self.shutdown.token()));
        tokio::spawn(merged_uploader.run(self.shutdown.token()));

        let (blocks_tx, blocks_rx) = mpsc::channel(self.config.channel_capacity);
        let (done_tx, done_rx) = watch::channel(false);
        *self.consume_done_rx.lock().await = Some(done_rx);

        debug!(capacity = self.config.channel_capacity, "launching consume read flow");
        tokio::spawn(consume_read_flow(
            archiver,
            blocks_rx,
            self.block_stream.clone(),
            self.shutdown.clone(),
            Duration::from_millis(self.config.wait_upload_complete_on_shutdown_ms),
            done_tx,
        ));
        tokio::spawn(ingest_read_flow(
            reader,
            blocks_tx,
            self.shutdown.clone(),
            BlockNumberGate::new(self.config.start_block_num),
            self.config.stop_block_num,
            self.head_block_update.clone(),
        ));
    }

    /// Delivers one node stdout line. Dropped while terminating so a dead
    /// pipeline never blocks the supervised process.
    pub async fn log_line(&self, line: String) {
        if self.shutdown.is_terminating() {
            return;
        }
        let tx = self.lines_tx.lock().await.clone();
        let Some(tx) = tx else {
            debug!("dropping line, mindreader not launched yet");
            return;
        };
        if tx.send(line).await.is_err() {
            debug!("dropping line, lines channel already closed");
        }
    }

    /// Orderly stop: close `lines` and wait for the consumer to drain every
    /// queued block.
    pub async fn stop(&self) {
        info!("mindreader is stopping");
        let lines_tx = self.lines_tx.lock().await.take();
        if lines_tx.is_none() {
            // Never launched; there is no read flow to wait for.
            return;
        }
        drop(lines_tx);

        let done_rx = self.consume_done_rx.lock().await.take();
        if let Some(mut done_rx) = done_rx {
            info!("waiting until consume read flow is done processing blocks");
            let _ = done_rx.wait_for(|done| *done).await;
            info!("consume read flow terminated");
        }
    }

    /// Forced shutdown; idempotent and safe from any task.
    pub fn shutdown(&self, error: Option<Error>) {
        self.shutdown.trigger(error);
    }

    pub fn is_terminating(&self) -> bool {
        self.shutdown.is_terminating()
    }

    pub fn shutdown_error(&self) -> Option<Error> {
        self.shutdown.error()
    }
}

/// Discards blocks below the configured start block, once.
struct BlockNumberGate {
    gate: u64,
    passed: bool,
}

impl BlockNumberGate {
    fn new(gate: u64) -> Self {
        Self { gate, passed: gate == 0 }
    }

    fn pass(&mut self, num: u64) -> bool {
        if self.passed {
            return true;
        }
        if num >= self.gate {
            info!(block_num = num, gate = self.gate, "start block gate passed");
            self.passed = true;
        }
        self.passed
    }
}

async fn ingest_read_flow(
    mut reader: Box<dyn ConsoleReader>,
    blocks_tx: mpsc::Sender<Block>,
    shutdown: Shutdown,
    mut start_gate: BlockNumberGate,
    stop_block: u64,
    head_block_update: Option<HeadBlockUpdate>,
) {
    loop {
        let block = match reader.read_block().await {
            Ok(block) => block,
            Err(ReadError::Eof) => {
                info!("reached end of console reader stream, nothing more to do");
                break;
            }
            Err(err) => {
                // Keep reading afterwards: consuming lines is what keeps the
                // supervised process from blocking on its stdout pipe while
                // the pipeline winds down.
                error!(error = %err, "reading from console logs");
                shutdown.trigger(Some(Error::Reader(err.to_string())));
                continue;
            }
        };

        if !start_gate.pass(block.num) {
            continue;
        }
        if let Some(update) = &head_block_update {
            update(block.num, &block.id, block.timestamp);
        }

        let stop_reached = stop_block != 0 && block.num >= stop_block;
        if blocks_tx.send(block).await.is_err() {
            warn!("blocks channel closed, stopping ingestion");
            break;
        }
        if stop_reached && !shutdown.is_terminating() {
            info!(stop_block, "requested end block reached, requesting shutdown");
            shutdown.trigger(None);
        }
    }
    // Dropping blocks_tx closes the channel and lets the consumer drain.
}

async fn consume_read_flow(
    mut archiver: Archiver,
    mut blocks_rx: mpsc::Receiver<Block>,
    block_stream: Option<Arc<BlockStreamServer>>,
    shutdown: Shutdown,
    wait_upload_complete: Duration,
    done_tx: watch::Sender<bool>,
) {
    info!("starting consume flow");
    let mut drop_blocks = false;
    while let Some(block) = blocks_rx.recv().await {
        if drop_blocks {
            info!(block_num = block.num, "dropping block, archiver failed and pipeline is shutting down");
            continue;
        }
        debug!(block_num = block.num, "got one block");

        if let Err(err) = archiver.store_block(&block).await {
            error!(
                error = %err,
                block = %block,
                "failed storing block in archiver, shutting down; reprocess over this range to recover the block"
            );
            if !shutdown.is_terminating() {
                drop_blocks = true;
                shutdown.trigger(Some(err));
            }
            continue;
        }

        if let Some(server) = &block_stream {
            if let Err(err) = server.push_block(block) {
                error!(error = %err, "failed passing block to block stream server");
                if !shutdown.is_terminating() {
                    shutdown.trigger(Some(err));
                }
                continue;
            }
        }
    }

    info!("all blocks in channel were drained, shutting down archiver");
    let mut terminated = archiver.terminated();
    archiver.shutdown().await;
    tokio::select! {
        _ = tokio::time::sleep(wait_upload_complete) => {
            warn!(
                wait_upload_complete_on_shutdown = ?wait_upload_complete,
                "upload may not be complete: timed out waiting for archiver termination"
            );
        }
        _ = terminated.wait_for(|terminated| *terminated) => {
            info!("archiver terminated");
        }
    }
    let _ = done_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_open_gate_at_configured_block() {
        let mut gate = BlockNumberGate::new(5);
        assert!(!gate.pass(3));
        assert!(!gate.pass(4));
        assert!(gate.pass(6));
        // once open, lower numbers pass too (forks behind the gate)
        assert!(gate.pass(2));
    }

    #[test]
    fn should_open_gate_immediately_when_unset() {
        let mut gate = BlockNumberGate::new(0);
        assert!(gate.pass(1));
    }
}
