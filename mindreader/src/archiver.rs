//! Per-block decision engine.
//!
//! Fresh blocks go straight to the uploadable one-block lane. Blocks older
//! than the merge threshold are staged in the mergeable lane and grouped by
//! the [`Bundler`] into fixed-size ranges; every completed range is written
//! as a single bundle and its constituents are deleted. Batch mode forces
//! every block through the mergeable lane regardless of age.
//!
//! `store_block` is driven by the plugin's consumer task only, so calls are
//! strictly serialized and the bundler is single-writer.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use bundle::{Bundler, OneBlockFile};
use common::{Block, Clock};

use crate::archiver_io::{ArchiverIo, IoError};
use crate::error::{Error, Result};

pub struct Archiver {
    bundle_size: u64,
    io: Arc<dyn ArchiverIo>,
    batch_mode: bool,
    one_block_suffix: String,
    merge_threshold_age: chrono::Duration,
    clock: Arc<dyn Clock>,

    bundler: Option<Bundler>,
    currently_merging: bool,
    /// Highest `lib_num` seen on the longest mergeable chain.
    last_seen_lib: Option<u64>,
    terminated_tx: watch::Sender<bool>,
}

impl Archiver {
    pub fn new(
        bundle_size: u64,
        io: Arc<dyn ArchiverIo>,
        batch_mode: bool,
        one_block_suffix: &str,
        merge_threshold_age: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (terminated_tx, _) = watch::channel(false);
        Self {
            bundle_size,
            io,
            batch_mode,
            one_block_suffix: one_block_suffix.to_string(),
            merge_threshold_age,
            clock,
            bundler: None,
            currently_merging: false,
            last_seen_lib: None,
            terminated_tx,
        }
    }

    /// Last irreversible block tracked from the longest mergeable chain,
    /// for supervisory reporting of catch-up progress.
    pub fn last_seen_lib(&self) -> Option<u64> {
        self.last_seen_lib
    }

    /// Startup recovery: blocks staged in the mergeable lane before a
    /// restart are re-seeded into a bundler so no acknowledged block is
    /// lost and bundle boundaries stay intact.
    pub async fn start(&mut self) -> Result<()> {
        let walked = self
            .io
            .walk_mergeable_one_block_files()
            .await
            .map_err(storage_err)?;
        if walked.is_empty() {
            return Ok(());
        }
        self.seed_bundler(walked, 0).await
    }

    /// Fires only once every mergeable write of the final block has
    /// completed; `store_block` is serialized so nothing is in flight when
    /// the consumer calls this.
    pub fn terminated(&self) -> watch::Receiver<bool> {
        self.terminated_tx.subscribe()
    }

    /// No new merges are initiated after shutdown.
    pub async fn shutdown(&mut self) {
        if let Some(bundler) = &self.bundler {
            if !bundler.is_empty() {
                info!(
                    pending = bundler.len(),
                    lower = bundler.current_lower(),
                    "archiver terminating with blocks left in the mergeable lane"
                );
            }
        }
        let _ = self.terminated_tx.send(true);
    }

    pub async fn store_block(&mut self, block: &Block) -> Result<()> {
        let file = OneBlockFile::from_block(block, &self.one_block_suffix);
        let age = block.age(self.clock.now());
        let is_old = age > self.merge_threshold_age;

        let merge = if self.batch_mode {
            if self.bundler.is_none() {
                let walked = self
                    .io
                    .walk_mergeable_one_block_files()
                    .await
                    .map_err(storage_err)?;
                self.seed_bundler(walked, file.num).await?;
            }
            true
        } else if self.currently_merging {
            // Catch-up ends once blocks are inside the live threshold and
            // nothing mergeable is pending.
            if is_old || self.bundler.as_ref().is_some_and(Bundler::has_complete_bundle) {
                true
            } else {
                info!(
                    block_num = file.num,
                    "block is within the live threshold, leaving catch-up mode"
                );
                self.currently_merging = false;
                false
            }
        } else if is_old {
            if self.bundler.is_none() {
                let lower = file.num - file.num % self.bundle_size;
                info!(
                    block_num = file.num,
                    lower, "block crossed the merge age threshold, opening bundle"
                );
                self.bundler = Some(Bundler::new(self.bundle_size, lower));
            }
            true
        } else {
            false
        };

        if !merge {
            return self
                .io
                .store_one_block_file(file.file_name(), block)
                .await
                .map_err(storage_err);
        }

        self.currently_merging = true;
        self.store_mergeable(file, block).await?;
        self.merge_completed_bundles().await
    }

    async fn store_mergeable(&mut self, file: OneBlockFile, block: &Block) -> Result<()> {
        let Some(bundler) = self.bundler.as_mut() else {
            return Err(Error::Storage(
                "mergeable block routed without an open bundle".to_string(),
            ));
        };
        if bundler.contains(file.num, &file.id) {
            debug!(file = %file.file_name(), "block already staged as mergeable, ignoring");
            return Ok(());
        }

        if let Err(first) = self
            .io
            .store_mergeable_one_block_file(file.file_name(), block)
            .await
        {
            warn!(error = %first, file = %file.file_name(), "mergeable store failed, retrying once");
            self.io
                .store_mergeable_one_block_file(file.file_name(), block)
                .await
                .map_err(storage_err)?;
        }
        bundler.add(file);

        if let Some(last) = bundler.longest_chain_last_block() {
            if self.last_seen_lib.map_or(true, |lib| last.lib_num > lib) {
                debug!(
                    lib_num = last.lib_num,
                    block_num = last.num,
                    "longest chain advanced the last irreversible block"
                );
                self.last_seen_lib = Some(last.lib_num);
            }
        }
        Ok(())
    }

    /// Merges every range the bundler has completed. A block that jumps
    /// several boundaries at once produces several merges.
    async fn merge_completed_bundles(&mut self) -> Result<()> {
        loop {
            let completed = self.bundler.as_ref().and_then(Bundler::bundle_complete);
            let Some((lower, mut files)) = completed else {
                return Ok(());
            };

            // Seeded files carry filename metadata only; materialize their
            // records before writing the bundle.
            for file in &mut files {
                if file.payload.is_none() {
                    let record = self
                        .io
                        .download_one_block_file(file)
                        .await
                        .map_err(storage_err)?;
                    file.payload = Some(record);
                }
            }

            info!(lower, blocks = files.len(), "bundle complete, merging");
            self.io
                .merge_and_store(lower, &files)
                .await
                .map_err(storage_err)?;
            self.io.delete_one_block_files(&files).await;

            if let Some(bundler) = self.bundler.as_mut() {
                let drained = bundler.commit(lower);
                debug!(
                    drained = drained.len(),
                    next_lower = bundler.current_lower(),
                    "bundle committed"
                );
            }
        }
    }

    /// Seeds a bundler from walked mergeable files, falling back to
    /// `fallback_num` for the lower bound when the lane is empty. The
    /// already-merged bundle covering the bound, if any, re-primes chains
    /// for restarts that land mid-bundle.
    async fn seed_bundler(&mut self, walked: Vec<OneBlockFile>, fallback_num: u64) -> Result<()> {
        let first = walked.iter().map(|f| f.num).min().unwrap_or(fallback_num);
        let lower = first - first % self.bundle_size;
        let mut bundler = Bundler::new(self.bundle_size, lower);

        let merged = self
            .io
            .fetch_merged_one_block_files(lower)
            .await
            .map_err(storage_err)?;
        for file in merged {
            bundler.add(file);
        }

        let seeded = walked.len();
        for file in walked {
            bundler.add(file);
        }

        if let Some(last) = bundler.longest_chain_last_block() {
            if self.last_seen_lib.map_or(true, |lib| last.lib_num > lib) {
                self.last_seen_lib = Some(last.lib_num);
            }
        }

        info!(lower, seeded, "seeded bundler from mergeable lane");
        self.bundler = Some(bundler);
        self.currently_merging = true;
        Ok(())
    }
}

fn storage_err(err: IoError) -> Error {
    Error::Storage(err.to_string())
}
