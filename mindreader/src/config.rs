use serde::{Deserialize, Serialize};

/// Plugin configuration.
///
/// Store URLs accept local paths and remote object-store URIs; see
/// [`common::ObjectStoreConfig::from_url`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MindReaderConfig {
    /// Remote store receiving uploaded one-block files.
    pub archive_store_url: String,
    /// Remote store receiving uploaded merged bundles.
    pub merge_archive_store_url: String,
    /// Root of the local staging directories.
    pub working_directory: String,

    /// Merge every block regardless of age (reprocessing runs).
    #[serde(default)]
    pub batch_mode: bool,
    #[serde(default = "default_bundle_size")]
    pub bundle_size: u64,
    /// Blocks older than this are bundled instead of uploaded individually.
    #[serde(default = "default_merge_threshold_age_secs")]
    pub merge_threshold_age_secs: u64,
    /// Discard blocks below this number; 0 disables the gate.
    #[serde(default)]
    pub start_block_num: u64,
    /// Request shutdown once this block number is reached; 0 disables.
    #[serde(default)]
    pub stop_block_num: u64,
    /// Writer-identity tag embedded in one-block filenames.
    #[serde(default = "default_one_block_suffix")]
    pub one_block_suffix: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_lines_channel_capacity")]
    pub lines_channel_capacity: usize,
    #[serde(default = "default_upload_poll_interval_ms")]
    pub upload_poll_interval_ms: u64,
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    /// How long the consumer waits for the archiver to settle on shutdown.
    #[serde(default = "default_wait_upload_complete_on_shutdown_ms")]
    pub wait_upload_complete_on_shutdown_ms: u64,
}

impl MindReaderConfig {
    pub fn new(archive_store_url: &str, merge_archive_store_url: &str, working_directory: &str) -> Self {
        Self {
            archive_store_url: archive_store_url.to_string(),
            merge_archive_store_url: merge_archive_store_url.to_string(),
            working_directory: working_directory.to_string(),
            batch_mode: false,
            bundle_size: default_bundle_size(),
            merge_threshold_age_secs: default_merge_threshold_age_secs(),
            start_block_num: 0,
            stop_block_num: 0,
            one_block_suffix: default_one_block_suffix(),
            channel_capacity: default_channel_capacity(),
            lines_channel_capacity: default_lines_channel_capacity(),
            upload_poll_interval_ms: default_upload_poll_interval_ms(),
            upload_concurrency: default_upload_concurrency(),
            wait_upload_complete_on_shutdown_ms: default_wait_upload_complete_on_shutdown_ms(),
        }
    }
}

fn default_bundle_size() -> u64 {
    100
}

fn default_merge_threshold_age_secs() -> u64 {
    3600
}

fn default_one_block_suffix() -> String {
    "default".to_string()
}

fn default_channel_capacity() -> usize {
    100
}

fn default_lines_channel_capacity() -> usize {
    10_000
}

fn default_upload_poll_interval_ms() -> u64 {
    500
}

fn default_upload_concurrency() -> usize {
    5
}

fn default_wait_upload_complete_on_shutdown_ms() -> u64 {
    30_000
}
