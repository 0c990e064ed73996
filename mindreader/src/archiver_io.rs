//! Storage operations behind the archiver.
//!
//! Three local staging lanes plus the remote merged store used for
//! recovery. Each lane is a [`FileStore`], so artifacts are zstd-compressed
//! `.dbin.zst` objects and every operation works on logical names.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use bundle::OneBlockFile;
use common::store::StoreError;
use common::{codec, Block, FileStore};

/// Extension shared by one-block files and merged bundles.
pub const ONE_BLOCK_EXTENSION: &str = "dbin.zst";

#[derive(Debug, Clone)]
pub enum IoError {
    NotFound(String),
    Storage(String),
    InvalidFile(String),
}

impl std::error::Error for IoError {}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::NotFound(name) => write!(f, "not found: {}", name),
            IoError::Storage(msg) => write!(f, "storage failure: {}", msg),
            IoError::InvalidFile(msg) => write!(f, "invalid file: {}", msg),
        }
    }
}

impl From<StoreError> for IoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => IoError::NotFound(name),
            other => IoError::Storage(other.to_string()),
        }
    }
}

type IoResult<T> = std::result::Result<T, IoError>;

/// The archiver's view of storage. One implementation targets the staging
/// directories and remote stores; tests substitute their own.
#[async_trait]
pub trait ArchiverIo: Send + Sync {
    /// Stores a block in the uploadable one-block lane.
    async fn store_one_block_file(&self, file_name: &str, block: &Block) -> IoResult<()>;

    /// Stores a block in the mergeable lane.
    async fn store_mergeable_one_block_file(&self, file_name: &str, block: &Block) -> IoResult<()>;

    /// Enumerates the mergeable lane, for startup recovery and batch
    /// seeding. Files that do not parse as one-block names are skipped.
    async fn walk_mergeable_one_block_files(&self) -> IoResult<Vec<OneBlockFile>>;

    /// Explodes a previously merged bundle back into one-block files with
    /// payloads. An absent bundle yields an empty list.
    async fn fetch_merged_one_block_files(&self, inclusive_lower: u64) -> IoResult<Vec<OneBlockFile>>;

    /// Reads a mergeable file's record bytes.
    async fn download_one_block_file(&self, file: &OneBlockFile) -> IoResult<Bytes>;

    /// Best-effort removal from the mergeable lane. Already-gone files are
    /// fine; other failures are logged and the sweep continues.
    async fn delete_one_block_files(&self, files: &[OneBlockFile]);

    /// Writes the bundle artifact covering `[inclusive_lower,
    /// inclusive_lower + size)` into the uploadable-merged lane.
    async fn merge_and_store(&self, inclusive_lower: u64, files: &[OneBlockFile]) -> IoResult<()>;
}

fn merged_file_name(inclusive_lower: u64) -> String {
    format!("{:010}", inclusive_lower)
}

pub struct ArchiverStoreIo {
    mergeable: FileStore,
    uploadable_one_blocks: FileStore,
    uploadable_merged: FileStore,
    merged_remote: FileStore,
    one_block_suffix: String,
}

impl ArchiverStoreIo {
    pub fn new(
        mergeable: FileStore,
        uploadable_one_blocks: FileStore,
        uploadable_merged: FileStore,
        merged_remote: FileStore,
        one_block_suffix: &str,
    ) -> Self {
        Self {
            mergeable,
            uploadable_one_blocks,
            uploadable_merged,
            merged_remote,
            one_block_suffix: one_block_suffix.to_string(),
        }
    }
}

#[async_trait]
impl ArchiverIo for ArchiverStoreIo {
    async fn store_one_block_file(&self, file_name: &str, block: &Block) -> IoResult<()> {
        let record = codec::encode_block(block);
        self.uploadable_one_blocks.write(file_name, &record).await?;
        Ok(())
    }

    async fn store_mergeable_one_block_file(&self, file_name: &str, block: &Block) -> IoResult<()> {
        let record = codec::encode_block(block);
        self.mergeable.write(file_name, &record).await?;
        Ok(())
    }

    async fn walk_mergeable_one_block_files(&self) -> IoResult<Vec<OneBlockFile>> {
        let mut files = Vec::new();
        for name in self.mergeable.walk().await? {
            match OneBlockFile::parse(&name) {
                Ok(file) => files.push(file),
                Err(err) => {
                    tracing::warn!(file = %name, error = %err, "skipping foreign file in mergeable lane");
                }
            }
        }
        Ok(files)
    }

    async fn fetch_merged_one_block_files(&self, inclusive_lower: u64) -> IoResult<Vec<OneBlockFile>> {
        let content = match self.merged_remote.read(&merged_file_name(inclusive_lower)).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let blocks = codec::decode_blocks(content)
            .map_err(|e| IoError::InvalidFile(format!("merged bundle {}: {}", inclusive_lower, e)))?;
        Ok(blocks
            .iter()
            .map(|block| OneBlockFile::from_block(block, &self.one_block_suffix))
            .collect())
    }

    async fn download_one_block_file(&self, file: &OneBlockFile) -> IoResult<Bytes> {
        Ok(self.mergeable.read(file.file_name()).await?)
    }

    async fn delete_one_block_files(&self, files: &[OneBlockFile]) {
        for file in files {
            match self.mergeable.delete(file.file_name()).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(file = %file.file_name(), error = %err, "unable to delete merged one-block file");
                }
            }
        }
    }

    async fn merge_and_store(&self, inclusive_lower: u64, files: &[OneBlockFile]) -> IoResult<()> {
        let mut content = BytesMut::new();
        for file in files {
            let payload = file.payload.as_ref().ok_or_else(|| {
                IoError::InvalidFile(format!("{} has no payload to merge", file.file_name()))
            })?;
            content.extend_from_slice(payload);
        }
        self.uploadable_merged
            .write(&merged_file_name(inclusive_lower), &content)
            .await?;
        Ok(())
    }
}
