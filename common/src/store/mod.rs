//! Object-store plumbing for staged and archived artifacts.
//!
//! [`FileStore`] wraps any [`ObjectStore`] with the artifact extension
//! declared at construction. Stores whose extension ends in `.zst`
//! transparently zstd-compress on write and decompress on read, so callers
//! only ever see raw record bytes and logical, extension-less names.

mod factory;

pub use factory::{create_object_store, ObjectStoreConfig};

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use crate::codec;

#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(String),
    Storage(String),
    InvalidConfig(String),
}

impl std::error::Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(name) => write!(f, "object not found: {}", name),
            StoreError::Storage(msg) => write!(f, "storage error: {}", msg),
            StoreError::InvalidConfig(msg) => write!(f, "invalid store config: {}", msg),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

fn map_err(name: &str, err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound(name.to_string()),
        other => StoreError::Storage(other.to_string()),
    }
}

/// Object store plus the artifact extension and compression policy it serves.
///
/// Writes are atomic with respect to readers: local filesystem puts go
/// through a temp file and rename, and remote keys are deterministic so a
/// re-upload of the same name is idempotent.
#[derive(Clone)]
pub struct FileStore {
    store: Arc<dyn ObjectStore>,
    extension: String,
    compress: bool,
}

impl FileStore {
    pub fn new(store: Arc<dyn ObjectStore>, extension: &str) -> Self {
        Self {
            store,
            extension: extension.to_string(),
            compress: extension.ends_with("zst"),
        }
    }

    /// The underlying object store, for components that move raw objects
    /// between stores without re-encoding (the file uploader).
    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    fn location(&self, name: &str) -> Path {
        Path::from(format!("{}.{}", name, self.extension))
    }

    /// Writes `content` under the logical `name`, compressing if configured.
    pub async fn write(&self, name: &str, content: &[u8]) -> StoreResult<()> {
        let body = if self.compress {
            codec::compress(content).map_err(|e| StoreError::Storage(e.to_string()))?
        } else {
            Bytes::copy_from_slice(content)
        };
        self.store
            .put(&self.location(name), PutPayload::from(body))
            .await
            .map_err(|e| map_err(name, e))?;
        Ok(())
    }

    /// Reads the object back as raw record bytes, decompressing if configured.
    pub async fn read(&self, name: &str) -> StoreResult<Bytes> {
        let result = self
            .store
            .get(&self.location(name))
            .await
            .map_err(|e| map_err(name, e))?;
        let body = result.bytes().await.map_err(|e| map_err(name, e))?;
        if self.compress {
            codec::decompress(&body).map_err(|e| StoreError::Storage(e.to_string()))
        } else {
            Ok(body)
        }
    }

    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        self.store
            .delete(&self.location(name))
            .await
            .map_err(|e| map_err(name, e))?;
        Ok(())
    }

    /// Lists the logical names of every object carrying this store's
    /// extension, in lexical order. Foreign objects are skipped.
    pub async fn walk(&self) -> StoreResult<Vec<String>> {
        let suffix = format!(".{}", self.extension);
        let mut listing = self.store.list(None);
        let mut names = Vec::new();
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(|e| StoreError::Storage(e.to_string()))?;
            let raw = meta.location.to_string();
            if let Some(name) = raw.strip_suffix(&suffix) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
