//! Object-store creation from configuration or URL.

use std::sync::Arc;

use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult};

/// Where a lane of artifacts lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    InMemory,
    Local { path: String },
    Aws { bucket: String, prefix: Option<String> },
}

impl ObjectStoreConfig {
    /// Parses a store URL: `memory://`, `s3://bucket/prefix`,
    /// `file:///path`, or a bare filesystem path.
    pub fn from_url(url: &str) -> StoreResult<Self> {
        if url.is_empty() {
            return Err(StoreError::InvalidConfig("empty store url".to_string()));
        }
        if url == "memory://" {
            return Ok(ObjectStoreConfig::InMemory);
        }
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, "")) => (bucket, None),
                Some((bucket, prefix)) => (bucket, Some(prefix.trim_end_matches('/').to_string())),
                None => (rest, None),
            };
            if bucket.is_empty() {
                return Err(StoreError::InvalidConfig(format!("missing s3 bucket in {:?}", url)));
            }
            return Ok(ObjectStoreConfig::Aws { bucket: bucket.to_string(), prefix });
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(ObjectStoreConfig::Local { path: path.to_string() });
        }
        if url.contains("://") {
            return Err(StoreError::InvalidConfig(format!("unsupported store url: {:?}", url)));
        }
        Ok(ObjectStoreConfig::Local { path: url.to_string() })
    }
}

/// Creates an object store from configuration.
///
/// Local paths are created if absent; S3 credentials and region come from
/// the environment.
pub fn create_object_store(config: &ObjectStoreConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    match config {
        ObjectStoreConfig::InMemory => Ok(Arc::new(object_store::memory::InMemory::new())),
        ObjectStoreConfig::Local { path } => {
            std::fs::create_dir_all(path).map_err(|e| {
                StoreError::InvalidConfig(format!("unable to create store directory {:?}: {}", path, e))
            })?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(path)
                .map_err(|e| StoreError::InvalidConfig(format!("local store {:?}: {}", path, e)))?;
            Ok(Arc::new(store))
        }
        ObjectStoreConfig::Aws { bucket, prefix } => {
            let store = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| StoreError::InvalidConfig(format!("s3 store {:?}: {}", bucket, e)))?;
            match prefix {
                Some(prefix) => Ok(Arc::new(PrefixStore::new(store, prefix.as_str()))),
                None => Ok(Arc::new(store)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_memory_url() {
        assert!(matches!(
            ObjectStoreConfig::from_url("memory://").unwrap(),
            ObjectStoreConfig::InMemory
        ));
    }

    #[test]
    fn should_parse_s3_url_with_prefix() {
        let config = ObjectStoreConfig::from_url("s3://archive/mainnet/blocks/").unwrap();
        match config {
            ObjectStoreConfig::Aws { bucket, prefix } => {
                assert_eq!(bucket, "archive");
                assert_eq!(prefix.as_deref(), Some("mainnet/blocks"));
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn should_parse_s3_url_without_prefix() {
        let config = ObjectStoreConfig::from_url("s3://archive").unwrap();
        match config {
            ObjectStoreConfig::Aws { bucket, prefix } => {
                assert_eq!(bucket, "archive");
                assert_eq!(prefix, None);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn should_parse_bare_path_as_local() {
        let config = ObjectStoreConfig::from_url("/var/blocks").unwrap();
        match config {
            ObjectStoreConfig::Local { path } => assert_eq!(path, "/var/blocks"),
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[test]
    fn should_reject_unknown_scheme() {
        assert!(ObjectStoreConfig::from_url("gs://bucket").is_err());
        assert!(ObjectStoreConfig::from_url("").is_err());
    }

    #[tokio::test]
    async fn should_create_local_store_in_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage").to_string_lossy().to_string();
        let store = create_object_store(&ObjectStoreConfig::Local { path: path.clone() }).unwrap();

        store
            .put(
                &object_store::path::Path::from("probe"),
                object_store::PutPayload::from_static(b"ok"),
            )
            .await
            .unwrap();
        assert!(std::path::Path::new(&path).join("probe").exists());
    }
}
