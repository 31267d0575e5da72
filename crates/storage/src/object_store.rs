//! Object storage cache backend (S3-compatible, Azure Blob, in-memory).

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, azure::MicrosoftAzureBuilder, memory::InMemory, path::Path, ObjectStore,
};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::backend::{normalize_path, normalize_prefix, CacheStorage};
use crate::config::{AzureCacheConfig, S3CacheConfig};
use crate::entry::{content_type_for_path, CachedTileEntry, ObjectInfo};
use crate::error::{Result, StorageError};

/// Tile cache on top of any `object_store` implementation.
///
/// An optional key prefix lets several caches share one bucket. Content
/// type is not stored with the object; it is derived from the extension
/// that every cache path carries.
pub struct ObjectStoreCache {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    label: &'static str,
}

impl ObjectStoreCache {
    /// Wrap an existing store.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>, label: &'static str) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self {
            store,
            prefix,
            label,
        }
    }

    /// S3 or any S3-compatible endpoint (MinIO, Ceph, ...).
    pub fn s3(config: &S3CacheConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("Failed to create S3 client: {}", e)))?;
        Ok(Self::new(Arc::new(store), config.prefix.clone(), "s3"))
    }

    /// Azure Blob Storage container.
    pub fn azure(config: &AzureCacheConfig) -> Result<Self> {
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&config.account)
            .with_container_name(&config.container);
        if let Some(key) = &config.access_key {
            builder = builder.with_access_key(key);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("Failed to create Azure client: {}", e)))?;
        Ok(Self::new(Arc::new(store), config.prefix.clone(), "azure"))
    }

    /// Process-local store, for tests and ephemeral deployments.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), None, "memory")
    }

    fn location(&self, path: &str) -> Result<(String, Path)> {
        let logical = normalize_path(path)?;
        let key = match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, logical),
            None => logical.clone(),
        };
        Ok((logical, Path::from(key)))
    }

    fn to_logical(&self, location: &Path) -> String {
        let key = location.to_string();
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.trim_start_matches('/').to_string())
                .unwrap_or(key),
            None => key,
        }
    }

    /// Object store listings work on whole segments, so list the segment
    /// parent of the prefix and filter by string afterwards.
    fn listing_root(&self, prefix: &str) -> Option<Path> {
        let parent = prefix.rfind('/').map(|idx| &prefix[..idx]).unwrap_or("");
        let key = match (&self.prefix, parent.is_empty()) {
            (Some(p), true) => p.clone(),
            (Some(p), false) => format!("{}/{}", p, parent),
            (None, true) => return None,
            (None, false) => parent.to_string(),
        };
        Some(Path::from(key))
    }
}

#[async_trait]
impl CacheStorage for ObjectStoreCache {
    #[instrument(skip(self), fields(backend = self.label))]
    async fn try_get(&self, path: &str) -> Result<Option<CachedTileEntry>> {
        let (logical, location) = self.location(path)?;

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(StorageError::backend(format!(
                    "Failed to read {}: {}",
                    logical, e
                )))
            }
        };
        let created_at = result.meta.last_modified;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::backend(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read cached tile");
        Ok(Some(CachedTileEntry {
            bytes,
            content_type: content_type_for_path(&logical),
            created_at,
        }))
    }

    #[instrument(skip(self, bytes, _content_type), fields(backend = self.label, size = bytes.len()))]
    async fn put(&self, path: &str, bytes: Bytes, _content_type: &str) -> Result<()> {
        let (logical, location) = self.location(path)?;

        // Same bytes already stored: keep the object and its timestamp
        match self.store.head(&location).await {
            Ok(meta) if meta.size == bytes.len() => {
                let existing = self.store.get(&location).await?.bytes().await?;
                if existing == bytes {
                    debug!(path = %logical, "Identical tile already stored");
                    return Ok(());
                }
            }
            Ok(_) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => {
                return Err(StorageError::backend(format!(
                    "Failed to check {}: {}",
                    logical, e
                )))
            }
        }

        self.store
            .put(&location, bytes.into())
            .await
            .map_err(|e| StorageError::backend(format!("Failed to write {}: {}", logical, e)))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (logical, location) = self.location(path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::backend(format!(
                "Failed to delete {}: {}",
                logical, e
            ))),
        }
    }

    #[instrument(skip(self), fields(backend = self.label))]
    async fn purge_by_prefix(&self, prefix: &str) -> Result<u64> {
        let objects = self.list(prefix).await?;
        let mut removed = 0u64;
        for object in &objects {
            self.delete(&object.path).await?;
            removed += 1;
        }
        debug!(prefix = %prefix, removed = removed, "Purged object store prefix");
        Ok(removed)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (logical, location) = self.location(path)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::backend(format!(
                "Failed to check {}: {}",
                logical, e
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let prefix = normalize_prefix(prefix)?;
        let root = self.listing_root(&prefix);

        let mut objects = Vec::new();
        let mut stream = self.store.list(root.as_ref());
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| StorageError::backend(format!("List failed: {}", e)))?
        {
            let logical = self.to_logical(&meta.location);
            if logical.starts_with(&prefix) {
                objects.push(ObjectInfo {
                    path: logical,
                    size: meta.size as u64,
                    created_at: meta.last_modified,
                });
            }
        }
        Ok(objects)
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_in_memory() {
        let cache = ObjectStoreCache::in_memory();
        let path = "dem/CRS84Quad/terrain/webp-256-alpha/2/1/3.webp";

        assert!(cache.try_get(path).await.unwrap().is_none());
        assert!(!cache.exists(path).await.unwrap());

        cache
            .put(path, Bytes::from_static(b"webp"), "image/webp")
            .await
            .unwrap();
        let entry = cache.try_get(path).await.unwrap().unwrap();
        assert_eq!(entry.bytes.as_ref(), b"webp");
        assert_eq!(entry.content_type, "image/webp");
        assert!(cache.exists(path).await.unwrap());

        cache.delete(path).await.unwrap();
        cache.delete(path).await.unwrap();
        assert!(!cache.exists(path).await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_is_transparent() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let cache = ObjectStoreCache::new(store.clone(), Some("/tiles/".to_string()), "memory");
        cache
            .put("dem/0/0/0.png", Bytes::from_static(b"a"), "image/png")
            .await
            .unwrap();

        assert!(store.head(&Path::from("tiles/dem/0/0/0.png")).await.is_ok());
        let listed = cache.list("dem/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "dem/0/0/0.png");
    }

    #[tokio::test]
    async fn test_purge_by_prefix() {
        let cache = ObjectStoreCache::in_memory();
        for path in ["dem/0/0/0.png", "dem/1/1/0.png", "dem2/0/0/0.png", "other/x.png"] {
            cache.put(path, Bytes::from_static(b"t"), "image/png").await.unwrap();
        }
        assert_eq!(cache.purge_by_prefix("dem/").await.unwrap(), 2);
        assert_eq!(cache.list("").await.unwrap().len(), 2);
        assert_eq!(cache.purge_by_prefix("dem").await.unwrap(), 1);
    }
}
