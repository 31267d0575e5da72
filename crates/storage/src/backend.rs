//! The cache storage contract and the closed set of backends behind it.

use async_trait::async_trait;
use bytes::Bytes;

use crate::entry::{CachedTileEntry, ObjectInfo};
use crate::error::{Result, StorageError};
use crate::filesystem::FilesystemCache;
use crate::object_store::ObjectStoreCache;

/// Provider-agnostic blob store for rendered tiles.
///
/// Paths are logical and `/`-separated; every backend maps the same logical
/// path to the same object regardless of its own addressing rules.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Fetch a tile. A miss is `Ok(None)`; only transport failures are errors.
    async fn try_get(&self, path: &str) -> Result<Option<CachedTileEntry>>;

    /// Store a tile. Writing identical bytes twice leaves the same state.
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<()>;

    /// Remove a tile. Missing paths are not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Remove every tile whose path starts with `prefix`, returning the count.
    async fn purge_by_prefix(&self, prefix: &str) -> Result<u64>;

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.try_get(path).await?.is_some())
    }

    /// Every tile whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Backend selected once at startup.
pub enum CacheBackend {
    Filesystem(FilesystemCache),
    ObjectStore(ObjectStoreCache),
}

#[async_trait]
impl CacheStorage for CacheBackend {
    async fn try_get(&self, path: &str) -> Result<Option<CachedTileEntry>> {
        match self {
            CacheBackend::Filesystem(b) => b.try_get(path).await,
            CacheBackend::ObjectStore(b) => b.try_get(path).await,
        }
    }

    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        match self {
            CacheBackend::Filesystem(b) => b.put(path, bytes, content_type).await,
            CacheBackend::ObjectStore(b) => b.put(path, bytes, content_type).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self {
            CacheBackend::Filesystem(b) => b.delete(path).await,
            CacheBackend::ObjectStore(b) => b.delete(path).await,
        }
    }

    async fn purge_by_prefix(&self, prefix: &str) -> Result<u64> {
        match self {
            CacheBackend::Filesystem(b) => b.purge_by_prefix(prefix).await,
            CacheBackend::ObjectStore(b) => b.purge_by_prefix(prefix).await,
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self {
            CacheBackend::Filesystem(b) => b.exists(path).await,
            CacheBackend::ObjectStore(b) => b.exists(path).await,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        match self {
            CacheBackend::Filesystem(b) => b.list(prefix).await,
            CacheBackend::ObjectStore(b) => b.list(prefix).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CacheBackend::Filesystem(b) => b.name(),
            CacheBackend::ObjectStore(b) => b.name(),
        }
    }
}

/// Canonical form of a logical object path.
///
/// Leading, trailing and doubled separators are dropped. Backslashes, `.` and
/// `..` segments are rejected so a path can never escape its backend root.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.contains('\\') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return Err(StorageError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

/// Canonical form of a listing prefix. Unlike paths, an empty prefix is
/// allowed and a trailing separator is kept so `"dem/"` does not match
/// `"dem2/..."`.
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    if prefix.trim_matches('/').is_empty() {
        return Ok(String::new());
    }
    let mut normalized = normalize_path(prefix)?;
    if prefix.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a//b/c.png").unwrap(), "a/b/c.png");
        assert!(normalize_path("a/../b").is_err());
        assert!(normalize_path("a\\b").is_err());
        assert!(normalize_path("//").is_err());
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("dem/").unwrap(), "dem/");
        assert_eq!(normalize_prefix("/dem").unwrap(), "dem");
        assert_eq!(normalize_prefix("").unwrap(), "");
        assert!(normalize_prefix("../x/").is_err());
    }
}
