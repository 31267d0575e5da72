//! Local filesystem cache backend.
//!
//! Tiles live under a root directory at their logical path. Each tile has a
//! small JSON sidecar (`<file>.meta`) recording content type and creation
//! time. Writes go through a temporary file and a rename so readers never
//! observe a partially written tile.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::backend::{normalize_path, normalize_prefix, CacheStorage};
use crate::entry::{content_type_for_path, CachedTileEntry, ObjectInfo};
use crate::error::{Result, StorageError};

const META_SUFFIX: &str = ".meta";
const TMP_MARKER: &str = ".tmp-";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct SidecarMeta {
    content_type: String,
    created_at: DateTime<Utc>,
}

/// Filesystem-backed tile cache.
#[derive(Debug, Clone)]
pub struct FilesystemCache {
    root: PathBuf,
}

impl FilesystemCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| StorageError::io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let logical = normalize_path(path)?;
        let file = logical
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment));
        Ok((logical, file))
    }

    fn sidecar(file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_owned();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    fn temp_path(file: &Path) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = file.as_os_str().to_owned();
        name.push(format!("{}{}-{}", TMP_MARKER, std::process::id(), n));
        PathBuf::from(name)
    }

    async fn write_atomic(file: &Path, data: &[u8]) -> Result<()> {
        let tmp = Self::temp_path(file);
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| StorageError::io(tmp.display().to_string(), e))?;
        if let Err(e) = tokio::fs::rename(&tmp, file).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(file.display().to_string(), e));
        }
        Ok(())
    }

    async fn read_sidecar(file: &Path) -> Option<SidecarMeta> {
        let raw = tokio::fs::read(Self::sidecar(file)).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Ignoring unreadable tile sidecar");
                None
            }
        }
    }

    async fn remove_if_present(file: &Path) -> Result<()> {
        match tokio::fs::remove_file(file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(file.display().to_string(), e)),
        }
    }

    fn is_tile_file(name: &str) -> bool {
        !name.ends_with(META_SUFFIX) && !name.contains(TMP_MARKER)
    }

    fn walk(root: PathBuf, prefix: String) -> Result<Vec<ObjectInfo>> {
        // Only descend into the directory the prefix pins down.
        let start = match prefix.rfind('/') {
            Some(idx) => prefix[..idx]
                .split('/')
                .fold(root.clone(), |acc, segment| acc.join(segment)),
            None => root.clone(),
        };
        if !start.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&start).into_iter() {
            let entry = entry.map_err(|e| StorageError::Io {
                path: start.display().to_string(),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !Self::is_tile_file(&name) {
                continue;
            }
            let rel = match entry.path().strip_prefix(&root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let logical = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if !logical.starts_with(&prefix) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| StorageError::Io {
                path: entry.path().display().to_string(),
                message: e.to_string(),
            })?;
            let created_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            objects.push(ObjectInfo {
                path: logical,
                size: meta.len(),
                created_at,
            });
        }
        Ok(objects)
    }
}

#[async_trait]
impl CacheStorage for FilesystemCache {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn try_get(&self, path: &str) -> Result<Option<CachedTileEntry>> {
        let (logical, file) = self.resolve(path)?;
        let data = match tokio::fs::read(&file).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(logical, e)),
        };

        let (content_type, created_at) = match Self::read_sidecar(&file).await {
            Some(meta) => (meta.content_type, meta.created_at),
            None => {
                let modified = tokio::fs::metadata(&file)
                    .await
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                (content_type_for_path(&logical), modified)
            }
        };

        Ok(Some(CachedTileEntry {
            bytes: Bytes::from(data),
            content_type,
            created_at,
        }))
    }

    #[instrument(skip(self, bytes), fields(backend = "filesystem", size = bytes.len()))]
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        let (logical, file) = self.resolve(path)?;

        if let Ok(existing) = tokio::fs::read(&file).await {
            if existing == bytes.as_ref() {
                debug!(path = %logical, "Identical tile already stored");
                return Ok(());
            }
        }

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent.display().to_string(), e))?;
        }

        Self::write_atomic(&file, &bytes).await?;
        let meta = SidecarMeta {
            content_type: content_type.to_string(),
            created_at: Utc::now(),
        };
        Self::write_atomic(&Self::sidecar(&file), &serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (_, file) = self.resolve(path)?;
        Self::remove_if_present(&file).await?;
        Self::remove_if_present(&Self::sidecar(&file)).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn purge_by_prefix(&self, prefix: &str) -> Result<u64> {
        let objects = self.list(prefix).await?;
        let mut removed = 0u64;
        for object in &objects {
            self.delete(&object.path).await?;
            removed += 1;
        }
        debug!(prefix = %prefix, removed = removed, "Purged filesystem cache prefix");
        Ok(removed)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let (logical, file) = self.resolve(path)?;
        tokio::fs::try_exists(&file)
            .await
            .map_err(|e| StorageError::io(logical, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let prefix = normalize_prefix(prefix)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::walk(root, prefix))
            .await
            .map_err(|e| StorageError::backend(format!("listing task failed: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, FilesystemCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FilesystemCache::new(dir.path().join("tiles")).unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, cache) = cache();
        let path = "dem/WebMercatorQuad/terrain/png-256-alpha/1/0/1.png";

        assert!(cache.try_get(path).await.unwrap().is_none());
        cache
            .put(path, Bytes::from_static(b"tile"), "image/png")
            .await
            .unwrap();

        let entry = cache.try_get(path).await.unwrap().unwrap();
        assert_eq!(entry.bytes.as_ref(), b"tile");
        assert_eq!(entry.content_type, "image/png");
        assert!(cache.exists(path).await.unwrap());
    }

    #[tokio::test]
    async fn test_identical_put_is_noop() {
        let (_dir, cache) = cache();
        let path = "dem/a.png";
        cache.put(path, Bytes::from_static(b"x"), "image/png").await.unwrap();
        let first = cache.try_get(path).await.unwrap().unwrap();
        cache.put(path, Bytes::from_static(b"x"), "image/png").await.unwrap();
        let second = cache.try_get(path).await.unwrap().unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(cache.list("").await.unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exists_reports_io_errors() {
        let (_dir, cache) = cache();
        cache.put("dem/a.png", Bytes::from_static(b"x"), "image/png").await.unwrap();

        assert!(!cache.exists("dem/b.png").await.unwrap());
        // A file used as a directory is ENOTDIR, not a missing tile
        let err = cache.exists("dem/a.png/b.png").await.unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (_dir, cache) = cache();
        cache.delete("nope/missing.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_prefix_respects_segments() {
        let (_dir, cache) = cache();
        for path in ["dem/0/0/0.png", "dem/1/0/0.png", "dem2/0/0/0.png"] {
            cache.put(path, Bytes::from_static(b"t"), "image/png").await.unwrap();
        }

        let removed = cache.purge_by_prefix("dem/").await.unwrap();
        assert_eq!(removed, 2);
        let remaining = cache.list("").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, "dem2/0/0/0.png");
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let (_dir, cache) = cache();
        let err = cache
            .put("../outside.png", Bytes::from_static(b"t"), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }
}
