//! Resolution of dataset locators to byte-range readers and Zarr stores.

use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;
use zarrs::storage::ReadableStorageTraits;
use zarrs_filesystem::FilesystemStore;
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{AsyncToSyncBlockOn, AsyncToSyncStorageAdapter};

use crate::error::{Result, SourceError};
use crate::range::{FileRangeReader, ObjectRangeReader, RangeReader};

/// Blocking executor that works from within a tokio runtime.
///
/// `block_in_place` moves the current task off the async worker thread so
/// the runtime handle can drive the future without nesting runtimes.
#[derive(Clone, Copy)]
pub struct TokioBlockOn;

impl AsyncToSyncBlockOn for TokioBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
    }
}

/// Zarr storage usable by the synchronous `zarrs` API.
pub type ZarrStorage = Arc<dyn ReadableStorageTraits>;

/// Where source bytes live.
#[derive(Clone)]
pub enum SourceStore {
    Filesystem { root: PathBuf },
    ObjectStore { store: Arc<dyn ObjectStore> },
}

impl SourceStore {
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        SourceStore::Filesystem { root: root.into() }
    }

    pub fn object_store(store: Arc<dyn ObjectStore>) -> Self {
        SourceStore::ObjectStore { store }
    }

    fn local_path(root: &PathBuf, locator: &str) -> PathBuf {
        let path = PathBuf::from(locator);
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }

    fn object_key(locator: &str) -> Result<&str> {
        let key = locator.trim_matches('/');
        if key.is_empty() || key.split('/').any(|s| s == "..") {
            return Err(SourceError::invalid_request(format!(
                "invalid object locator '{}'",
                locator
            )));
        }
        Ok(key)
    }

    /// Byte-range reader for a single-file source (COG).
    pub fn range_reader(&self, locator: &str) -> Result<Arc<dyn RangeReader>> {
        match self {
            SourceStore::Filesystem { root } => {
                Ok(Arc::new(FileRangeReader::new(Self::local_path(root, locator))))
            }
            SourceStore::ObjectStore { store } => Ok(Arc::new(ObjectRangeReader::new(
                store.clone(),
                Self::object_key(locator)?,
            ))),
        }
    }

    /// Zarr storage rooted at the array, so the array path is always `/`.
    pub fn zarr_storage(&self, locator: &str) -> Result<ZarrStorage> {
        match self {
            SourceStore::Filesystem { root } => {
                let path = Self::local_path(root, locator);
                if !path.exists() {
                    return Err(SourceError::unavailable(format!(
                        "zarr store {} does not exist",
                        path.display()
                    )));
                }
                let store = FilesystemStore::new(&path).map_err(|e| {
                    SourceError::unavailable(format!("{}: {}", path.display(), e))
                })?;
                Ok(Arc::new(store))
            }
            SourceStore::ObjectStore { store } => {
                let prefixed = PrefixStore::new(store.clone(), Self::object_key(locator)?);
                let async_store = Arc::new(AsyncObjectStore::new(prefixed));
                Ok(Arc::new(AsyncToSyncStorageAdapter::new(async_store, TokioBlockOn)))
            }
        }
    }
}
