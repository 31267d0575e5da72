//! Byte-range access to source files.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{path::Path as ObjectPath, ObjectStore};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

use crate::error::{Result, SourceError};

/// Random access to a source's bytes without reading the whole object.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, length: usize) -> Result<Bytes>;

    /// Total size in bytes.
    async fn size(&self) -> Result<u64>;

    /// Stable identifier used in cache keys and logs.
    fn identifier(&self) -> &str;
}

/// Local file reader.
pub struct FileRangeReader {
    path: PathBuf,
    id: String,
}

impl FileRangeReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = format!("file://{}", path.display());
        Self { path, id }
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_range(&self, offset: u64, length: usize) -> Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            SourceError::unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf).await.map_err(|e| {
            SourceError::decode(format!(
                "{}: short read of {} bytes at offset {}: {}",
                self.path.display(),
                length,
                offset,
                e
            ))
        })?;
        trace!(path = %self.path.display(), offset, length, "Read byte range");
        Ok(Bytes::from(buf))
    }

    async fn size(&self) -> Result<u64> {
        let meta = tokio::fs::metadata(&self.path).await.map_err(|e| {
            SourceError::unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(meta.len())
    }

    fn identifier(&self) -> &str {
        &self.id
    }
}

/// Object storage reader using ranged GETs.
pub struct ObjectRangeReader {
    store: Arc<dyn ObjectStore>,
    location: ObjectPath,
    id: String,
}

impl ObjectRangeReader {
    pub fn new(store: Arc<dyn ObjectStore>, key: &str) -> Self {
        let location = ObjectPath::from(key);
        let id = format!("object://{}", location);
        Self {
            store,
            location,
            id,
        }
    }
}

#[async_trait]
impl RangeReader for ObjectRangeReader {
    async fn read_range(&self, offset: u64, length: usize) -> Result<Bytes> {
        let start = offset as usize;
        let bytes = self
            .store
            .get_range(&self.location, start..start + length)
            .await?;
        if bytes.len() != length {
            return Err(SourceError::decode(format!(
                "{}: expected {} bytes at offset {}, got {}",
                self.location,
                length,
                offset,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    async fn size(&self) -> Result<u64> {
        let meta = self.store.head(&self.location).await?;
        Ok(meta.size as u64)
    }

    fn identifier(&self) -> &str {
        &self.id
    }
}
