//! The window-read interface and the dispatcher over source kinds.

use async_trait::async_trait;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tile_common::{RasterDataset, SourceKind};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::cache::{BlockCache, CacheStats};
use crate::cog::CogReader;
use crate::config::SourceConfig;
use crate::error::{Result, SourceError};
use crate::store::SourceStore;
use crate::types::{SampleGrid, WindowRequest};
use crate::zarr::ZarrReader;

/// Reads a georeferenced window from a raster source.
///
/// Implementations return NaN for nodata and for any part of the window
/// outside the source's coverage, and check `cancel` between fetches.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read_window(
        &self,
        dataset: &RasterDataset,
        request: &WindowRequest,
        cancel: &CancellationToken,
    ) -> Result<SampleGrid>;
}

/// Picks the reader for a dataset's source kind and bounds every read by
/// the configured timeout and the caller's cancellation token.
pub struct SourceReaders {
    cog: Arc<dyn SourceReader>,
    zarr: Arc<dyn SourceReader>,
    blocks: Arc<RwLock<BlockCache>>,
    timeout: Duration,
}

impl SourceReaders {
    /// Build both readers over one store, sharing a block cache.
    pub fn new(store: SourceStore, config: &SourceConfig) -> Self {
        let blocks = Arc::new(RwLock::new(BlockCache::new(config.chunk_cache_bytes())));
        Self {
            cog: Arc::new(CogReader::new(
                store.clone(),
                config.header_cache_entries,
                blocks.clone(),
            )),
            zarr: Arc::new(ZarrReader::new(store, config.header_cache_entries, blocks.clone())),
            blocks,
            timeout: config.read_timeout(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.store.build()?, config))
    }

    /// Replace the reader used for one source kind.
    pub fn with_reader(mut self, kind: SourceKind, reader: Arc<dyn SourceReader>) -> Self {
        match kind {
            SourceKind::TiledOverview => self.cog = reader,
            SourceKind::ChunkedArray => self.zarr = reader,
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.blocks.read().await.stats()
    }

    /// Drop all decoded blocks. Returns (entries cleared, bytes freed).
    pub async fn clear_cache(&self) -> (usize, u64) {
        let mut cache = self.blocks.write().await;
        let stats = cache.stats();
        cache.clear();
        (stats.entries, stats.memory_bytes)
    }
}

#[async_trait]
impl SourceReader for SourceReaders {
    #[instrument(skip(self, dataset, request, cancel), fields(dataset = %dataset.id, kind = ?dataset.source_kind))]
    async fn read_window(
        &self,
        dataset: &RasterDataset,
        request: &WindowRequest,
        cancel: &CancellationToken,
    ) -> Result<SampleGrid> {
        let reader = match dataset.source_kind {
            SourceKind::TiledOverview => &self.cog,
            SourceKind::ChunkedArray => &self.zarr,
        };
        let kind = match dataset.source_kind {
            SourceKind::TiledOverview => "cog",
            SourceKind::ChunkedArray => "zarr",
        };

        let start = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SourceError::Cancelled),
            r = tokio::time::timeout(self.timeout, reader.read_window(dataset, request, cancel)) => {
                r.unwrap_or(Err(SourceError::Timeout))
            }
        };
        histogram!("source_read_duration_seconds", "kind" => kind)
            .record(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            counter!("source_read_errors_total", "kind" => kind).increment(1);
            if !matches!(e, SourceError::Cancelled) {
                warn!(error = %e, locator = %dataset.locator, "Source read failed");
            }
        }
        result
    }
}
