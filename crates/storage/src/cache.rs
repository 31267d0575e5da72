//! Tile cache: a storage backend plus statistics and quota bookkeeping.

use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use tile_common::TileCacheKey;
use tracing::{debug, instrument, warn};

use crate::access::{AccessIndex, Usage};
use crate::backend::CacheStorage;
use crate::entry::CachedTileEntry;
use crate::error::Result;
use crate::quota::{CacheQuota, EnforcementReport, QuotaEnforcer, QuotaMode};
use crate::stats::{CacheStatistics, StatisticsRegistry};

/// What happened to a tile handed to [`TileCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The tile did not fit the dataset's quota even after eviction.
    SkippedOverQuota,
}

/// Cache front used by on-demand requests and preseed jobs.
///
/// Every read and write goes through here so the statistics and the access
/// index stay consistent with what the backend holds.
pub struct TileCache {
    storage: Arc<dyn CacheStorage>,
    index: Arc<AccessIndex>,
    stats: StatisticsRegistry,
    quota: QuotaEnforcer,
}

impl TileCache {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        mode: QuotaMode,
        default_quota: Option<CacheQuota>,
    ) -> Self {
        let index = Arc::new(AccessIndex::new());
        let quota = QuotaEnforcer::new(storage.clone(), index.clone(), mode, default_quota);
        Self {
            storage,
            index,
            stats: StatisticsRegistry::new(),
            quota,
        }
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub fn quota(&self) -> &QuotaEnforcer {
        &self.quota
    }

    /// Look a tile up, counting a hit or a miss.
    #[instrument(skip(self), fields(dataset = %key.dataset_id))]
    pub async fn get(&self, key: &TileCacheKey) -> Result<Option<CachedTileEntry>> {
        let path = key.storage_path();
        let entry = self.storage.try_get(&path).await?;

        match &entry {
            Some(entry) => {
                self.stats.record_hit(&key.dataset_id).await;
                self.index
                    .record_access(&key.dataset_id, &path, entry.bytes.len() as u64)
                    .await;
                counter!("tile_cache_hits_total", "dataset" => key.dataset_id.clone()).increment(1);
                debug!(path = %path, "Cache hit");
            }
            None => {
                self.stats.record_miss(&key.dataset_id).await;
                counter!("tile_cache_misses_total", "dataset" => key.dataset_id.clone())
                    .increment(1);
                debug!(path = %path, "Cache miss");
            }
        }
        Ok(entry)
    }

    /// Whether the tile is stored. Does not count as an access.
    pub async fn contains(&self, key: &TileCacheKey) -> Result<bool> {
        self.storage.exists(&key.storage_path()).await
    }

    /// Store a rendered tile.
    ///
    /// In automatic quota mode a write that would exceed the dataset's quota
    /// first evicts other tiles; if it still does not fit, the tile is not
    /// cached and `SkippedOverQuota` is returned.
    #[instrument(skip(self, bytes), fields(dataset = %key.dataset_id, size = bytes.len()))]
    pub async fn put(&self, key: &TileCacheKey, bytes: Bytes) -> Result<PutOutcome> {
        let path = key.storage_path();
        let size = bytes.len() as u64;
        let dataset_id = key.dataset_id.as_str();

        if self.quota.mode() == QuotaMode::Automatic
            && !self.quota.fits(dataset_id, &path, size).await?
        {
            self.quota.make_room(dataset_id, &path, size).await?;
            if !self.quota.fits(dataset_id, &path, size).await? {
                warn!(
                    path = %path,
                    size = size,
                    "Tile does not fit dataset quota after eviction; not caching"
                );
                counter!("tile_cache_quota_skips_total", "dataset" => dataset_id.to_string())
                    .increment(1);
                return Ok(PutOutcome::SkippedOverQuota);
            }
        }

        self.storage
            .put(&path, bytes, key.format.content_type())
            .await?;
        self.index.record_write(dataset_id, &path, size).await;
        counter!("tile_cache_writes_total", "dataset" => dataset_id.to_string()).increment(1);
        Ok(PutOutcome::Stored)
    }

    pub async fn delete(&self, key: &TileCacheKey) -> Result<()> {
        let path = key.storage_path();
        self.storage.delete(&path).await?;
        self.index.remove(&key.dataset_id, &path).await;
        Ok(())
    }

    /// Remove a dataset's entire cache tree.
    #[instrument(skip(self))]
    pub async fn purge_dataset(&self, dataset_id: &str) -> Result<u64> {
        let removed = self
            .storage
            .purge_by_prefix(&TileCacheKey::dataset_prefix(dataset_id))
            .await?;
        self.index.clear(dataset_id).await;
        Ok(removed)
    }

    pub async fn usage(&self, dataset_id: &str) -> Result<Usage> {
        self.quota.usage(dataset_id).await
    }

    pub async fn statistics(&self, dataset_id: &str) -> Result<CacheStatistics> {
        let usage = self.quota.usage(dataset_id).await?;
        Ok(self.stats.snapshot(dataset_id, usage).await)
    }

    /// Statistics for every dataset that has been read from.
    pub async fn all_statistics(&self) -> Result<Vec<CacheStatistics>> {
        let mut all = Vec::new();
        for dataset_id in self.stats.dataset_ids().await {
            all.push(self.statistics(&dataset_id).await?);
        }
        Ok(all)
    }

    pub async fn reset_statistics(&self, dataset_id: &str) {
        self.stats.reset(dataset_id).await;
    }

    pub async fn enforce_quota(&self, dataset_id: &str) -> Result<EnforcementReport> {
        self.quota.enforce(dataset_id).await
    }
}
