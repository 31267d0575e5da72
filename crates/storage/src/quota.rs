//! Per-dataset storage quotas and eviction.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tile_common::{TileCacheKey, TileError};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::access::{AccessIndex, Usage};
use crate::backend::CacheStorage;
use crate::error::Result;

/// Which tile goes first when a dataset is over its quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Oldest last access.
    #[default]
    #[serde(rename = "LRU", alias = "lru")]
    Lru,
    /// Fewest accesses.
    #[serde(rename = "LFU", alias = "lfu")]
    Lfu,
    /// Oldest creation time.
    #[serde(rename = "FIFO", alias = "fifo")]
    Fifo,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Fifo => "FIFO",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = TileError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            _ => Err(TileError::invalid_parameter(
                "evictionPolicy",
                format!("unknown eviction policy '{}'", s),
            )),
        }
    }
}

/// Storage budget for one dataset. An unset limit is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheQuota {
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
    #[serde(default)]
    pub max_tiles: Option<u64>,
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,
}

impl CacheQuota {
    pub fn new(max_size_bytes: Option<u64>, max_tiles: Option<u64>, policy: EvictionPolicy) -> Self {
        Self {
            max_size_bytes,
            max_tiles,
            eviction_policy: policy,
        }
    }

    /// Whether `usage` is within both limits.
    pub fn allows(&self, usage: &Usage) -> bool {
        self.max_size_bytes.map_or(true, |max| usage.size_bytes <= max)
            && self.max_tiles.map_or(true, |max| usage.tile_count <= max)
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_size_bytes.is_none() && self.max_tiles.is_none()
    }
}

/// When quotas are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaMode {
    /// Make room before each cache write.
    Automatic,
    /// Only through an explicit enforcement call.
    #[default]
    Explicit,
}

impl FromStr for QuotaMode {
    type Err = TileError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(QuotaMode::Automatic),
            "explicit" | "manual" => Ok(QuotaMode::Explicit),
            _ => Err(TileError::ConfigurationError(format!(
                "unknown quota mode '{}'",
                s
            ))),
        }
    }
}

/// Outcome of one enforcement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnforcementReport {
    pub dataset_id: String,
    pub policy: EvictionPolicy,
    pub before: Usage,
    pub after: Usage,
    /// Storage paths removed, in eviction order.
    pub removed: Vec<String>,
}

/// Tracks quotas and evicts tiles to keep datasets within them.
pub struct QuotaEnforcer {
    storage: Arc<dyn CacheStorage>,
    index: Arc<AccessIndex>,
    quotas: RwLock<HashMap<String, CacheQuota>>,
    default_quota: Option<CacheQuota>,
    mode: QuotaMode,
}

impl QuotaEnforcer {
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        index: Arc<AccessIndex>,
        mode: QuotaMode,
        default_quota: Option<CacheQuota>,
    ) -> Self {
        Self {
            storage,
            index,
            quotas: RwLock::new(HashMap::new()),
            default_quota,
            mode,
        }
    }

    pub fn mode(&self) -> QuotaMode {
        self.mode
    }

    /// Effective quota for a dataset, falling back to the default.
    pub async fn quota(&self, dataset_id: &str) -> Option<CacheQuota> {
        self.quotas
            .read()
            .await
            .get(dataset_id)
            .copied()
            .or(self.default_quota)
    }

    pub async fn set_quota(&self, dataset_id: &str, quota: CacheQuota) {
        info!(
            dataset = %dataset_id,
            max_size_bytes = ?quota.max_size_bytes,
            max_tiles = ?quota.max_tiles,
            policy = %quota.eviction_policy,
            "Quota updated"
        );
        self.quotas
            .write()
            .await
            .insert(dataset_id.to_string(), quota);
    }

    pub async fn usage(&self, dataset_id: &str) -> Result<Usage> {
        self.ensure_seeded(dataset_id).await?;
        Ok(self.index.usage(dataset_id).await)
    }

    async fn ensure_seeded(&self, dataset_id: &str) -> Result<()> {
        let prefix = TileCacheKey::dataset_prefix(dataset_id);
        self.index
            .ensure_seeded(dataset_id, &prefix, self.storage.as_ref())
            .await
    }

    /// Evict until the dataset is within its quota.
    #[instrument(skip(self), fields(dataset = %dataset_id))]
    pub async fn enforce(&self, dataset_id: &str) -> Result<EnforcementReport> {
        let quota = self.quota(dataset_id).await.unwrap_or_default();
        self.evict_until(dataset_id, quota, None).await
    }

    /// Evict so that a write of `incoming` bytes at `path` fits the quota.
    ///
    /// Returns `None` when no quota applies to the dataset.
    pub async fn make_room(
        &self,
        dataset_id: &str,
        path: &str,
        incoming: u64,
    ) -> Result<Option<EnforcementReport>> {
        let Some(quota) = self.quota(dataset_id).await else {
            return Ok(None);
        };
        if quota.is_unlimited() {
            return Ok(None);
        }
        let report = self
            .evict_until(dataset_id, quota, Some((path, incoming)))
            .await?;
        Ok(Some(report))
    }

    /// Whether writing `incoming` bytes at `path` keeps the dataset within quota.
    ///
    /// Tiles already in the backend count even if this process has not
    /// touched the dataset yet.
    pub async fn fits(&self, dataset_id: &str, path: &str, incoming: u64) -> Result<bool> {
        let Some(quota) = self.quota(dataset_id).await else {
            return Ok(true);
        };
        self.ensure_seeded(dataset_id).await?;
        Ok(self.within(dataset_id, &quota, Some((path, incoming))).await)
    }

    async fn within(&self, dataset_id: &str, quota: &CacheQuota, incoming: Option<(&str, u64)>) -> bool {
        let usage = match incoming {
            Some((path, size)) => self.index.projected_usage(dataset_id, path, size).await,
            None => self.index.usage(dataset_id).await,
        };
        quota.allows(&usage)
    }

    async fn evict_until(
        &self,
        dataset_id: &str,
        quota: CacheQuota,
        incoming: Option<(&str, u64)>,
    ) -> Result<EnforcementReport> {
        self.ensure_seeded(dataset_id).await?;
        let before = self.index.usage(dataset_id).await;
        let mut report = EnforcementReport {
            dataset_id: dataset_id.to_string(),
            policy: quota.eviction_policy,
            before,
            after: before,
            removed: Vec::new(),
        };
        if self.within(dataset_id, &quota, incoming).await {
            return Ok(report);
        }

        // The tile being rewritten is never its own victim.
        let keep = incoming.map(|(path, _)| path);
        let victims = self.index.victims(dataset_id, quota.eviction_policy).await;
        for (path, record) in victims {
            if keep == Some(path.as_str()) {
                continue;
            }
            if let Err(e) = self.storage.delete(&path).await {
                warn!(path = %path, error = %e, "Failed to evict tile");
                continue;
            }
            self.index.remove(dataset_id, &path).await;
            debug!(path = %path, size = record.size, "Evicted tile");
            report.removed.push(path);
            if self.within(dataset_id, &quota, incoming).await {
                break;
            }
        }

        counter!("tile_cache_evictions_total", "dataset" => dataset_id.to_string())
            .increment(report.removed.len() as u64);
        report.after = self.index.usage(dataset_id).await;
        info!(
            dataset = %dataset_id,
            policy = %quota.eviction_policy,
            removed = report.removed.len(),
            size_before = before.size_bytes,
            size_after = report.after.size_bytes,
            tiles_before = before.tile_count,
            tiles_after = report.after.tile_count,
            "Quota enforced"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectStoreCache;
    use bytes::Bytes;

    async fn populated(count: usize) -> (Arc<dyn CacheStorage>, Arc<AccessIndex>) {
        let storage: Arc<dyn CacheStorage> = Arc::new(ObjectStoreCache::in_memory());
        let index = Arc::new(AccessIndex::new());
        for i in 0..count {
            let path = format!("dem/WebMercatorQuad/default/png-256-alpha/3/{}/0.png", i);
            storage
                .put(&path, Bytes::from(vec![0u8; 100]), "image/png")
                .await
                .unwrap();
            index.record_write("dem", &path, 100).await;
        }
        index.seed("dem", Vec::new()).await;
        (storage, index)
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("lru".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Lru);
        assert_eq!("FIFO".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert!("random".parse::<EvictionPolicy>().is_err());
        assert_eq!(
            serde_json::to_string(&EvictionPolicy::Lfu).unwrap(),
            "\"LFU\""
        );
    }

    #[test]
    fn test_quota_allows() {
        let quota = CacheQuota::new(Some(1000), Some(5), EvictionPolicy::Lru);
        assert!(quota.allows(&Usage {
            size_bytes: 1000,
            tile_count: 5
        }));
        assert!(!quota.allows(&Usage {
            size_bytes: 1001,
            tile_count: 1
        }));
        assert!(!quota.allows(&Usage {
            size_bytes: 0,
            tile_count: 6
        }));
        assert!(CacheQuota::default().allows(&Usage {
            size_bytes: u64::MAX,
            tile_count: u64::MAX
        }));
    }

    #[tokio::test]
    async fn test_enforce_tile_limit() {
        let (storage, index) = populated(10).await;
        let enforcer = QuotaEnforcer::new(storage.clone(), index, QuotaMode::Explicit, None);
        enforcer
            .set_quota("dem", CacheQuota::new(None, Some(7), EvictionPolicy::Fifo))
            .await;

        let report = enforcer.enforce("dem").await.unwrap();
        assert_eq!(report.before.tile_count, 10);
        assert_eq!(report.removed.len(), 3);
        assert_eq!(report.after.tile_count, 7);
        for path in &report.removed {
            assert!(!storage.exists(path).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_enforce_without_quota_is_noop() {
        let (storage, index) = populated(3).await;
        let enforcer = QuotaEnforcer::new(storage, index, QuotaMode::Explicit, None);
        let report = enforcer.enforce("dem").await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.before, report.after);
    }

    #[tokio::test]
    async fn test_make_room_reserves_space() {
        let (storage, index) = populated(4).await;
        let enforcer = QuotaEnforcer::new(
            storage,
            index,
            QuotaMode::Automatic,
            Some(CacheQuota::new(Some(400), None, EvictionPolicy::Lru)),
        );
        let path = "dem/WebMercatorQuad/default/png-256-alpha/3/9/0.png";
        assert!(!enforcer.fits("dem", path, 150).await.unwrap());

        let report = enforcer.make_room("dem", path, 150).await.unwrap().unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(enforcer.fits("dem", path, 150).await.unwrap());
    }

    #[tokio::test]
    async fn test_seeds_from_listing() {
        let storage: Arc<dyn CacheStorage> = Arc::new(ObjectStoreCache::in_memory());
        for i in 0..5 {
            storage
                .put(&format!("dem/t/s/png-256-alpha/0/0/{}.png", i), Bytes::from_static(b"abcd"), "image/png")
                .await
                .unwrap();
        }
        let enforcer = QuotaEnforcer::new(
            storage,
            Arc::new(AccessIndex::new()),
            QuotaMode::Explicit,
            None,
        );
        let usage = enforcer.usage("dem").await.unwrap();
        assert_eq!(usage.tile_count, 5);
        assert_eq!(usage.size_bytes, 20);
    }

    #[tokio::test]
    async fn test_fits_counts_unseen_tiles() {
        let storage: Arc<dyn CacheStorage> = Arc::new(ObjectStoreCache::in_memory());
        for i in 0..3 {
            storage
                .put(&format!("dem/t/s/png-256-alpha/0/0/{}.png", i), Bytes::from_static(b"abcd"), "image/png")
                .await
                .unwrap();
        }
        let enforcer = QuotaEnforcer::new(
            storage,
            Arc::new(AccessIndex::new()),
            QuotaMode::Automatic,
            Some(CacheQuota::new(None, Some(3), EvictionPolicy::Fifo)),
        );
        assert!(!enforcer.fits("dem", "dem/t/s/png-256-alpha/0/0/9.png", 4).await.unwrap());
        assert!(enforcer.fits("dem", "dem/t/s/png-256-alpha/0/0/1.png", 4).await.unwrap());
    }
}
