//! Per-dataset cache statistics.
//!
//! Hit and miss counters are atomics so the hot read path never takes a
//! write lock. Size and tile totals are not counted here; they come from the
//! access index, which already tracks every stored object.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::access::Usage;

/// Snapshot of one dataset's cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub dataset_id: String,
    pub hits: u64,
    pub misses: u64,
    pub total_size_bytes: u64,
    pub total_tiles: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl CacheStatistics {
    /// Fraction of reads served from cache, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct DatasetCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    /// Unix millis, 0 when never accessed.
    last_accessed_ms: AtomicI64,
}

impl DatasetCounters {
    fn touch(&self, now: DateTime<Utc>) {
        self.last_accessed_ms
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn last_accessed(&self) -> Option<DateTime<Utc>> {
        match self.last_accessed_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

/// Hit/miss counters keyed by dataset id.
#[derive(Default)]
pub struct StatisticsRegistry {
    datasets: RwLock<HashMap<String, Arc<DatasetCounters>>>,
}

impl StatisticsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn counters(&self, dataset_id: &str) -> Arc<DatasetCounters> {
        if let Some(counters) = self.datasets.read().await.get(dataset_id) {
            return counters.clone();
        }
        self.datasets
            .write()
            .await
            .entry(dataset_id.to_string())
            .or_default()
            .clone()
    }

    pub async fn record_hit(&self, dataset_id: &str) {
        let counters = self.counters(dataset_id).await;
        counters.hits.fetch_add(1, Ordering::Relaxed);
        counters.touch(Utc::now());
    }

    pub async fn record_miss(&self, dataset_id: &str) {
        let counters = self.counters(dataset_id).await;
        counters.misses.fetch_add(1, Ordering::Relaxed);
        counters.touch(Utc::now());
    }

    /// Combine the counters with the dataset's current usage.
    pub async fn snapshot(&self, dataset_id: &str, usage: Usage) -> CacheStatistics {
        let guard = self.datasets.read().await;
        let (hits, misses, last_accessed_at) = match guard.get(dataset_id) {
            Some(c) => (
                c.hits.load(Ordering::Relaxed),
                c.misses.load(Ordering::Relaxed),
                c.last_accessed(),
            ),
            None => (0, 0, None),
        };
        CacheStatistics {
            dataset_id: dataset_id.to_string(),
            hits,
            misses,
            total_size_bytes: usage.size_bytes,
            total_tiles: usage.tile_count,
            last_accessed_at,
        }
    }

    /// Datasets that have seen at least one read.
    pub async fn dataset_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.datasets.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Zero the hit/miss counters and forget the last access time.
    pub async fn reset(&self, dataset_id: &str) {
        self.datasets.write().await.remove(dataset_id);
    }
}
