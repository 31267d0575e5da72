//! Access index: what each dataset has stored, and how it has been used.
//!
//! The index is the quota machinery's view of the cache. It is kept current
//! by the tile cache on every read and write, and rebuilt from a backend
//! listing the first time a dataset is inspected after startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::CacheStorage;
use crate::entry::ObjectInfo;
use crate::error::Result;
use crate::quota::EvictionPolicy;

/// Stored size and tile count of one dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub size_bytes: u64,
    pub tile_count: u64,
}

/// Bookkeeping for one stored tile.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
}

#[derive(Default)]
struct DatasetIndex {
    entries: HashMap<String, AccessRecord>,
    size_bytes: u64,
    seeded: bool,
}

impl DatasetIndex {
    fn usage(&self) -> Usage {
        Usage {
            size_bytes: self.size_bytes,
            tile_count: self.entries.len() as u64,
        }
    }

    fn insert(&mut self, path: String, record: AccessRecord) {
        self.size_bytes += record.size;
        if let Some(old) = self.entries.insert(path, record) {
            self.size_bytes = self.size_bytes.saturating_sub(old.size);
        }
    }
}

/// Per-dataset map of stored paths to their access records.
#[derive(Default)]
pub struct AccessIndex {
    datasets: RwLock<HashMap<String, DatasetIndex>>,
}

impl AccessIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tile was written. Rewrites keep their creation time and access
    /// history, so FIFO order follows when a path was first cached.
    pub async fn record_write(&self, dataset_id: &str, path: &str, size: u64) {
        let now = Utc::now();
        let mut guard = self.datasets.write().await;
        let index = guard.entry(dataset_id.to_string()).or_default();
        let record = match index.entries.get(path) {
            Some(existing) => AccessRecord {
                size,
                created_at: existing.created_at,
                last_access: existing.last_access,
                access_count: existing.access_count,
            },
            None => AccessRecord {
                size,
                created_at: now,
                last_access: now,
                access_count: 0,
            },
        };
        index.insert(path.to_string(), record);
    }

    /// A tile was served from cache.
    pub async fn record_access(&self, dataset_id: &str, path: &str, size: u64) {
        let now = Utc::now();
        let mut guard = self.datasets.write().await;
        let index = guard.entry(dataset_id.to_string()).or_default();
        match index.entries.get_mut(path) {
            Some(record) => {
                record.last_access = now;
                record.access_count += 1;
            }
            None => index.insert(
                path.to_string(),
                AccessRecord {
                    size,
                    created_at: now,
                    last_access: now,
                    access_count: 1,
                },
            ),
        }
    }

    pub async fn remove(&self, dataset_id: &str, path: &str) -> Option<AccessRecord> {
        let mut guard = self.datasets.write().await;
        let index = guard.get_mut(dataset_id)?;
        let record = index.entries.remove(path)?;
        index.size_bytes = index.size_bytes.saturating_sub(record.size);
        Some(record)
    }

    /// Forget every record of a dataset. The dataset stays seeded since an
    /// emptied cache tree has nothing left to discover.
    pub async fn clear(&self, dataset_id: &str) {
        let mut guard = self.datasets.write().await;
        guard.insert(
            dataset_id.to_string(),
            DatasetIndex {
                seeded: true,
                ..Default::default()
            },
        );
    }

    pub async fn usage(&self, dataset_id: &str) -> Usage {
        self.datasets
            .read()
            .await
            .get(dataset_id)
            .map(DatasetIndex::usage)
            .unwrap_or_default()
    }

    /// Usage the dataset would have after writing `size` bytes at `path`.
    pub async fn projected_usage(&self, dataset_id: &str, path: &str, size: u64) -> Usage {
        let guard = self.datasets.read().await;
        let Some(index) = guard.get(dataset_id) else {
            return Usage {
                size_bytes: size,
                tile_count: 1,
            };
        };
        let mut usage = index.usage();
        match index.entries.get(path) {
            Some(existing) => {
                usage.size_bytes = usage.size_bytes.saturating_sub(existing.size) + size;
            }
            None => {
                usage.size_bytes += size;
                usage.tile_count += 1;
            }
        }
        usage
    }

    pub async fn contains(&self, dataset_id: &str, path: &str) -> bool {
        self.datasets
            .read()
            .await
            .get(dataset_id)
            .map(|index| index.entries.contains_key(path))
            .unwrap_or(false)
    }

    /// Merge a backend listing into the index. Known paths keep their
    /// records; new ones start with their creation time as last access.
    pub async fn seed(&self, dataset_id: &str, objects: Vec<ObjectInfo>) {
        let mut guard = self.datasets.write().await;
        let index = guard.entry(dataset_id.to_string()).or_default();
        for object in objects {
            if index.entries.contains_key(&object.path) {
                continue;
            }
            index.insert(
                object.path,
                AccessRecord {
                    size: object.size,
                    created_at: object.created_at,
                    last_access: object.created_at,
                    access_count: 0,
                },
            );
        }
        index.seeded = true;
    }

    /// Rebuild a dataset's records from `storage` unless already done.
    pub async fn ensure_seeded(
        &self,
        dataset_id: &str,
        prefix: &str,
        storage: &dyn CacheStorage,
    ) -> Result<()> {
        let seeded = self
            .datasets
            .read()
            .await
            .get(dataset_id)
            .map(|index| index.seeded)
            .unwrap_or(false);
        if seeded {
            return Ok(());
        }

        let objects = storage.list(prefix).await?;
        debug!(
            dataset = %dataset_id,
            objects = objects.len(),
            "Seeding access index from backend listing"
        );
        self.seed(dataset_id, objects).await;
        Ok(())
    }

    /// Stored paths ordered by eviction preference, first victim first.
    pub async fn victims(&self, dataset_id: &str, policy: EvictionPolicy) -> Vec<(String, AccessRecord)> {
        let guard = self.datasets.read().await;
        let Some(index) = guard.get(dataset_id) else {
            return Vec::new();
        };
        let mut victims: Vec<(String, AccessRecord)> = index
            .entries
            .iter()
            .map(|(path, record)| (path.clone(), record.clone()))
            .collect();

        match policy {
            EvictionPolicy::Lru => victims.sort_by(|a, b| {
                a.1.last_access
                    .cmp(&b.1.last_access)
                    .then(a.1.created_at.cmp(&b.1.created_at))
                    .then(a.0.cmp(&b.0))
            }),
            EvictionPolicy::Lfu => victims.sort_by(|a, b| {
                a.1.access_count
                    .cmp(&b.1.access_count)
                    .then(a.1.last_access.cmp(&b.1.last_access))
                    .then(a.0.cmp(&b.0))
            }),
            EvictionPolicy::Fifo => victims.sort_by(|a, b| {
                a.1.created_at
                    .cmp(&b.1.created_at)
                    .then(a.0.cmp(&b.0))
            }),
        }
        victims
    }
}
