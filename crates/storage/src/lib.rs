//! Tile cache storage.
//!
//! Provides:
//! - The `CacheStorage` contract with filesystem and object-store backends
//! - Per-dataset hit/miss statistics
//! - Quota enforcement with LRU, LFU and FIFO eviction

pub mod access;
pub mod backend;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod filesystem;
pub mod object_store;
pub mod quota;
pub mod stats;

pub use access::{AccessIndex, AccessRecord, Usage};
pub use backend::{CacheBackend, CacheStorage};
pub use cache::{PutOutcome, TileCache};
pub use config::{AzureCacheConfig, CacheBackendConfig, S3CacheConfig};
pub use entry::{CachedTileEntry, ObjectInfo};
pub use error::{Result, StorageError};
pub use filesystem::FilesystemCache;
pub use self::object_store::ObjectStoreCache;
pub use quota::{CacheQuota, EnforcementReport, EvictionPolicy, QuotaEnforcer, QuotaMode};
pub use stats::{CacheStatistics, StatisticsRegistry};
