//! Caches shared by the source readers.

mod chunk_cache;

pub use chunk_cache::{hash_path, BlockCache, BlockKey, CacheStats};
