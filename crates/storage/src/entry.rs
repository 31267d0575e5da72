//! Stored tile records.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tile_common::TileFormat;

/// A tile as returned by a cache backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTileEntry {
    pub bytes: Bytes,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// Listing record for a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Logical path, always `/`-separated.
    pub path: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Content type implied by a path's extension.
pub fn content_type_for_path(path: &str) -> String {
    TileFormat::from_extension(path)
        .map(|f| f.content_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
