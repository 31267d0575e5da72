//! Common types shared across the geotile crates.
//!
//! Everything here is plain data or pure functions: the two supported tile
//! matrix sets, the cache key model that addresses every rendered tile
//! variant, dataset and style records, and the error kinds surfaced to
//! callers of the tile service.

pub mod bbox;
pub mod cache_key;
pub mod crs;
pub mod dataset;
pub mod error;
pub mod feature;
pub mod format;
pub mod provider;
pub mod style;
pub mod tile;

pub use bbox::BoundingBox;
pub use cache_key::TileCacheKey;
pub use crs::CrsCode;
pub use dataset::{RasterDataset, ResamplingMethod, SourceKind, VectorLayerSource};
pub use error::{TileError, TileResult};
pub use feature::{FeatureRow, PropertyValue};
pub use format::TileFormat;
pub use provider::{FeatureQuery, MetadataProvider};
pub use style::{ClassBreak, Color, ColorStop, HillshadeParams, StyleDefinition, StyleKind};
pub use tile::{TileCoordinate, TileMatrixSetId, TileRange};
