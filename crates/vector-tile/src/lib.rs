//! Mapbox vector tile (MVT 2.1) encoding.
//!
//! Feature rows are clipped to the buffered tile, moved into the tile's
//! integer coordinate space, simplified by zoom, and written as protobuf
//! with one layer per requested source.

pub mod decode;
pub mod encoder;
pub mod error;
pub mod geometry;
pub mod layer;
pub mod pbf;

pub use decode::{decode_tile, DecodedFeature, DecodedLayer, DecodedTile};
pub use encoder::{LayerFeatures, VectorTileConfig, VectorTileEncoder};
pub use error::{Result, VectorTileError};
pub use geometry::GeomType;
