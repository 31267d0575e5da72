//! Vector tile encoder: feature rows per layer into one MVT body.

use geo::Geometry;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tile_common::{BoundingBox, FeatureRow, PropertyValue, VectorLayerSource};
use tracing::{debug, instrument};

use crate::error::{Result, VectorTileError};
use crate::geometry::{simplify_tolerance, TileTransform};
use crate::layer::LayerBuilder;
use crate::pbf::PbfWriter;

const TILE_LAYERS: u32 = 3;

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorTileConfig {
    /// Tile-local coordinate range, `0..extent` on both axes
    pub extent: u32,
    /// Clip margin around the tile, in extent units
    pub buffer: u32,
    /// Simplify lines and polygons with a zoom-dependent tolerance
    pub simplify: bool,
}

impl Default for VectorTileConfig {
    fn default() -> Self {
        Self {
            extent: 4096,
            buffer: 64,
            simplify: true,
        }
    }
}

impl VectorTileConfig {
    pub fn validate(&self) -> Result<()> {
        if self.extent == 0 {
            return Err(VectorTileError::Config("extent must be positive".to_string()));
        }
        if self.buffer >= self.extent {
            return Err(VectorTileError::Config(format!(
                "buffer {} must be smaller than extent {}",
                self.buffer, self.extent
            )));
        }
        Ok(())
    }
}

/// Rows returned for one requested layer.
#[derive(Debug, Clone)]
pub struct LayerFeatures {
    pub layer: VectorLayerSource,
    pub rows: Vec<FeatureRow>,
}

impl LayerFeatures {
    pub fn new(layer: VectorLayerSource, rows: Vec<FeatureRow>) -> Self {
        Self { layer, rows }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VectorTileEncoder {
    config: VectorTileConfig,
}

impl VectorTileEncoder {
    pub fn new(config: VectorTileConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &VectorTileConfig {
        &self.config
    }

    /// Area to query features for: the tile bounds plus the clip buffer.
    pub fn query_bounds(&self, tile_bounds: &BoundingBox) -> BoundingBox {
        TileTransform::new(*tile_bounds, self.config.extent).buffered_bounds(self.config.buffer)
    }

    /// Encode `layers` for the tile covering `tile_bounds` at `zoom`.
    ///
    /// Geometries must be in the same CRS as `tile_bounds`. Layers without
    /// surviving features are omitted; when none survive the result is an
    /// empty body.
    #[instrument(skip(self, layers), fields(zoom = zoom, layers = layers.len()))]
    pub fn encode(
        &self,
        layers: &[LayerFeatures],
        tile_bounds: &BoundingBox,
        zoom: u32,
    ) -> Result<Vec<u8>> {
        tile_bounds
            .validate()
            .map_err(|e| VectorTileError::InvalidInput(e.to_string()))?;
        if tile_bounds.width() <= 0.0 || tile_bounds.height() <= 0.0 {
            return Err(VectorTileError::InvalidInput("tile bounds have zero area".to_string()));
        }

        let transform = TileTransform::new(*tile_bounds, self.config.extent);
        let tolerance = self.config.simplify.then(|| simplify_tolerance(zoom));

        let mut tile = PbfWriter::new();
        let mut total = 0usize;
        for data in layers {
            let mut builder = LayerBuilder::new(&data.layer.name, self.config.extent);
            for row in &data.rows {
                let properties = select_properties(row, &data.layer.attributes);
                for geometry in split_collection(&row.geometry) {
                    if let Some(tile_geom) = transform.prepare(geometry, self.config.buffer, tolerance) {
                        builder.add_feature(row.id, &tile_geom, &properties);
                    }
                }
            }

            if builder.is_empty() {
                continue;
            }
            total += builder.feature_count();
            tile.write_bytes_field(TILE_LAYERS, &builder.build());
        }

        counter!("vector_features_encoded_total").increment(total as u64);
        debug!(features = total, "Encoded vector tile");
        Ok(tile.into_bytes())
    }
}

/// Properties carried into the tile: all of them, or only `attributes` when
/// that list is non-empty.
fn select_properties<'a>(row: &'a FeatureRow, attributes: &[String]) -> Vec<(&'a str, &'a PropertyValue)> {
    row.properties
        .iter()
        .filter(|(key, _)| attributes.is_empty() || attributes.iter().any(|a| a == key))
        .map(|(key, value)| (key.as_str(), value))
        .collect()
}

/// Mixed collections become one feature per member, other geometries are
/// passed through.
fn split_collection(geometry: &Geometry<f64>) -> Vec<&Geometry<f64>> {
    match geometry {
        Geometry::GeometryCollection(gc) => gc.iter().flat_map(split_collection).collect(),
        other => vec![other],
    }
}
