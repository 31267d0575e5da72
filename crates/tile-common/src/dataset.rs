//! Dataset records supplied by the metadata provider.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::bbox::BoundingBox;
use crate::crs::CrsCode;
use crate::error::TileError;

/// Physical layout of a raster source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Tiled GeoTIFF with internal overviews (COG)
    TiledOverview,
    /// Chunked N-dimensional array (Zarr)
    ChunkedArray,
}

/// Method used to resample source pixels into the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingMethod {
    #[default]
    Nearest,
    Bilinear,
    Average,
}

impl FromStr for ResamplingMethod {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(ResamplingMethod::Nearest),
            "bilinear" => Ok(ResamplingMethod::Bilinear),
            "average" | "mean" => Ok(ResamplingMethod::Average),
            _ => Err(TileError::invalid_parameter(
                "resampling",
                format!("unknown method '{}'", s),
            )),
        }
    }
}

/// A raster dataset as described by the metadata provider. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDataset {
    pub id: String,
    pub source_kind: SourceKind,
    /// File path or object key of the source.
    pub locator: String,
    /// Zero-based band indices to read. Empty means the first band.
    #[serde(default)]
    pub bands: Vec<usize>,
    pub crs: CrsCode,
    /// Extent in `crs` units. Used when the source carries no georeferencing.
    pub spatial_extent: BoundingBox,
    #[serde(default)]
    pub nodata_value: Option<f64>,
    pub default_style_id: String,
    #[serde(default)]
    pub resampling: ResamplingMethod,
}

impl RasterDataset {
    /// Bands to read, defaulting to the first one.
    pub fn band_indices(&self) -> Vec<usize> {
        if self.bands.is_empty() {
            vec![0]
        } else {
            self.bands.clone()
        }
    }

    /// Whether `value` is the dataset's nodata marker (NaN always is).
    pub fn is_nodata(&self, value: f64) -> bool {
        if value.is_nan() {
            return true;
        }
        match self.nodata_value {
            Some(nd) if nd.is_nan() => false,
            Some(nd) => (value - nd).abs() <= f64::EPSILON * nd.abs().max(1.0),
            None => false,
        }
    }
}

/// A named vector layer a dataset can serve as MVT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorLayerSource {
    /// Layer name written into the tile.
    pub name: String,
    /// Source identifier handed to the feature query collaborator.
    pub source: String,
    /// Attributes to carry into the tile. Empty means all.
    #[serde(default)]
    pub attributes: Vec<String>,
}
