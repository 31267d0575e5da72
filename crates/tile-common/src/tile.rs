//! Tile matrix sets and the tile <-> bounding box math.
//!
//! Two fixed quad-tree schemes are supported. Both have `2^zoom × 2^zoom`
//! tiles at every zoom level, with rows counted downward from the top edge:
//!
//! - `WebMercatorQuad`: square EPSG:3857 world of side `2 · ORIGIN_SHIFT`.
//! - `CRS84Quad`: the EPSG:4326 world, each tile `360/2^z` degrees wide and
//!   `180/2^z` degrees tall.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bbox::BoundingBox;
use crate::crs::{CrsCode, ORIGIN_SHIFT};
use crate::error::{TileError, TileResult};

/// Highest zoom level accepted anywhere in the core.
pub const MAX_ZOOM: u32 = 30;

/// Fractional tile positions this close to an integer are treated as lying
/// on the tile edge, which keeps the round trip through floating point exact.
const EDGE_SNAP: f64 = 1e-6;

/// Identifier of one of the two supported tile matrix sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileMatrixSetId {
    #[serde(rename = "CRS84Quad", alias = "WorldCRS84Quad")]
    Crs84Quad,
    #[serde(rename = "WebMercatorQuad", alias = "WorldWebMercatorQuad")]
    WebMercatorQuad,
}

impl TileMatrixSetId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileMatrixSetId::Crs84Quad => "CRS84Quad",
            TileMatrixSetId::WebMercatorQuad => "WebMercatorQuad",
        }
    }

    /// CRS of the bounding boxes produced for this scheme.
    pub fn crs(&self) -> CrsCode {
        match self {
            TileMatrixSetId::Crs84Quad => CrsCode::Epsg4326,
            TileMatrixSetId::WebMercatorQuad => CrsCode::Epsg3857,
        }
    }

    /// Full extent of the scheme in its own CRS.
    pub fn extent(&self) -> BoundingBox {
        match self {
            TileMatrixSetId::Crs84Quad => BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
            TileMatrixSetId::WebMercatorQuad => {
                BoundingBox::new(-ORIGIN_SHIFT, -ORIGIN_SHIFT, ORIGIN_SHIFT, ORIGIN_SHIFT)
            }
        }
    }

    /// Number of tiles along each axis at `zoom`.
    pub fn matrix_size(&self, zoom: u32) -> TileResult<u32> {
        check_zoom(zoom)?;
        Ok(1u32 << zoom)
    }

    /// Width and height of a single tile at `zoom`, in CRS units.
    pub fn tile_span(&self, zoom: u32) -> TileResult<(f64, f64)> {
        let n = self.matrix_size(zoom)? as f64;
        let extent = self.extent();
        Ok((extent.width() / n, extent.height() / n))
    }

    /// Bounding box of the tile at (`zoom`, `row`, `column`).
    pub fn tile_to_bounds(&self, zoom: u32, row: u32, column: u32) -> TileResult<BoundingBox> {
        let coord = TileCoordinate::new(zoom, row, column)?;
        let (span_x, span_y) = self.tile_span(coord.zoom)?;
        let extent = self.extent();

        let min_x = extent.min_x + coord.column as f64 * span_x;
        let max_y = extent.max_y - coord.row as f64 * span_y;
        Ok(BoundingBox::new(min_x, max_y - span_y, min_x + span_x, max_y))
    }

    /// Range of tiles at `zoom` covering `bbox`, clamped to the matrix.
    ///
    /// The box is expected in this scheme's CRS. Boxes reaching outside the
    /// scheme extent are clamped to the edge tiles.
    pub fn bounds_to_tile_range(&self, zoom: u32, bbox: &BoundingBox) -> TileResult<TileRange> {
        bbox.validate()?;
        let n = self.matrix_size(zoom)?;
        let (span_x, span_y) = self.tile_span(zoom)?;
        let extent = self.extent();
        let last = (n - 1) as f64;

        let col_lo = snap((bbox.min_x - extent.min_x) / span_x);
        let col_hi = snap((bbox.max_x - extent.min_x) / span_x);
        let row_lo = snap((extent.max_y - bbox.max_y) / span_y);
        let row_hi = snap((extent.max_y - bbox.min_y) / span_y);

        let min_col = col_lo.floor().clamp(0.0, last) as u32;
        let min_row = row_lo.floor().clamp(0.0, last) as u32;
        // The far edge is exclusive: a box ending exactly on a tile boundary
        // does not reach into the next tile.
        let max_col = ((col_hi.ceil() - 1.0).clamp(0.0, last) as u32).max(min_col);
        let max_row = ((row_hi.ceil() - 1.0).clamp(0.0, last) as u32).max(min_row);

        Ok(TileRange {
            zoom,
            min_row,
            max_row,
            min_col,
            max_col,
        })
    }

    /// Range covering the whole matrix at `zoom`.
    pub fn full_range(&self, zoom: u32) -> TileResult<TileRange> {
        let n = self.matrix_size(zoom)?;
        Ok(TileRange {
            zoom,
            min_row: 0,
            max_row: n - 1,
            min_col: 0,
            max_col: n - 1,
        })
    }
}

impl fmt::Display for TileMatrixSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TileMatrixSetId {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "crs84quad" | "worldcrs84quad" | "epsg:4326" => Ok(TileMatrixSetId::Crs84Quad),
            "webmercatorquad" | "worldwebmercatorquad" | "epsg:3857" | "googlemapscompatible" => {
                Ok(TileMatrixSetId::WebMercatorQuad)
            }
            _ => Err(TileError::invalid_parameter(
                "tileMatrixSet",
                format!("unknown tile matrix set '{}'", s),
            )),
        }
    }
}

fn check_zoom(zoom: u32) -> TileResult<()> {
    if zoom > MAX_ZOOM {
        return Err(TileError::InvalidCoordinate(format!(
            "zoom {} exceeds maximum {}",
            zoom, MAX_ZOOM
        )));
    }
    Ok(())
}

fn snap(v: f64) -> f64 {
    let nearest = v.round();
    if (v - nearest).abs() < EDGE_SNAP {
        nearest
    } else {
        v
    }
}

/// A validated tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub zoom: u32,
    pub row: u32,
    pub column: u32,
}

impl TileCoordinate {
    /// Build a coordinate, rejecting rows or columns outside `[0, 2^zoom)`.
    pub fn new(zoom: u32, row: u32, column: u32) -> TileResult<Self> {
        check_zoom(zoom)?;
        let n = 1u64 << zoom;
        if row as u64 >= n || column as u64 >= n {
            return Err(TileError::InvalidCoordinate(format!(
                "row {} / column {} out of range for zoom {} (matrix size {})",
                row, column, zoom, n
            )));
        }
        Ok(Self { zoom, row, column })
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.row, self.column)
    }
}

/// Inclusive rectangle of tiles at a single zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub zoom: u32,
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn count(&self) -> u64 {
        (self.max_row - self.min_row + 1) as u64 * (self.max_col - self.min_col + 1) as u64
    }

    pub fn contains(&self, coord: &TileCoordinate) -> bool {
        coord.zoom == self.zoom
            && (self.min_row..=self.max_row).contains(&coord.row)
            && (self.min_col..=self.max_col).contains(&coord.column)
    }

    /// Row-major iteration over the tiles in the range.
    pub fn iter(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        let zoom = self.zoom;
        (self.min_row..=self.max_row).flat_map(move |row| {
            (self.min_col..=self.max_col).map(move |column| TileCoordinate { zoom, row, column })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMES: [TileMatrixSetId; 2] =
        [TileMatrixSetId::Crs84Quad, TileMatrixSetId::WebMercatorQuad];

    #[test]
    fn test_web_mercator_zoom0_full_extent() {
        let tms = TileMatrixSetId::WebMercatorQuad;
        let bounds = tms.tile_to_bounds(0, 0, 0).unwrap();
        assert_eq!(bounds, tms.extent());

        let range = tms.bounds_to_tile_range(0, &tms.extent()).unwrap();
        assert_eq!((range.min_row, range.max_row), (0, 0));
        assert_eq!((range.min_col, range.max_col), (0, 0));
        assert_eq!(range.count(), 1);
    }

    #[test]
    fn test_crs84_tile_spans() {
        let tms = TileMatrixSetId::Crs84Quad;
        let bounds = tms.tile_to_bounds(1, 0, 1).unwrap();
        assert_eq!(bounds, BoundingBox::new(0.0, 0.0, 180.0, 90.0));

        let bounds = tms.tile_to_bounds(2, 3, 0).unwrap();
        assert_eq!(bounds, BoundingBox::new(-180.0, -90.0, -90.0, -45.0));
    }

    #[test]
    fn test_web_mercator_tile_bounds() {
        let tms = TileMatrixSetId::WebMercatorQuad;
        let bounds = tms.tile_to_bounds(1, 0, 0).unwrap();
        assert!((bounds.min_x + ORIGIN_SHIFT).abs() < 1e-6);
        assert!((bounds.max_x).abs() < 1e-6);
        assert!((bounds.max_y - ORIGIN_SHIFT).abs() < 1e-6);
        assert!((bounds.min_y).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_on_tile_boundaries() {
        for tms in SCHEMES {
            for zoom in 0..=8u32 {
                let n = 1u32 << zoom;
                let step = (n / 7).max(1);
                for row in (0..n).step_by(step as usize) {
                    for column in (0..n).step_by(step as usize) {
                        let bounds = tms.tile_to_bounds(zoom, row, column).unwrap();
                        let range = tms.bounds_to_tile_range(zoom, &bounds).unwrap();
                        assert_eq!(
                            (range.min_row, range.max_row, range.min_col, range.max_col),
                            (row, row, column, column),
                            "{} z{} r{} c{}",
                            tms,
                            zoom,
                            row,
                            column
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_round_trip_deep_zoom() {
        for tms in SCHEMES {
            let zoom = 24;
            let (row, column) = (12_345_678, 9_876_543);
            let bounds = tms.tile_to_bounds(zoom, row, column).unwrap();
            let range = tms.bounds_to_tile_range(zoom, &bounds).unwrap();
            assert_eq!((range.min_row, range.min_col), (row, column));
            assert_eq!(range.count(), 1);
        }
    }

    #[test]
    fn test_range_clamped_to_matrix() {
        let tms = TileMatrixSetId::Crs84Quad;
        let huge = BoundingBox::new(-500.0, -300.0, 500.0, 300.0);
        for zoom in 0..6 {
            let range = tms.bounds_to_tile_range(zoom, &huge).unwrap();
            let last = (1u32 << zoom) - 1;
            assert_eq!((range.min_row, range.max_row), (0, last));
            assert_eq!((range.min_col, range.max_col), (0, last));
        }

        let outside = BoundingBox::new(200.0, 95.0, 210.0, 100.0);
        let range = tms.bounds_to_tile_range(3, &outside).unwrap();
        assert_eq!(range.max_col, 7);
        assert_eq!(range.min_row, 0);
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        assert!(matches!(
            TileCoordinate::new(2, 4, 0),
            Err(TileError::InvalidCoordinate(_))
        ));
        assert!(TileCoordinate::new(0, 0, 1).is_err());
        assert!(TileCoordinate::new(MAX_ZOOM + 1, 0, 0).is_err());
        assert!(TileMatrixSetId::Crs84Quad.tile_to_bounds(1, 2, 0).is_err());
    }

    #[test]
    fn test_range_iteration() {
        let range = TileMatrixSetId::WebMercatorQuad.full_range(2).unwrap();
        let tiles: Vec<_> = range.iter().collect();
        assert_eq!(tiles.len(), 16);
        assert_eq!(range.count(), 16);
        assert!(tiles.iter().all(|t| range.contains(t)));
        assert_eq!(tiles[5], TileCoordinate { zoom: 2, row: 1, column: 1 });
    }

    #[test]
    fn test_parse_tile_matrix_set() {
        assert_eq!(
            "WorldWebMercatorQuad".parse::<TileMatrixSetId>().unwrap(),
            TileMatrixSetId::WebMercatorQuad
        );
        assert_eq!(
            "crs84quad".parse::<TileMatrixSetId>().unwrap(),
            TileMatrixSetId::Crs84Quad
        );
        assert!("UTM32".parse::<TileMatrixSetId>().is_err());
    }
}
