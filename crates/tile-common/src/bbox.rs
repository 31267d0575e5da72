//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

use crate::crs::CrsCode;
use crate::error::{TileError, TileResult};

/// A geographic or projected bounding box.
///
/// For EPSG:4326 coordinates are in degrees, for EPSG:3857 in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse a "minx,miny,maxx,maxy" string.
    pub fn parse(s: &str) -> TileResult<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(TileError::invalid_parameter(
                "bbox",
                format!("expected 'minx,miny,maxx,maxy', got '{}'", s),
            ));
        }

        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part.parse().map_err(|_| {
                TileError::invalid_parameter("bbox", format!("invalid number '{}'", part))
            })?;
        }

        let bbox = Self::new(values[0], values[1], values[2], values[3]);
        bbox.validate()?;
        Ok(bbox)
    }

    /// Reject non-finite or inverted boxes.
    pub fn validate(&self) -> TileResult<()> {
        let finite = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(TileError::invalid_parameter("bbox", "coordinates must be finite"));
        }
        if self.min_x > self.max_x || self.min_y > self.max_y {
            return Err(TileError::invalid_parameter(
                "bbox",
                format!("inverted bounds {:?}", self),
            ));
        }
        Ok(())
    }

    /// Width of the bounding box in coordinate units.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in coordinate units.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another (touching edges do not count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Grow the box by `dx` horizontally and `dy` vertically on every side.
    pub fn expand(&self, dx: f64, dy: f64) -> BoundingBox {
        BoundingBox::new(
            self.min_x - dx,
            self.min_y - dy,
            self.max_x + dx,
            self.max_y + dy,
        )
    }

    /// Reproject the box between the two supported CRSs.
    ///
    /// Both transforms are monotonic per axis, so mapping the corners yields
    /// the exact axis-aligned result.
    pub fn transform(&self, from: CrsCode, to: CrsCode) -> BoundingBox {
        if from == to {
            return *self;
        }
        let (min_x, min_y) = from.transform_point(to, self.min_x, self.min_y);
        let (max_x, max_y) = from.transform_point(to, self.max_x, self.max_y);
        BoundingBox::new(min_x, min_y, max_x, max_y)
    }
}
