//! The two coordinate reference systems the tile core understands.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::TileError;

/// Half the circumference of the Web Mercator sphere, in meters.
pub const ORIGIN_SHIFT: f64 = 20037508.342789244;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

const EARTH_RADIUS: f64 = 6378137.0;

/// Well-known CRS codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 geographic, lon/lat in degrees
    #[serde(rename = "EPSG:4326")]
    Epsg4326,
    /// Web Mercator, meters
    #[serde(rename = "EPSG:3857")]
    Epsg3857,
}

impl CrsCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrsCode::Epsg4326 => "EPSG:4326",
            CrsCode::Epsg3857 => "EPSG:3857",
        }
    }

    /// Whether coordinates are angular (degrees).
    pub fn is_geographic(&self) -> bool {
        matches!(self, CrsCode::Epsg4326)
    }

    /// Transform a single point into `to`.
    pub fn transform_point(&self, to: CrsCode, x: f64, y: f64) -> (f64, f64) {
        match (self, to) {
            (CrsCode::Epsg4326, CrsCode::Epsg3857) => lonlat_to_mercator(x, y),
            (CrsCode::Epsg3857, CrsCode::Epsg4326) => mercator_to_lonlat(x, y),
            _ => (x, y),
        }
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrsCode {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EPSG:4326" | "CRS:84" | "OGC:CRS84" | "4326" => Ok(CrsCode::Epsg4326),
            "EPSG:3857" | "EPSG:900913" | "3857" => Ok(CrsCode::Epsg3857),
            _ => Err(TileError::invalid_parameter("crs", format!("unsupported CRS '{}'", s))),
        }
    }
}

/// Convert lon/lat degrees to Web Mercator meters. Latitude is clamped to the
/// Mercator limit.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lon * ORIGIN_SHIFT / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

/// Convert Web Mercator meters to lon/lat degrees.
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x / ORIGIN_SHIFT * 180.0;
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}
