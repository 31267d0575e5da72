//! Output tile formats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TileError;

/// Encoded tile format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    Png,
    Jpeg,
    Webp,
    /// Mapbox vector tile
    Mvt,
}

impl TileFormat {
    /// Name used in cache paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg => "jpeg",
            TileFormat::Webp => "webp",
            TileFormat::Mvt => "mvt",
        }
    }

    /// File extension of stored tiles.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg => "jpg",
            TileFormat::Webp => "webp",
            TileFormat::Mvt => "pbf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            TileFormat::Png => "image/png",
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Webp => "image/webp",
            TileFormat::Mvt => "application/vnd.mapbox-vector-tile",
        }
    }

    /// Whether the encoding can carry an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        matches!(self, TileFormat::Png | TileFormat::Webp)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, TileFormat::Mvt)
    }

    /// Guess the format of a stored object from its path.
    pub fn from_extension(path: &str) -> Option<TileFormat> {
        let ext = path.rsplit_once('.')?.1;
        match ext.to_lowercase().as_str() {
            "png" => Some(TileFormat::Png),
            "jpg" | "jpeg" => Some(TileFormat::Jpeg),
            "webp" => Some(TileFormat::Webp),
            "pbf" | "mvt" => Some(TileFormat::Mvt),
            _ => None,
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TileFormat {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" | "image/png" => Ok(TileFormat::Png),
            "jpeg" | "jpg" | "image/jpeg" => Ok(TileFormat::Jpeg),
            "webp" | "image/webp" => Ok(TileFormat::Webp),
            "mvt" | "pbf" | "application/vnd.mapbox-vector-tile" | "application/x-protobuf" => {
                Ok(TileFormat::Mvt)
            }
            _ => Err(TileError::invalid_parameter(
                "format",
                format!("unsupported format '{}'", s),
            )),
        }
    }
}
