//! Identity of a rendered tile variant and its storage path.
//!
//! The path layout is the only persisted format the tile core defines:
//!
//! ```text
//! {datasetId}/{tileMatrixSetId}/{styleId}/{format}-{tileSize}-{alpha|opaque}/{zoom}/{column}/{row}.{ext}
//! ```
//!
//! Changing it invalidates every existing cache, so it must stay stable.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TileError, TileResult};
use crate::format::TileFormat;
use crate::tile::{TileCoordinate, TileMatrixSetId};

pub const MIN_TILE_SIZE: u32 = 64;
pub const MAX_TILE_SIZE: u32 = 4096;

/// Every field participates in the identity; two keys differing in any of
/// them address different cached objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCacheKey {
    pub dataset_id: String,
    pub tile_matrix_set: TileMatrixSetId,
    pub zoom: u32,
    pub row: u32,
    pub column: u32,
    pub style_id: String,
    pub format: TileFormat,
    pub transparent: bool,
    pub tile_size: u32,
}

impl TileCacheKey {
    /// Build a validated key.
    pub fn new(
        dataset_id: impl Into<String>,
        tile_matrix_set: TileMatrixSetId,
        coord: TileCoordinate,
        style_id: impl Into<String>,
        format: TileFormat,
        transparent: bool,
        tile_size: u32,
    ) -> TileResult<Self> {
        let key = Self {
            dataset_id: dataset_id.into(),
            tile_matrix_set,
            zoom: coord.zoom,
            row: coord.row,
            column: coord.column,
            style_id: style_id.into(),
            format,
            transparent,
            tile_size,
        };
        key.validate()?;
        Ok(key)
    }

    /// Check the coordinate range and the path-safety of identifiers.
    pub fn validate(&self) -> TileResult<()> {
        TileCoordinate::new(self.zoom, self.row, self.column)?;
        validate_identifier("datasetId", &self.dataset_id)?;
        validate_identifier("styleId", &self.style_id)?;
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&self.tile_size) {
            return Err(TileError::invalid_parameter(
                "tileSize",
                format!(
                    "{} outside [{}, {}]",
                    self.tile_size, MIN_TILE_SIZE, MAX_TILE_SIZE
                ),
            ));
        }
        Ok(())
    }

    pub fn coordinate(&self) -> TileCoordinate {
        TileCoordinate {
            zoom: self.zoom,
            row: self.row,
            column: self.column,
        }
    }

    /// Deterministic storage path of this key.
    pub fn storage_path(&self) -> String {
        format!(
            "{}/{}/{}/{}-{}-{}/{}/{}/{}.{}",
            self.dataset_id,
            self.tile_matrix_set.as_str(),
            self.style_id,
            self.format.as_str(),
            self.tile_size,
            if self.transparent { "alpha" } else { "opaque" },
            self.zoom,
            self.column,
            self.row,
            self.format.extension()
        )
    }

    /// Prefix shared by every cached tile of a dataset.
    pub fn dataset_prefix(dataset_id: &str) -> String {
        format!("{}/", dataset_id)
    }
}

impl fmt::Display for TileCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_path())
    }
}

/// Dataset id owning a storage path, i.e. its first segment.
pub fn dataset_of_path(path: &str) -> Option<&str> {
    path.split('/').next().filter(|s| !s.is_empty())
}

/// Identifiers end up as path segments, so separators and parent references
/// are rejected outright.
pub fn validate_identifier(param: &str, value: &str) -> TileResult<()> {
    if value.is_empty() {
        return Err(TileError::invalid_parameter(param, "must not be empty"));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(TileError::invalid_parameter(
            param,
            format!("'{}' contains a path separator or '..'", value),
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(TileError::invalid_parameter(param, "contains control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(format: TileFormat, transparent: bool, tile_size: u32) -> TileCacheKey {
        TileCacheKey::new(
            "dem",
            TileMatrixSetId::WebMercatorQuad,
            TileCoordinate::new(3, 2, 5).unwrap(),
            "terrain",
            format,
            transparent,
            tile_size,
        )
        .unwrap()
    }

    #[test]
    fn test_storage_path_layout() {
        assert_eq!(
            key(TileFormat::Png, true, 256).storage_path(),
            "dem/WebMercatorQuad/terrain/png-256-alpha/3/5/2.png"
        );
        assert_eq!(
            key(TileFormat::Jpeg, false, 512).storage_path(),
            "dem/WebMercatorQuad/terrain/jpeg-512-opaque/3/5/2.jpg"
        );
    }

    #[test]
    fn test_variants_get_distinct_paths() {
        let base = key(TileFormat::Png, true, 256);
        let variants = [
            key(TileFormat::Webp, true, 256),
            key(TileFormat::Png, false, 256),
            key(TileFormat::Png, true, 512),
        ];
        for other in &variants {
            assert_ne!(base.storage_path(), other.storage_path());
        }
    }

    #[test]
    fn test_path_is_deterministic() {
        assert_eq!(
            key(TileFormat::Mvt, false, 256).storage_path(),
            key(TileFormat::Mvt, false, 256).storage_path()
        );
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let coord = TileCoordinate::new(0, 0, 0).unwrap();
        for bad in ["", "../etc", "a/b", "a\\b"] {
            let result = TileCacheKey::new(
                bad,
                TileMatrixSetId::Crs84Quad,
                coord,
                "s",
                TileFormat::Png,
                false,
                256,
            );
            assert!(result.is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_rejects_out_of_range() {
        let mut k = key(TileFormat::Png, true, 256);
        k.row = 8;
        assert!(matches!(k.validate(), Err(TileError::InvalidCoordinate(_))));

        let mut k = key(TileFormat::Png, true, 256);
        k.tile_size = 16;
        assert!(k.validate().is_err());
    }

    #[test]
    fn test_dataset_of_path() {
        assert_eq!(dataset_of_path("dem/WebMercatorQuad/x.png"), Some("dem"));
        assert_eq!(dataset_of_path(""), None);
        assert_eq!(TileCacheKey::dataset_prefix("dem"), "dem/");
    }
}
