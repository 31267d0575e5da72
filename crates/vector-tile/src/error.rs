//! Error types for vector tile encoding.

use thiserror::Error;
use tile_common::TileError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorTileError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Malformed protobuf bytes while decoding a tile.
    #[error("failed to decode vector tile: {0}")]
    Decode(String),
}

impl VectorTileError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }
}

impl From<VectorTileError> for TileError {
    fn from(err: VectorTileError) -> Self {
        match err {
            VectorTileError::Config(msg) => TileError::ConfigurationError(msg),
            VectorTileError::InvalidInput(msg) => TileError::RenderError(msg),
            VectorTileError::Decode(msg) => TileError::DecodeError(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, VectorTileError>;
