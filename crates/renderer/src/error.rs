//! Error types for tile rendering.

use thiserror::Error;
use tile_common::TileError;

#[derive(Error, Debug)]
pub enum RenderError {
    /// The requested output cannot be produced with these options,
    /// e.g. transparency in a format without an alpha channel.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid render input: {0}")]
    InvalidInput(String),

    #[error("encoding failed: {0}")]
    Encode(String),
}

impl RenderError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<image::ImageError> for RenderError {
    fn from(err: image::ImageError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<RenderError> for TileError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Configuration(msg) => TileError::ConfigurationError(msg),
            other => TileError::RenderError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
