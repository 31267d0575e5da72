//! Error types for cache storage.

use thiserror::Error;
use tile_common::TileError;

/// Errors raised by cache backends and the quota machinery.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Local filesystem failure.
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// Remote object store failure.
    #[error("object store error: {0}")]
    Backend(String),

    /// A logical path that cannot be mapped onto the backend.
    #[error("invalid cache path '{0}'")]
    InvalidPath(String),

    /// Backend could not be constructed from its configuration.
    #[error("storage configuration error: {0}")]
    Config(String),

    /// Sidecar metadata could not be read or written.
    #[error("metadata error: {0}")]
    Metadata(String),
}

impl StorageError {
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Metadata(err.to_string())
    }
}

impl From<StorageError> for TileError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Config(msg) => TileError::ConfigurationError(msg),
            StorageError::InvalidPath(path) => {
                TileError::invalid_parameter("path", format!("invalid cache path '{}'", path))
            }
            other => TileError::StorageError(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
