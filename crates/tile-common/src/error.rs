//! Error kinds surfaced by the tile core.

use thiserror::Error;

/// Result type alias using TileError.
pub type TileResult<T> = Result<T, TileError>;

/// Primary error type for tile operations.
///
/// Each crate in the workspace has its own error enum; all of them convert
/// into one of these kinds at the service boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TileError {
    // === Request Errors ===
    #[error("Invalid tile coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Unknown style: {0}")]
    UnknownStyle(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // === Source Errors ===
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Failed to decode source data: {0}")]
    DecodeError(String),

    // === Processing Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Rendering failed: {0}")]
    RenderError(String),

    #[error("Preseed job failed: {0}")]
    PreseedJobFatal(String),

    // === Infrastructure Errors ===
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TileError {
    /// Shorthand for an `InvalidParameter` error.
    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        TileError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TileError::InvalidCoordinate(_) => "InvalidCoordinate",
            TileError::InvalidParameter { .. } => "InvalidParameter",
            TileError::UnknownDataset(_) => "UnknownDataset",
            TileError::UnknownStyle(_) => "UnknownStyle",
            TileError::NotFound(_) => "NotFound",
            TileError::ConfigurationError(_) => "ConfigurationError",
            TileError::SourceUnavailable(_) => "SourceUnavailable",
            TileError::DecodeError(_) => "DecodeError",
            TileError::StorageError(_) => "StorageError",
            TileError::RenderError(_) => "RenderError",
            TileError::PreseedJobFatal(_) => "PreseedJobFatal",
            TileError::Cancelled => "Cancelled",
            TileError::Timeout => "Timeout",
            TileError::InternalError(_) => "InternalError",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TileError::SourceUnavailable(_) | TileError::StorageError(_) | TileError::Timeout
        )
    }

    /// Whether the error was caused by the request itself rather than by the
    /// data or the infrastructure behind it.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TileError::InvalidCoordinate(_)
                | TileError::InvalidParameter { .. }
                | TileError::UnknownDataset(_)
                | TileError::UnknownStyle(_)
                | TileError::NotFound(_)
                | TileError::ConfigurationError(_)
        )
    }
}

impl From<std::io::Error> for TileError {
    fn from(err: std::io::Error) -> Self {
        TileError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for TileError {
    fn from(err: serde_json::Error) -> Self {
        TileError::InternalError(format!("JSON error: {}", err))
    }
}
