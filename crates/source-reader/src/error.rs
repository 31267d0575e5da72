//! Error types for source reading.

use thiserror::Error;
use tile_common::TileError;
use zarrs::array::codec::CodecError;
use zarrs::array::ArrayError;

/// Errors that can occur while reading a window from a source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source could not be reached or read (network, filesystem).
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Header, tile or chunk bytes are corrupt.
    #[error("failed to decode source: {0}")]
    Decode(String),

    /// A valid source using a layout or encoding this reader does not handle.
    #[error("unsupported source layout: {0}")]
    Unsupported(String),

    /// The window request itself is unusable.
    #[error("invalid window request: {0}")]
    InvalidRequest(String),

    /// Reader configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source read timed out")]
    Timeout,

    #[error("source read cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Whether retrying the same read may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::Timeout)
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => {
                Self::Decode(err.to_string())
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<object_store::Error> for SourceError {
    fn from(err: object_store::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<ArrayError> for SourceError {
    /// Storage and IO failures stay retryable; anything the codec chain
    /// rejects means the chunk bytes are bad.
    fn from(err: ArrayError) -> Self {
        match err {
            ArrayError::StorageError(e)
            | ArrayError::CodecError(CodecError::StorageError(e)) => {
                Self::Unavailable(format!("zarr storage: {}", e))
            }
            ArrayError::CodecError(CodecError::IOError(e)) => Self::from(e),
            other => Self::Decode(format!("zarr chunk: {}", other)),
        }
    }
}

impl From<SourceError> for TileError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(msg) => TileError::SourceUnavailable(msg),
            SourceError::Decode(msg) => TileError::DecodeError(msg),
            SourceError::Unsupported(msg) => TileError::DecodeError(format!("unsupported: {}", msg)),
            SourceError::InvalidRequest(msg) => TileError::invalid_parameter("window", msg),
            SourceError::Config(msg) => TileError::ConfigurationError(msg),
            SourceError::Timeout => TileError::Timeout,
            SourceError::Cancelled => TileError::Cancelled,
        }
    }
}

/// Result type for source reads.
pub type Result<T> = std::result::Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_to_tile_error() {
        let err: TileError = SourceError::unavailable("connection reset").into();
        assert!(err.is_retryable());

        let err: TileError = SourceError::decode("bad IFD").into();
        assert!(matches!(err, TileError::DecodeError(_)));
        assert!(!err.is_retryable());

        let err: TileError = SourceError::Timeout.into();
        assert_eq!(err, TileError::Timeout);
    }

    #[test]
    fn test_io_error_classification() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        assert!(matches!(SourceError::from(eof), SourceError::Decode(_)));

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(SourceError::from(missing).is_retryable());
    }

    #[test]
    fn test_zarr_error_classification() {
        let codec = ArrayError::CodecError(CodecError::Other("bad zstd frame".to_string()));
        let err = SourceError::from(codec);
        assert!(matches!(err, SourceError::Decode(_)));
        assert!(!err.is_retryable());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = SourceError::from(ArrayError::CodecError(CodecError::IOError(io)));
        assert!(err.is_retryable());
    }
}
