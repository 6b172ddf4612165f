//! Error types for the edge host

use thiserror::Error;

/// Edge host error type
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Input line is valid JSON but not a known envelope
    #[error("Malformed envelope: {0}")]
    Envelope(String),

    /// Input line exceeded the length limit or could not be decoded
    #[error("Line too long or unreadable: {0}")]
    Framing(String),

    /// Error raised by the reflex loop itself
    #[error(transparent)]
    Core(#[from] signal_core::SignalError),

    /// Reading input or writing output failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        EdgeError::Serialization(err.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for EdgeError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(e) => EdgeError::Io(e),
            other => EdgeError::Framing(other.to_string()),
        }
    }
}

/// Result type alias for edge host operations
pub type Result<T> = std::result::Result<T, EdgeError>;
