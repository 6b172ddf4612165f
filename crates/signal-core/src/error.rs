//! Error types for Signal Core
//!
//! This module defines all error types used throughout the reflex loop.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.
//!
//! Only reload/config errors are ever surfaced to a caller as fatal. Errors raised
//! inside a decision cycle are absorbed by the coordinator and resolved to the
//! fail-safe action.

use thiserror::Error;

/// Result type alias for Signal operations
pub type Result<T> = std::result::Result<T, SignalError>;

/// Main error type for Signal operations
#[derive(Error, Debug)]
pub enum SignalError {
    /// The similarity index holds no documents
    #[error("Similarity index is empty")]
    IndexEmpty,

    /// Query vector (or embedder output) does not match the corpus dimension
    #[error("Dimension mismatch: corpus has {expected} dimensions, query has {actual}")]
    DimensionMismatch {
        /// Corpus embedding dimension
        expected: usize,
        /// Dimension of the offending vector
        actual: usize,
    },

    /// Inference input does not match the loaded model's channel schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The model could not produce an output
    #[error("Inference failure: {0}")]
    InferenceFailure(String),

    /// A decision attempt overran its budget
    #[error("Deadline exceeded after {elapsed_ms}ms (budget {budget_ms}ms)")]
    DeadlineExceeded {
        /// Configured budget
        budget_ms: u64,
        /// Observed elapsed time
        elapsed_ms: u64,
    },

    /// Per-source queue is full and no event could be evicted
    #[error("Queue overflow for source {source_id}: {reason}")]
    QueueOverflow {
        /// Source whose lane overflowed
        source_id: String,
        /// What was dropped
        reason: String,
    },

    /// Corpus could not be loaded; prior corpus stays active
    #[error("Corpus load failed: {0}")]
    CorpusLoad(String),

    /// Model could not be loaded; prior model stays active
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Action is not on the deployment allow-list
    #[error("Action not allowed: {0}")]
    ActionNotAllowed(String),

    /// Output stream receiver went away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        /// Human-readable context
        context: String,
        /// Wrapped error
        source: Box<SignalError>,
    },
}

impl From<serde_json::Error> for SignalError {
    fn from(e: serde_json::Error) -> Self {
        SignalError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for SignalError {
    fn from(e: toml::de::Error) -> Self {
        SignalError::Serialization(e.to_string())
    }
}

impl SignalError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Short, stable name of the variant (used in operational events)
    pub fn kind(&self) -> &'static str {
        match self {
            SignalError::IndexEmpty => "IndexEmpty",
            SignalError::DimensionMismatch { .. } => "DimensionMismatch",
            SignalError::SchemaMismatch(_) => "SchemaMismatch",
            SignalError::InferenceFailure(_) => "InferenceFailure",
            SignalError::DeadlineExceeded { .. } => "DeadlineExceeded",
            SignalError::QueueOverflow { .. } => "QueueOverflow",
            SignalError::CorpusLoad(_) => "CorpusLoad",
            SignalError::ModelLoad(_) => "ModelLoad",
            SignalError::InvalidConfig(_) => "InvalidConfig",
            SignalError::ActionNotAllowed(_) => "ActionNotAllowed",
            SignalError::ChannelClosed(_) => "ChannelClosed",
            SignalError::Serialization(_) => "Serialization",
            SignalError::Io(_) => "Io",
            SignalError::WithContext { source, .. } => source.kind(),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = SignalError::SchemaMismatch("missing channel ph".to_string());
        let err = err.context("Failed to run soft sensor");

        assert!(err.to_string().contains("Failed to run soft sensor"));
        assert!(err.to_string().contains("missing channel ph"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(SignalError::IndexEmpty);
        let result = result.with_context(|| "Corpus query".to_string());

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Corpus query"));
        assert_eq!(err.kind(), "IndexEmpty");
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = SignalError::DimensionMismatch {
            expected: 384,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: corpus has 384 dimensions, query has 3"
        );
    }
}
