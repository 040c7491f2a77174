//! Error types for the anomaly results pipeline.
//!
//! Errors carry:
//! - Stable numeric codes for machine parsing
//! - A category for grouping
//! - A recoverability hint for callers deciding whether to retry
//!
//! Only stream-level corruption is fatal to ingestion. Store and
//! renormalization failures are reported through this type but the
//! dispatcher and worker log them and keep going.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or unclassifiable result stream.
    Stream,
    /// Result store I/O failures.
    Store,
    /// Score recomputation failures.
    Renormalization,
    /// Configuration file errors.
    Config,
    /// Worker lifecycle and wait failures.
    Concurrency,
    /// Raw I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Stream => write!(f, "stream"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Renormalization => write!(f, "renormalization"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for the results pipeline.
#[derive(Error, Debug)]
pub enum Error {
    // Stream errors (10-19)
    #[error("invalid results stream: expected an array of objects or an object, found {found}")]
    StreamStructure { found: String },

    #[error("unexpected object in results stream: first field '{field}' is not a known record")]
    UnknownRecord { field: String },

    #[error("failed to decode {kind} record: {message}")]
    Decode { kind: String, message: String },

    #[error("results stream ended inside a record: {0}")]
    Truncated(String),

    // Store errors (20-29)
    #[error("result store operation '{operation}' failed: {message}")]
    Store { operation: String, message: String },

    #[error("result not found: {id}")]
    NotFound { id: String },

    // Renormalization errors (30-39)
    #[error("normalization failed: {0}")]
    Normalization(String),

    #[error("invalid quantile state: {0}")]
    InvalidQuantiles(String),

    // Config errors (40-49)
    #[error("configuration error: {0}")]
    Config(String),

    // Concurrency errors (50-59)
    #[error("renormalizer is shut down")]
    WorkerStopped,

    #[error("timed out after {millis}ms waiting for {what}")]
    Timeout { what: String, millis: u64 },

    #[error("internal error: {0}")]
    Internal(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Convenience constructor for store failures.
    pub fn store(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Store {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Returns the error code for this error type.
    ///
    /// Codes are stable and grouped by category:
    /// - 10-19: Stream errors
    /// - 20-29: Store errors
    /// - 30-39: Renormalization errors
    /// - 40-49: Configuration errors
    /// - 50-59: Concurrency errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::StreamStructure { .. } => 10,
            Error::UnknownRecord { .. } => 11,
            Error::Decode { .. } => 12,
            Error::Truncated(_) => 13,
            Error::Store { .. } => 20,
            Error::NotFound { .. } => 21,
            Error::Normalization(_) => 30,
            Error::InvalidQuantiles(_) => 31,
            Error::Config(_) => 40,
            Error::WorkerStopped => 50,
            Error::Timeout { .. } => 51,
            Error::Internal(_) => 52,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::StreamStructure { .. }
            | Error::UnknownRecord { .. }
            | Error::Decode { .. }
            | Error::Truncated(_) => ErrorCategory::Stream,

            Error::Store { .. } | Error::NotFound { .. } => ErrorCategory::Store,

            Error::Normalization(_) | Error::InvalidQuantiles(_) => {
                ErrorCategory::Renormalization
            }

            Error::Config(_) => ErrorCategory::Config,

            Error::WorkerStopped | Error::Timeout { .. } | Error::Internal(_) => {
                ErrorCategory::Concurrency
            }

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    ///
    /// A corrupt stream cannot be resumed; store and normalization
    /// failures are usually transient.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::StreamStructure { .. } => false,
            Error::UnknownRecord { .. } => false,
            Error::Decode { .. } => false,
            Error::Truncated(_) => false,

            Error::Store { .. } => true,
            Error::NotFound { .. } => false,

            Error::Normalization(_) => true,
            Error::InvalidQuantiles(_) => false,

            Error::Config(_) => true,

            Error::WorkerStopped => false,
            Error::Timeout { .. } => true,
            Error::Internal(_) => false,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Whether this error ends processing of the current stream.
    pub fn is_fatal_to_stream(&self) -> bool {
        self.category() == ErrorCategory::Stream || matches!(self, Error::Json(_))
    }
}
