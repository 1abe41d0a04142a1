//! Storage error types and result alias.
//!
//! All key-value backends map their internal failures to [`StorageError`].
//!
//! # Error Types
//!
//! - [`StorageError::Serialization`] - A stored record could not be encoded or decoded
//! - [`StorageError::Io`] - The durable medium could not be read or written
//! - [`StorageError::FineValueRegression`] - A conversion record would move backwards
//! - [`StorageError::Internal`] - Backend-specific internal errors
//!
//! # Example
//!
//! ```
//! use attribution_storage::{StorageError, StorageResult};
//!
//! fn decode(raw: &[u8]) -> StorageResult<u32> {
//!     serde_json::from_slice(raw)
//!         .map_err(|e| StorageError::serialization_with_source("bad record", e))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Serialization or deserialization error.
    ///
    /// Indicates a corrupted record or a schema the current build cannot read.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// The durable medium could not be read or written.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Option<BoxError>,
    },

    /// A write would persist a fine conversion value lower than the stored one.
    #[error("Fine conversion value regression: stored {stored}, attempted {attempted}")]
    FineValueRegression {
        /// The currently persisted fine value.
        stored: u32,
        /// The rejected fine value.
        attempted: u32,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Io` error with a message and source error.
    #[must_use]
    pub fn io_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }
}
