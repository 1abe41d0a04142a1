//! Error types for the attribution client.
//!
//! [`ClientError`] is the single taxonomy surfaced by the request pipeline.
//! [`ClientError::is_retryable`] decides what the retry coordinator may
//! recover from; everything else is terminal on the attempt that produced it.

use std::{fmt, sync::Arc};

use attribution_signing::SigningError;
use attribution_storage::StorageError;
use bytes::Bytes;
use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Classified transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The device has no network connectivity.
    NotConnected,
    /// An established connection dropped mid-exchange.
    ConnectionLost,
    /// The exchange exceeded its deadline.
    TimedOut,
    /// DNS resolution failed.
    CannotResolveHost,
    /// The host refused or could not accept a connection.
    CannotConnectToHost,
    /// The server sent a response that could not be parsed as HTTP.
    BadServerResponse,
    /// A local resource (socket, worker) was temporarily unavailable.
    ResourceUnavailable,
    /// The request itself was unusable (bad URL, unsupported scheme).
    InvalidRequest,
    /// Any other transport failure.
    Other,
}

impl TransportErrorKind {
    /// Returns `true` for kinds worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionLost
                | Self::TimedOut
                | Self::CannotResolveHost
                | Self::CannotConnectToHost
                | Self::BadServerResponse
                | Self::ResourceUnavailable
        )
    }

    /// Stable snake_case name, used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::ConnectionLost => "connection_lost",
            Self::TimedOut => "timed_out",
            Self::CannotResolveHost => "cannot_resolve_host",
            Self::CannotConnectToHost => "cannot_connect_to_host",
            Self::BadServerResponse => "bad_server_response",
            Self::ResourceUnavailable => "resource_unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in the attribution client.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// A required credential or token is missing.
    #[error("Client not configured: {0}")]
    Unconfigured(String),

    /// A caller-supplied value was malformed or empty.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The exchange failed below HTTP.
    #[error("Transport failure ({kind}): {message}")]
    Transport {
        /// Classified failure kind.
        kind: TransportErrorKind,
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The server answered with a status outside `[200, 300)`.
    #[error("HTTP status {status}")]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Raw response body, kept for diagnostics.
        body: Bytes,
    },

    /// The request body could not be serialized.
    #[error("Encoding failure: {message}")]
    Encoding {
        /// Description of the encoding failure.
        message: String,
        /// The underlying serializer error.
        #[source]
        source: Option<BoxError>,
    },

    /// The response body was not a JSON object.
    #[error("Decoding failure: {message}")]
    Decoding {
        /// Description of the decoding failure.
        message: String,
        /// The underlying parser error.
        #[source]
        source: Option<BoxError>,
    },

    /// Durable state could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ClientError {
    /// Creates a `Transport` error without a source.
    #[must_use]
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport { kind, message: message.into(), source: None }
    }

    /// Creates a `Transport` error with a source.
    #[must_use]
    pub fn transport_with_source(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { kind, message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates an `HttpStatus` error.
    #[must_use]
    pub fn http_status(status: u16, body: impl Into<Bytes>) -> Self {
        Self::HttpStatus { status, body: body.into() }
    }

    /// Creates an `Encoding` error with a source.
    #[must_use]
    pub fn encoding_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Encoding { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Decoding` error without a source.
    #[must_use]
    pub fn decoding(message: impl Into<String>) -> Self {
        Self::Decoding { message: message.into(), source: None }
    }

    /// Creates a `Decoding` error with a source.
    #[must_use]
    pub fn decoding_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decoding { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if another attempt may succeed.
    ///
    /// Retryable: classified transport failures, HTTP 429 and HTTP 5xx.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => kind.is_retryable(),
            Self::HttpStatus { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    /// Returns the HTTP status code, if this is an `HttpStatus` error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<SigningError> for ClientError {
    fn from(err: SigningError) -> Self {
        Self::InvalidParameters(err.to_string())
    }
}
