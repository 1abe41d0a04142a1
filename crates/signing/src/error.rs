//! Signing error types.
//!
//! Signing itself is infallible once credentials exist; every error in this
//! module is raised while credentials are being constructed.

use thiserror::Error;

/// Result type alias for credential construction.
pub type SigningResult<T> = std::result::Result<T, SigningError>;

/// Errors raised while building [`SigningCredentials`](crate::SigningCredentials).
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SigningError {
    /// The key identifier was empty.
    #[error("Signing key id cannot be empty")]
    EmptyKeyId,

    /// The secret key was empty.
    #[error("Signing secret cannot be empty")]
    EmptySecret,

    /// The secret key was not valid base64.
    #[error("Invalid signing secret encoding: {0}")]
    InvalidSecretEncoding(String),

    /// The MAC implementation rejected the key material.
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}
