//! # Attribution request signing
//!
//! Canonical HMAC-SHA256 signing for requests sent to the attribution service.
//!
//! This crate provides:
//! - **Credentials**: [`SigningCredentials`], a key id plus keyed HMAC state
//! - **Signer**: [`sign`], a pure function producing a [`SignedEnvelope`]
//! - **Wire contract**: header names and the authorization scheme marker
//!
//! ## Example
//!
//! ```
//! use attribution_signing::{SigningCredentials, sign};
//!
//! let creds = SigningCredentials::new("kid-1", b"secret")?;
//! let body = br#"{"event":"signup"}"#;
//! let envelope = sign(Some(body), 1_700_000_000_000, &creds);
//!
//! for (name, value) in envelope.headers() {
//!     println!("{name}: {value}");
//! }
//! # Ok::<(), attribution_signing::SigningError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Signing credentials.
pub mod credentials;
/// Credential error types.
pub mod error;
/// Canonical string-to-sign and HMAC signer.
pub mod signer;

pub use credentials::SigningCredentials;
pub use error::{SigningError, SigningResult};
pub use signer::{
    AUTHORIZATION_HEADER, AUTHORIZATION_SCHEME, KEY_ID_HEADER, SIGNATURE_HEADER, SignedEnvelope,
    TIMESTAMP_HEADER, content_hash, sign, string_to_sign, verify,
};
