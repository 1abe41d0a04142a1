//! Canonical request signer.
//!
//! The string-to-sign is fixed:
//!
//! ```text
//! {timestamp_millis}\n{base64(sha256(body))}
//! ```
//!
//! An absent or empty body contributes an empty content hash, so the
//! string-to-sign degenerates to `"{timestamp_millis}\n"`. The signature is
//! `base64(HMAC-SHA256(secret, string_to_sign))`.
//!
//! Signing is a pure function of its inputs: the same body, timestamp and
//! credentials always yield the same signature.

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::Mac;
use sha2::{Digest, Sha256};

use crate::credentials::SigningCredentials;

/// Value of the `Authorization` header on signed requests.
pub const AUTHORIZATION_SCHEME: &str = "HMAC-SHA256";

/// Header carrying the authorization scheme marker.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Header carrying the configured key identifier.
pub const KEY_ID_HEADER: &str = "x-Key-Id";

/// Header carrying the signing timestamp in epoch milliseconds.
pub const TIMESTAMP_HEADER: &str = "x-Timestamp";

/// Header carrying the base64 signature.
pub const SIGNATURE_HEADER: &str = "x-Signature";

/// Signature material for one outbound request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    /// Base64 HMAC-SHA256 signature over the canonical string.
    pub signature: String,
    /// Milliseconds since the Unix epoch at signing time.
    pub timestamp_millis: i64,
    /// Identifier of the key that produced `signature`.
    pub key_id: String,
}

impl SignedEnvelope {
    /// Returns the wire headers for this envelope, in a stable order.
    #[must_use]
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            (AUTHORIZATION_HEADER, AUTHORIZATION_SCHEME.to_owned()),
            (KEY_ID_HEADER, self.key_id.clone()),
            (TIMESTAMP_HEADER, self.timestamp_millis.to_string()),
            (SIGNATURE_HEADER, self.signature.clone()),
        ]
    }
}

/// Returns `base64(sha256(payload))`, or an empty string for an absent or
/// empty payload.
#[must_use]
pub fn content_hash(payload: Option<&[u8]>) -> String {
    match payload {
        Some(bytes) if !bytes.is_empty() => STANDARD.encode(Sha256::digest(bytes)),
        _ => String::new(),
    }
}

/// Builds the canonical string-to-sign.
#[must_use]
pub fn string_to_sign(payload: Option<&[u8]>, timestamp_millis: i64) -> String {
    format!("{timestamp_millis}\n{}", content_hash(payload))
}

/// Signs `payload` at `timestamp_millis` with `credentials`.
///
/// `payload` must be the exact bytes that go on the wire.
#[must_use]
pub fn sign(
    payload: Option<&[u8]>,
    timestamp_millis: i64,
    credentials: &SigningCredentials,
) -> SignedEnvelope {
    let mut mac = credentials.mac();
    mac.update(string_to_sign(payload, timestamp_millis).as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    SignedEnvelope { signature, timestamp_millis, key_id: credentials.key_id().to_owned() }
}

/// Checks `envelope` against `payload` in constant time.
///
/// Returns `false` when the key ids differ, the signature is not valid base64,
/// or the MAC does not match.
#[must_use]
pub fn verify(
    payload: Option<&[u8]>,
    envelope: &SignedEnvelope,
    credentials: &SigningCredentials,
) -> bool {
    if envelope.key_id != credentials.key_id() {
        return false;
    }
    let Ok(expected) = STANDARD.decode(&envelope.signature) else {
        return false;
    };

    let mut mac = credentials.mac();
    mac.update(string_to_sign(payload, envelope.timestamp_millis).as_bytes());
    mac.verify_slice(&expected).is_ok()
}
