//! Signing credentials.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{SigningError, SigningResult};

/// Keyed HMAC-SHA256 state.
pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Secret key and key identifier used to sign outbound requests.
///
/// The secret is absorbed into a keyed HMAC state at construction time and
/// the raw bytes are not retained. Credentials are immutable; reconfiguring
/// means building a new value and swapping it in whole.
///
/// `Debug` output never contains key material.
#[derive(Clone)]
pub struct SigningCredentials {
    key_id: String,
    mac: HmacSha256,
}

impl SigningCredentials {
    /// Creates credentials from raw secret bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::EmptyKeyId`] or [`SigningError::EmptySecret`]
    /// when either field is empty.
    pub fn new(key_id: impl Into<String>, secret_key: impl AsRef<[u8]>) -> SigningResult<Self> {
        let key_id = key_id.into();
        let secret_key = secret_key.as_ref();

        if key_id.is_empty() {
            return Err(SigningError::EmptyKeyId);
        }
        if secret_key.is_empty() {
            return Err(SigningError::EmptySecret);
        }

        let mac = <HmacSha256 as Mac>::new_from_slice(secret_key)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;

        Ok(Self { key_id, mac })
    }

    /// Creates credentials from a base64-encoded secret, as delivered by the
    /// attribution dashboard.
    ///
    /// The decoded bytes live in a [`Zeroizing`] buffer and are scrubbed once
    /// the HMAC state has been derived.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::InvalidSecretEncoding`] when `secret_b64` is not
    /// valid standard base64, plus the errors of [`SigningCredentials::new`].
    pub fn from_base64(key_id: impl Into<String>, secret_b64: &str) -> SigningResult<Self> {
        let secret = Zeroizing::new(
            STANDARD
                .decode(secret_b64.trim())
                .map_err(|e| SigningError::InvalidSecretEncoding(e.to_string()))?,
        );
        Self::new(key_id, secret.as_slice())
    }

    /// Returns the key identifier sent in the `x-Key-Id` header.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns a fresh copy of the keyed MAC state.
    pub(crate) fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("key_id", &self.key_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
