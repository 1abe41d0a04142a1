//! Signed Transport: attaches HMAC authentication to a single attempt.
//!
//! The body is serialized once per logical call into a [`RequestAttempt`];
//! every attempt signs and transmits those exact bytes. Credentials live
//! behind a `RwLock<Option<Arc<_>>>`, so `configure`/`reset` swap the whole
//! pair at once and an attempt keeps the snapshot it took at dispatch.

use std::sync::Arc;

use attribution_signing::{SigningCredentials, sign};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    config::ClientConfig,
    error::{ClientError, ClientResult},
    http::{HttpExchange, HttpRequest, HttpResponse},
};

/// Content type sent with every request.
pub const CONTENT_TYPE: &str = "application/json";

/// One logical call's request, shared by all of its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAttempt {
    /// Endpoint path relative to the base URL.
    pub endpoint: String,
    /// Serialized body; signed and sent verbatim.
    pub body: Bytes,
    /// Zero-based attempt counter.
    pub attempt_number: u32,
}

impl RequestAttempt {
    /// Serializes `body` once for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Encoding`] if `body` cannot be serialized.
    pub fn encode<B: Serialize + ?Sized>(endpoint: &str, body: &B) -> ClientResult<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ClientError::encoding_with_source("failed to serialize request body", e))?;
        Ok(Self { endpoint: endpoint.to_owned(), body: Bytes::from(bytes), attempt_number: 0 })
    }
}

/// Signs and sends single attempts over an isolated [`HttpExchange`].
pub struct SignedTransport {
    exchange: Arc<dyn HttpExchange>,
    config: ClientConfig,
    credentials: RwLock<Option<Arc<SigningCredentials>>>,
}

impl SignedTransport {
    /// Creates an unsigned transport.
    #[must_use]
    pub fn new(exchange: Arc<dyn HttpExchange>, config: ClientConfig) -> Self {
        Self { exchange, config, credentials: RwLock::new(None) }
    }

    /// Installs credentials for every attempt dispatched after this call.
    pub fn configure(&self, credentials: SigningCredentials) {
        tracing::debug!(key_id = credentials.key_id(), "signing credentials configured");
        *self.credentials.write() = Some(Arc::new(credentials));
    }

    /// Clears credentials; later attempts are sent unsigned.
    pub fn reset(&self) {
        tracing::debug!("signing credentials cleared");
        *self.credentials.write() = None;
    }

    /// Returns `true` if credentials are configured.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.credentials.read().is_some()
    }

    /// Returns the configuration this transport was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Serializes `body` and sends it once.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Encoding`] for an unserializable body, or the
    /// exchange's transport error. Non-2xx statuses are returned as `Ok`.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ClientResult<HttpResponse> {
        let attempt = RequestAttempt::encode(endpoint, body)?;
        self.send_attempt(&attempt).await
    }

    /// Sends one attempt of an already-encoded request.
    ///
    /// # Errors
    ///
    /// Returns the exchange's transport error.
    #[tracing::instrument(
        skip(self, attempt),
        fields(
            endpoint = %attempt.endpoint,
            attempt = attempt.attempt_number,
            signed = tracing::field::Empty,
        )
    )]
    pub async fn send_attempt(&self, attempt: &RequestAttempt) -> ClientResult<HttpResponse> {
        let credentials = self.credentials.read().clone();
        tracing::Span::current().record("signed", credentials.is_some());

        let mut headers = vec![("Content-Type".to_owned(), CONTENT_TYPE.to_owned())];
        if let Some(credentials) = credentials {
            let timestamp = Utc::now().timestamp_millis();
            let envelope = sign(Some(&attempt.body[..]), timestamp, &credentials);
            headers.extend(
                envelope.headers().into_iter().map(|(name, value)| (name.to_owned(), value)),
            );
        }

        let request = HttpRequest {
            url: self.config.endpoint_url(&attempt.endpoint),
            headers,
            body: attempt.body.clone(),
        };
        let response = self.exchange.exchange(request).await?;
        tracing::debug!(status = response.status, "exchange completed");
        Ok(response)
    }
}

impl std::fmt::Debug for SignedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTransport")
            .field("base_url", &self.config.base_url())
            .field("signed", &self.is_signed())
            .finish_non_exhaustive()
    }
}
