//! The single-exchange HTTP seam.
//!
//! [`HttpExchange`] is the transport primitive supplied by the host: it
//! executes one POST and reports either a response (any status) or a
//! classified [`TransportErrorKind`]. Status interpretation happens above
//! this layer, in [`HttpResponse::into_json`].
//!
//! [`UreqExchange`] is the default implementation. It owns a dedicated
//! `ureq::Agent`, so its connection pool is never shared with other
//! networking in the process. The agent keeps no cookie jar, ignores proxy
//! environment variables, and never follows redirects.

use std::{io, io::Read, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{ClientError, ClientResult, TransportErrorKind};

/// JSON object returned by the attribution service.
pub type JsonObject = serde_json::Map<String, Value>;

/// One outbound POST, fully prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute request URL.
    pub url: String,
    /// Header name/value pairs, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Exact bytes to transmit.
    pub body: Bytes,
}

impl HttpRequest {
    /// Returns the first header value matching `name` case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw outcome of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Response status code.
    pub status: u16,
    /// Response body bytes.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, body: body.into() }
    }

    /// Returns `true` for statuses in `[200, 300)`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Interprets the response as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::HttpStatus`] for a non-2xx status and
    /// [`ClientError::Decoding`] if a 2xx body is not a JSON object.
    pub fn into_json(self) -> ClientResult<JsonObject> {
        if !self.is_success() {
            return Err(ClientError::http_status(self.status, self.body));
        }
        match serde_json::from_slice::<Value>(&self.body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ClientError::decoding(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
            Err(e) => Err(ClientError::decoding_with_source("response body is not valid JSON", e)),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Executes a single HTTP exchange.
///
/// Implementations return `Ok` for every response that was received,
/// whatever its status, and `Err(ClientError::Transport { .. })` when no
/// response was received.
#[async_trait]
pub trait HttpExchange: Send + Sync {
    /// Sends `request` and waits for the response.
    async fn exchange(&self, request: HttpRequest) -> ClientResult<HttpResponse>;
}

/// [`HttpExchange`] backed by a dedicated `ureq` agent.
#[derive(Clone)]
pub struct UreqExchange {
    agent: Arc<ureq::Agent>,
}

impl UreqExchange {
    /// Creates an exchange with the given timeouts.
    #[must_use]
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("attribution-client/", env!("CARGO_PKG_VERSION")))
            .try_proxy_from_env(false)
            .redirects(0)
            .build();
        Self { agent: Arc::new(agent) }
    }

    fn exchange_blocking(agent: &ureq::Agent, request: &HttpRequest) -> ClientResult<HttpResponse> {
        let mut call = agent.post(&request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }

        let response = match call.send_bytes(&request.body) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => return Err(classify_transport(transport)),
        };

        let status = response.status();
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body).map_err(|e| {
            ClientError::transport_with_source(
                classify_io(e.kind()),
                "failed to read response body",
                e,
            )
        })?;
        Ok(HttpResponse::new(status, body))
    }
}

impl std::fmt::Debug for UreqExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqExchange").finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpExchange for UreqExchange {
    async fn exchange(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
        let agent = Arc::clone(&self.agent);
        tokio::task::spawn_blocking(move || Self::exchange_blocking(&agent, &request))
            .await
            .map_err(|e| {
                ClientError::transport_with_source(
                    TransportErrorKind::ResourceUnavailable,
                    "exchange worker did not complete",
                    e,
                )
            })?
    }
}

fn classify_transport(transport: ureq::Transport) -> ClientError {
    let kind = match transport.kind() {
        ureq::ErrorKind::Dns => TransportErrorKind::CannotResolveHost,
        ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::ProxyConnect => {
            TransportErrorKind::CannotConnectToHost
        },
        ureq::ErrorKind::Io => {
            io_kind_of(&transport).map_or(TransportErrorKind::ConnectionLost, classify_io)
        },
        ureq::ErrorKind::BadStatus
        | ureq::ErrorKind::BadHeader
        | ureq::ErrorKind::TooManyRedirects => TransportErrorKind::BadServerResponse,
        ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
            TransportErrorKind::InvalidRequest
        },
        _ => TransportErrorKind::Other,
    };
    ClientError::transport_with_source(kind, transport.to_string(), transport)
}

fn io_kind_of(transport: &ureq::Transport) -> Option<io::ErrorKind> {
    std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .map(io::Error::kind)
}

fn classify_io(kind: io::ErrorKind) -> TransportErrorKind {
    match kind {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::TimedOut,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportErrorKind::ConnectionLost,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrNotAvailable => {
            TransportErrorKind::CannotConnectToHost
        },
        io::ErrorKind::NotConnected
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::NetworkDown
        | io::ErrorKind::HostUnreachable => TransportErrorKind::NotConnected,
        io::ErrorKind::Interrupted | io::ErrorKind::OutOfMemory => {
            TransportErrorKind::ResourceUnavailable
        },
        io::ErrorKind::InvalidData => TransportErrorKind::BadServerResponse,
        _ => TransportErrorKind::Other,
    }
}
