//! Configuration for the attribution client.
//!
//! [`ClientConfig`] names the service and its timeouts; [`RetryConfig`] holds
//! the backoff schedule used by the retry coordinator. Both are constructed
//! through validating `bon` builders and can also be loaded from any serde
//! format, with durations written in humantime form (`"2s"`, `"1m"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Default total number of attempts (1 initial + 4 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default multiplier applied to the delay after each retry.
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Default upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default platform tag sent with every request.
pub const DEFAULT_PLATFORM: &str = "ios";

/// Backoff schedule for the retry coordinator.
///
/// The delay before attempt `n` (`n >= 1`) is
/// `base_delay * backoff_factor^(n - 1)`, capped at `max_delay`. With the
/// defaults this gives 2s, 4s, 8s, 16s.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use attribution_client::RetryConfig;
///
/// let config = RetryConfig::builder()
///     .max_attempts(3)
///     .base_delay(Duration::from_millis(500))
///     .build()?;
/// assert_eq!(config.max_attempts(), 3);
/// # Ok::<(), attribution_client::ClientError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub(crate) max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub(crate) base_delay: Duration,

    /// Multiplier applied per retry.
    #[serde(default = "default_backoff_factor")]
    pub(crate) backoff_factor: u32,

    /// Cap on any single delay.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub(crate) max_delay: Duration,

    /// Random extra delay as a fraction of the computed delay, in `[0, 1]`.
    #[serde(default)]
    pub(crate) jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay() -> Duration {
    DEFAULT_BASE_DELAY
}

fn default_backoff_factor() -> u32 {
    DEFAULT_BACKOFF_FACTOR
}

fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_ratio: 0.0,
        }
    }
}

#[bon::bon]
impl RetryConfig {
    /// Creates a retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParameters`] if `max_attempts` or
    /// `backoff_factor` is zero, or `jitter_ratio` is outside `[0, 1]`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_ATTEMPTS)] max_attempts: u32,
        #[builder(default = DEFAULT_BASE_DELAY)] base_delay: Duration,
        #[builder(default = DEFAULT_BACKOFF_FACTOR)] backoff_factor: u32,
        #[builder(default = DEFAULT_MAX_DELAY)] max_delay: Duration,
        #[builder(default = 0.0)] jitter_ratio: f64,
    ) -> ClientResult<Self> {
        let config = Self { max_attempts, base_delay, backoff_factor, max_delay, jitter_ratio };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations should be validated before use.
    ///
    /// # Errors
    ///
    /// See [`RetryConfig::new`].
    pub fn validate(&self) -> ClientResult<()> {
        if self.max_attempts == 0 {
            return Err(ClientError::InvalidParameters("max_attempts must be at least 1".into()));
        }
        if self.backoff_factor == 0 {
            return Err(ClientError::InvalidParameters(
                "backoff_factor must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(ClientError::InvalidParameters(format!(
                "jitter_ratio must be within [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        Ok(())
    }

    /// Returns the total number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the backoff multiplier.
    #[must_use]
    pub fn backoff_factor(&self) -> u32 {
        self.backoff_factor
    }

    /// Returns the delay cap.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the jitter ratio.
    #[must_use]
    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }
}

/// Configuration for [`AttributionClient`](crate::AttributionClient).
///
/// # Example
///
/// ```
/// use attribution_client::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .project_token("tok_live_123")
///     .base_url("https://attribution.example.com")
///     .build()?;
/// assert_eq!(
///     config.endpoint_url("/api/client/init"),
///     "https://attribution.example.com/api/client/init"
/// );
/// # Ok::<(), attribution_client::ClientError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Project token embedded in every request body.
    pub(crate) project_token: String,

    /// Service root, without a trailing slash.
    pub(crate) base_url: String,

    /// Per-request timeout.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,

    /// Connection timeout.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,

    /// Backoff schedule.
    #[serde(default)]
    pub(crate) retry: RetryConfig,

    /// Platform tag sent with every request.
    #[serde(default = "default_platform")]
    pub(crate) platform: String,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_owned()
}

#[bon::bon]
impl ClientConfig {
    /// Creates a client configuration, validating all required fields.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `project_token` is empty ([`ClientError::Unconfigured`])
    /// - `base_url` is not an absolute http(s) URL ([`ClientError::InvalidParameters`])
    /// - `retry` fails [`RetryConfig::validate`]
    #[builder]
    pub fn new(
        #[builder(into)] project_token: String,
        #[builder(into)] base_url: String,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default)] retry: RetryConfig,
        #[builder(into, default = DEFAULT_PLATFORM.to_owned())] platform: String,
    ) -> ClientResult<Self> {
        let config = Self {
            project_token,
            base_url: base_url.trim_end_matches('/').to_owned(),
            request_timeout,
            connect_timeout,
            retry,
            platform,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::new`].
    pub fn validate(&self) -> ClientResult<()> {
        if self.project_token.trim().is_empty() {
            return Err(ClientError::Unconfigured("project token is required".into()));
        }

        let url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::InvalidParameters(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidParameters(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        self.retry.validate()
    }

    /// Joins `endpoint` onto the base URL.
    #[must_use]
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Returns the project token.
    #[must_use]
    pub fn project_token(&self) -> &str {
        &self.project_token
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the retry configuration.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the platform tag.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }
}
