//! Retry Coordinator: bounded exponential backoff over the Signed Transport.
//!
//! [`with_retry`] drives an attempt loop; [`RetryCoordinator`] applies it to
//! signed requests. Only errors where [`ClientError::is_retryable`] returns
//! `true` are retried. Everything else is returned from the attempt that
//! produced it.
//!
//! # Backoff Strategy
//!
//! Before attempt `n` (`n >= 1`) the loop sleeps for
//! `base_delay * backoff_factor^(n - 1)`, capped at `max_delay`, plus an
//! optional jitter of up to `jitter_ratio` of that delay. The sleep is a
//! `tokio::time::sleep`; dropping the returned future cancels the whole
//! logical call, including a pending backoff.

use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use serde::Serialize;

use crate::{
    config::RetryConfig,
    error::{ClientError, ClientResult},
    http::JsonObject,
    metrics::ClientMetrics,
    transport::{RequestAttempt, SignedTransport},
};

/// Executes `operation` until it succeeds, fails terminally, or runs out of
/// attempts.
///
/// `operation` receives the zero-based attempt number. On exhaustion the
/// error from the final attempt is returned unchanged.
#[tracing::instrument(skip(config, metrics, operation), fields(max_attempts = config.max_attempts))]
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    metrics: Option<&ClientMetrics>,
    operation_name: &str,
    mut operation: F,
) -> ClientResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error: Option<ClientError> = None;

    for attempt in 0..max_attempts {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                if let Some(m) = metrics {
                    m.record_retry();
                }
                let delay = compute_backoff(config, attempt + 1);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable error, retrying after backoff",
                );
                tokio::time::sleep(delay).await;
                last_error = Some(err);
            },
            Err(err) => {
                if err.is_retryable() {
                    if let Some(m) = metrics {
                        m.record_retry_exhausted();
                    }
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted",
                    );
                } else {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %err,
                        "terminal error, not retrying",
                    );
                }
                return Err(err);
            },
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ClientError::InvalidParameters("retry loop completed without result or error".into())
    }))
}

/// Computes the delay that precedes `attempt` (`attempt >= 1`).
///
/// Attempt 0 never waits and yields [`Duration::ZERO`].
pub(crate) fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let Some(exponent) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };
    let multiplier = config.backoff_factor.checked_pow(exponent).unwrap_or(u32::MAX);
    let capped = config.base_delay.saturating_mul(multiplier).min(config.max_delay);

    if config.jitter_ratio <= 0.0 {
        return capped;
    }
    let jitter_range = (capped.as_millis() as f64 * config.jitter_ratio) as u64;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}

/// Runs logical requests through the [`SignedTransport`] with retries.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    transport: Arc<SignedTransport>,
    config: RetryConfig,
    metrics: ClientMetrics,
}

impl RetryCoordinator {
    /// Creates a coordinator over `transport`.
    #[must_use]
    pub fn new(
        transport: Arc<SignedTransport>,
        config: RetryConfig,
        metrics: ClientMetrics,
    ) -> Self {
        Self { transport, config, metrics }
    }

    /// Returns the underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<SignedTransport> {
        &self.transport
    }

    /// Sends `body` to `endpoint`, retrying retryable failures.
    ///
    /// The body is serialized once; every attempt signs and sends the same
    /// bytes.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Encoding`] before any attempt if `body` cannot be serialized
    /// - the last concrete failure once attempts are exhausted
    /// - any non-retryable failure as soon as it occurs
    #[tracing::instrument(skip(self, body))]
    pub async fn execute<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ClientResult<JsonObject> {
        self.metrics.record_request();
        let result = self.execute_encoded(endpoint, body).await;
        if result.is_err() {
            self.metrics.record_request_failure();
        }
        result
    }

    async fn execute_encoded<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ClientResult<JsonObject> {
        let request = RequestAttempt::encode(endpoint, body)?;
        let transport = &self.transport;
        let request = &request;

        with_retry(&self.config, Some(&self.metrics), endpoint, |attempt_number| {
            let attempt = RequestAttempt { attempt_number, ..request.clone() };
            async move { transport.send_attempt(&attempt).await?.into_json() }
        })
        .await
    }

    /// Sends `body` to `endpoint` exactly once.
    ///
    /// For best-effort reads where a stale answer beats a slow one.
    ///
    /// # Errors
    ///
    /// Any failure of the single attempt, retryable or not.
    #[tracing::instrument(skip(self, body))]
    pub async fn execute_no_retry<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ClientResult<JsonObject> {
        self.metrics.record_request();
        let result = match self.transport.send(endpoint, body).await {
            Ok(response) => response.into_json(),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            self.metrics.record_request_failure();
            tracing::debug!(error = %err, "single attempt failed");
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::TransportErrorKind;

    fn config() -> RetryConfig {
        RetryConfig::default()
    }

    #[test]
    fn test_compute_backoff_default_schedule() {
        let config = config();
        assert_eq!(compute_backoff(&config, 0), Duration::ZERO);
        assert_eq!(compute_backoff(&config, 1), Duration::from_secs(2));
        assert_eq!(compute_backoff(&config, 2), Duration::from_secs(4));
        assert_eq!(compute_backoff(&config, 3), Duration::from_secs(8));
        assert_eq!(compute_backoff(&config, 4), Duration::from_secs(16));
    }

    #[test]
    fn test_compute_backoff_capped() {
        let config = RetryConfig::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(25))
            .build()
            .unwrap();
        assert_eq!(compute_backoff(&config, 2), Duration::from_secs(20));
        assert_eq!(compute_backoff(&config, 3), Duration::from_secs(25));
        assert_eq!(compute_backoff(&config, 40), Duration::from_secs(25));
    }

    #[test]
    fn test_compute_backoff_jitter_bounds() {
        let config = RetryConfig::builder().jitter_ratio(0.5).build().unwrap();
        for _ in 0..100 {
            let delay = compute_backoff(&config, 2);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_compute_backoff_constant_factor() {
        let config = RetryConfig::builder().backoff_factor(1).build().unwrap();
        assert_eq!(compute_backoff(&config, 1), Duration::from_secs(2));
        assert_eq!(compute_backoff(&config, 4), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_succeeds_after_transient() {
        let calls = AtomicU32::new(0);
        let metrics = ClientMetrics::new();

        let result = with_retry(&config(), Some(&metrics), "op", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::transport(TransportErrorKind::TimedOut, "slow"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().retry_count, 2);
        assert_eq!(metrics.snapshot().retry_exhausted_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_passes_attempt_numbers() {
        let seen = parking_lot::Mutex::new(Vec::new());

        let _ = with_retry(&config(), None, "op", |attempt| {
            seen.lock().push(attempt);
            async { Err::<(), _>(ClientError::http_status(503, "")) }
        })
        .await;

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let metrics = ClientMetrics::new();

        let result: ClientResult<()> = with_retry(&config(), Some(&metrics), "op", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(ClientError::http_status(if n == 4 { 502 } else { 500 }, "")) }
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(502));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(metrics.snapshot().retry_count, 4);
        assert_eq!(metrics.snapshot().retry_exhausted_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_terminal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: ClientResult<()> = with_retry(&config(), None, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::decoding("bad")) }
        })
        .await;

        assert!(matches!(result, Err(ClientError::Decoding { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_single_attempt_config() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::builder().max_attempts(1).build().unwrap();

        let result: ClientResult<()> = with_retry(&config, None, "op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::http_status(503, "")) }
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
