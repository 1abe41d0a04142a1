//! Client-side counters.
//!
//! All counters are independent `AtomicU64`s updated with `Ordering::Relaxed`.
//! A [`ClientMetricsSnapshot`] reads them one after another, so counters may
//! be slightly out of step with each other under concurrent load.
//!
//! ```
//! use attribution_client::ClientMetrics;
//!
//! let metrics = ClientMetrics::new();
//! metrics.record_request();
//! metrics.record_retry();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.request_count, 1);
//! assert_eq!(snapshot.retry_count, 1);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Shared, cloneable counter set.
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    request_count: AtomicU64,
    request_failure_count: AtomicU64,
    retry_count: AtomicU64,
    retry_exhausted_count: AtomicU64,
    conversion_applied_count: AtomicU64,
    conversion_unchanged_count: AtomicU64,
    conversion_rejected_count: AtomicU64,
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    /// Logical requests started (one per `execute`, regardless of attempts).
    pub request_count: u64,
    /// Logical requests that ended in an error.
    pub request_failure_count: u64,
    /// Retries scheduled after a retryable failure.
    pub retry_count: u64,
    /// Logical requests that failed after using every attempt.
    pub retry_exhausted_count: u64,
    /// Conversion updates that reached the external mechanism and persisted.
    pub conversion_applied_count: u64,
    /// Conversion updates and registrations that succeeded without calling the
    /// external mechanism.
    pub conversion_unchanged_count: u64,
    /// Conversion updates rejected (in flight, regression, invalid, failed).
    pub conversion_rejected_count: u64,
}

impl ClientMetrics {
    /// Creates a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(MetricsInner::default()) }
    }

    /// Records the start of a logical request.
    pub fn record_request(&self) {
        self.inner.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a logical request that failed.
    pub fn record_request_failure(&self) {
        self.inner.request_failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one scheduled retry.
    pub fn record_retry(&self) {
        self.inner.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request that ran out of attempts.
    pub fn record_retry_exhausted(&self) {
        self.inner.retry_exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an applied conversion update.
    pub fn record_conversion_applied(&self) {
        self.inner.conversion_applied_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an idempotent conversion no-op.
    pub fn record_conversion_unchanged(&self) {
        self.inner.conversion_unchanged_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected conversion update.
    pub fn record_conversion_rejected(&self) {
        self.inner.conversion_rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        let inner = &self.inner;
        ClientMetricsSnapshot {
            request_count: inner.request_count.load(Ordering::Relaxed),
            request_failure_count: inner.request_failure_count.load(Ordering::Relaxed),
            retry_count: inner.retry_count.load(Ordering::Relaxed),
            retry_exhausted_count: inner.retry_exhausted_count.load(Ordering::Relaxed),
            conversion_applied_count: inner.conversion_applied_count.load(Ordering::Relaxed),
            conversion_unchanged_count: inner.conversion_unchanged_count.load(Ordering::Relaxed),
            conversion_rejected_count: inner.conversion_rejected_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}
