//! Conversion-Value Ratchet.
//!
//! Applies conversion-value updates through the capability-tiered
//! [`PostbackUpdater`] while keeping the stored fine value non-decreasing.
//!
//! # Serialization
//!
//! Every mutating operation holds an async mutex for its full duration,
//! from the monotonicity read to the final persist. The mutex is taken with
//! `try_lock`: a caller that finds it held gets [`RatchetError::InFlight`]
//! at once rather than waiting in line. Because the persist completes before
//! the guard drops, the next holder always reads the latest state.
//!
//! # Update decision
//!
//! | Request vs stored state                    | Outcome                      |
//! |--------------------------------------------|------------------------------|
//! | fine lower than stored                     | `Regression`, nothing called |
//! | unknown coarse value on a tier needing one | `InvalidParameters`          |
//! | fine, coarse and lock window all equal     | `Unchanged`, nothing called  |
//! | otherwise                                  | dispatch to tier, then save  |
//!
//! A lower fine value is rejected even when its coarse value or lock window
//! differ from the stored ones.

use std::sync::Arc;

use attribution_storage::{ConversionState, ConversionStateStore, StorageError};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    capability::{CapabilityDescriptor, CapabilityTier, CoarseValue, PostbackUpdater, UpdaterError},
    error::ClientError,
    metrics::ClientMetrics,
};

/// Source tag used for the initial registration.
pub const REGISTRATION_SOURCE_TAG: &str = "registration";

/// One requested conversion-value change.
///
/// ```
/// use attribution_client::ConversionUpdateRequest;
///
/// let request = ConversionUpdateRequest::builder()
///     .fine_value(12)
///     .coarse_value("medium")
///     .source_tag("capture-payment")
///     .build();
/// assert!(!request.lock_window);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct ConversionUpdateRequest {
    /// Requested fine value.
    pub fine_value: u32,
    /// Requested coarse value: `"low"`, `"medium"` or `"high"` in any case.
    #[builder(into)]
    pub coarse_value: Option<String>,
    /// Whether to request early finalization of the measurement window.
    #[builder(default)]
    pub lock_window: bool,
    /// Free-form origin of the request, for logs only.
    #[builder(into, default)]
    pub source_tag: String,
}

/// Why an update or registration did not apply.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RatchetError {
    /// Another update or registration holds the guard.
    #[error("another conversion update is in flight")]
    InFlight,

    /// The requested fine value is below the stored one.
    #[error("fine value {requested} is lower than stored value {stored}")]
    Regression {
        /// Persisted fine value.
        stored: u32,
        /// Rejected fine value.
        requested: u32,
    },

    /// The request carried a malformed value.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The descriptor declares no usable tier.
    #[error("no conversion update capability is available")]
    CapabilityUnavailable,

    /// The external update mechanism failed.
    #[error("updater failed: {0}")]
    Updater(#[from] UpdaterError),

    /// The state record could not be read or written.
    #[error("conversion state storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Result of a successful [`ConversionValueRatchet::try_update_conversion_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The tier accepted the update and the new triple was persisted.
    Applied {
        /// Tier that carried the update.
        tier: CapabilityTier,
    },
    /// The stored triple already matched; nothing was called.
    Unchanged,
}

/// Result of a successful [`ConversionValueRatchet::try_register_initial_conversion_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The initial value was dispatched and registration recorded.
    Registered {
        /// Tier that carried the registration.
        tier: CapabilityTier,
    },
    /// Registration had already completed.
    AlreadyRegistered,
    /// An update was already applied, so registration was marked complete
    /// without dispatching over it.
    Superseded,
}

/// Serialized, monotonic conversion-value updates for one install.
pub struct ConversionValueRatchet {
    states: ConversionStateStore,
    updater: Arc<dyn PostbackUpdater>,
    capabilities: CapabilityDescriptor,
    guard: Mutex<()>,
    metrics: ClientMetrics,
}

impl ConversionValueRatchet {
    /// Creates a ratchet over `states`.
    #[must_use]
    pub fn new(
        states: ConversionStateStore,
        updater: Arc<dyn PostbackUpdater>,
        capabilities: CapabilityDescriptor,
        metrics: ClientMetrics,
    ) -> Self {
        Self { states, updater, capabilities, guard: Mutex::new(()), metrics }
    }

    /// Returns the persisted state.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn state(&self) -> Result<ConversionState, StorageError> {
        self.states.load().await
    }

    /// Registers the initial conversion value, reducing the outcome to a
    /// boolean. Failures are logged.
    pub async fn register_initial_conversion_value(&self) -> bool {
        match self.try_register_initial_conversion_value().await {
            Ok(RegisterOutcome::Registered { .. }) => {
                self.metrics.record_conversion_applied();
                true
            },
            Ok(RegisterOutcome::AlreadyRegistered | RegisterOutcome::Superseded) => {
                self.metrics.record_conversion_unchanged();
                true
            },
            Err(err) => {
                self.metrics.record_conversion_rejected();
                tracing::warn!(
                    source = REGISTRATION_SOURCE_TAG,
                    error = %err,
                    "initial conversion value registration failed",
                );
                false
            },
        }
    }

    /// Registers `(0, "low", false)` once per install.
    ///
    /// If any update has already been applied, the stored triple is left as
    /// it is and registration is recorded as [`RegisterOutcome::Superseded`].
    ///
    /// # Errors
    ///
    /// - [`RatchetError::InFlight`] if another operation holds the guard
    /// - [`RatchetError::CapabilityUnavailable`] if no tier is declared
    /// - [`RatchetError::Updater`] / [`RatchetError::Storage`] on failure;
    ///   registration stays pending and may be attempted again
    #[tracing::instrument(skip(self))]
    pub async fn try_register_initial_conversion_value(
        &self,
    ) -> Result<RegisterOutcome, RatchetError> {
        let _guard = self.guard.try_lock().map_err(|_| RatchetError::InFlight)?;

        let mut state = self.states.load().await?;
        if state.registered {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        let outcome = if has_applied_update(&state) {
            RegisterOutcome::Superseded
        } else {
            let tier = self.resolve_tier()?;
            self.dispatch(tier, 0, Some(CoarseValue::Low), false).await?;
            state.last_coarse_value = Some(CoarseValue::Low.as_str().to_owned());
            state.last_lock_window = false;
            RegisterOutcome::Registered { tier }
        };

        state.registered = true;
        state.registered_at = Some(Utc::now());
        self.states.save(&state).await?;

        tracing::debug!(?outcome, "initial conversion value registered");
        Ok(outcome)
    }

    /// Applies `request`, reducing the outcome to a boolean. Failures are
    /// logged.
    pub async fn update_conversion_value(&self, request: ConversionUpdateRequest) -> bool {
        match self.try_update_conversion_value(&request).await {
            Ok(UpdateOutcome::Applied { .. }) => {
                self.metrics.record_conversion_applied();
                true
            },
            Ok(UpdateOutcome::Unchanged) => {
                self.metrics.record_conversion_unchanged();
                true
            },
            Err(err) => {
                self.metrics.record_conversion_rejected();
                tracing::warn!(
                    source = %request.source_tag,
                    fine_value = request.fine_value,
                    error = %err,
                    "conversion value update rejected",
                );
                false
            },
        }
    }

    /// Applies `request` if it does not lower the stored fine value.
    ///
    /// # Errors
    ///
    /// - [`RatchetError::InFlight`] if another operation holds the guard
    /// - [`RatchetError::Regression`] if `fine_value` is below the stored value
    /// - [`RatchetError::CapabilityUnavailable`] if no tier is declared
    /// - [`RatchetError::InvalidParameters`] for an unknown coarse value on a
    ///   tier that needs one; the updater is not called
    /// - [`RatchetError::Updater`] / [`RatchetError::Storage`] on failure; the
    ///   stored state is left unchanged
    #[tracing::instrument(
        skip(self, request),
        fields(fine_value = request.fine_value, source = %request.source_tag)
    )]
    pub async fn try_update_conversion_value(
        &self,
        request: &ConversionUpdateRequest,
    ) -> Result<UpdateOutcome, RatchetError> {
        let _guard = self.guard.try_lock().map_err(|_| RatchetError::InFlight)?;

        let mut state = self.states.load().await?;
        if request.fine_value < state.last_fine_value {
            return Err(RatchetError::Regression {
                stored: state.last_fine_value,
                requested: request.fine_value,
            });
        }

        let tier = self.resolve_tier()?;
        let coarse = request.coarse_value.as_deref();
        let typed_coarse =
            if tier.requires_coarse_value() { parse_coarse(coarse)? } else { None };

        if state.matches(request.fine_value, coarse, request.lock_window) {
            tracing::debug!("stored conversion value already current");
            return Ok(UpdateOutcome::Unchanged);
        }

        self.dispatch(tier, request.fine_value, typed_coarse, request.lock_window).await?;

        state.last_fine_value = request.fine_value;
        state.last_coarse_value = coarse.map(str::to_ascii_lowercase);
        state.last_lock_window = request.lock_window;
        self.states.save(&state).await?;

        tracing::debug!(%tier, "conversion value applied");
        Ok(UpdateOutcome::Applied { tier })
    }

    fn resolve_tier(&self) -> Result<CapabilityTier, RatchetError> {
        CapabilityTier::resolve(&self.capabilities).ok_or(RatchetError::CapabilityUnavailable)
    }

    async fn dispatch(
        &self,
        tier: CapabilityTier,
        fine_value: u32,
        coarse_value: Option<CoarseValue>,
        lock_window: bool,
    ) -> Result<(), UpdaterError> {
        match tier {
            CapabilityTier::AsyncPostback => {
                self.updater.update_postback(fine_value, coarse_value, lock_window).await
            },
            CapabilityTier::CompletionPostback => {
                self.updater
                    .update_postback_with_completion(fine_value, coarse_value, lock_window)
                    .await
            },
            CapabilityTier::FineValueOnly => self.updater.update_fine_value(fine_value),
        }
    }
}

fn has_applied_update(state: &ConversionState) -> bool {
    state.last_fine_value > 0 || state.last_coarse_value.is_some() || state.last_lock_window
}

fn parse_coarse(coarse: Option<&str>) -> Result<Option<CoarseValue>, RatchetError> {
    coarse.map(str::parse::<CoarseValue>).transpose().map_err(|err| match err {
        ClientError::InvalidParameters(message) => RatchetError::InvalidParameters(message),
        other => RatchetError::InvalidParameters(other.to_string()),
    })
}

impl std::fmt::Debug for ConversionValueRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionValueRatchet")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
