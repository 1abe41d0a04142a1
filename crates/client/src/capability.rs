//! Capability tiers of the external conversion-value update mechanism.
//!
//! The host describes what its platform supports with a
//! [`CapabilityDescriptor`]. [`CapabilityTier::resolve`] picks the first
//! supported tier in strict preference order, and the ratchet calls exactly
//! that tier's method on the [`PostbackUpdater`]. There is no fallback from
//! one tier to another within a call.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{BoxError, ClientError};

/// Platform capability flags declared by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilityDescriptor {
    /// Newest generation: fine, coarse and lock window, awaitable.
    pub async_postback_update: bool,
    /// Mid generation: fine, coarse and lock window, completion-style.
    pub completion_postback_update: bool,
    /// Oldest generation: fine value only, no outcome reported.
    pub fine_value_update: bool,
}

impl CapabilityDescriptor {
    /// Descriptor with every tier available.
    #[must_use]
    pub fn all() -> Self {
        Self {
            async_postback_update: true,
            completion_postback_update: true,
            fine_value_update: true,
        }
    }

    /// Descriptor with no tier available.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// The update tier used for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    /// Tier A.
    AsyncPostback,
    /// Tier B.
    CompletionPostback,
    /// Tier C. Success is assumed once invoked.
    FineValueOnly,
}

impl CapabilityTier {
    /// Picks the most preferred tier the descriptor declares.
    #[must_use]
    pub fn resolve(descriptor: &CapabilityDescriptor) -> Option<Self> {
        if descriptor.async_postback_update {
            Some(Self::AsyncPostback)
        } else if descriptor.completion_postback_update {
            Some(Self::CompletionPostback)
        } else if descriptor.fine_value_update {
            Some(Self::FineValueOnly)
        } else {
            None
        }
    }

    /// Whether this tier takes a typed coarse value.
    #[must_use]
    pub fn requires_coarse_value(self) -> bool {
        matches!(self, Self::AsyncPostback | Self::CompletionPostback)
    }

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AsyncPostback => "async_postback",
            Self::CompletionPostback => "completion_postback",
            Self::FineValueOnly => "fine_value_only",
        }
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-level companion signal to the fine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoarseValue {
    /// `"low"`
    Low,
    /// `"medium"`
    Medium,
    /// `"high"`
    High,
}

impl CoarseValue {
    /// Lower-case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for CoarseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoarseValue {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("low") {
            Ok(Self::Low)
        } else if s.eq_ignore_ascii_case("medium") {
            Ok(Self::Medium)
        } else if s.eq_ignore_ascii_case("high") {
            Ok(Self::High)
        } else {
            Err(ClientError::InvalidParameters(format!("unknown coarse value '{s}'")))
        }
    }
}

/// Failure reported by the external update mechanism.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum UpdaterError {
    /// The updater does not implement the requested tier.
    #[error("tier {0} is not supported by this updater")]
    Unsupported(CapabilityTier),

    /// The platform rejected the update.
    #[error("update rejected: {message}")]
    Rejected {
        /// Description reported by the platform.
        message: String,
        /// The underlying platform error.
        #[source]
        source: Option<BoxError>,
    },
}

impl UpdaterError {
    /// Creates a `Rejected` error without a source.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into(), source: None }
    }
}

/// The external conversion-value update mechanism.
///
/// One method per tier. Implementations override the tiers their platform
/// supports; the defaults report [`UpdaterError::Unsupported`].
#[async_trait]
pub trait PostbackUpdater: Send + Sync {
    /// Tier A: awaitable update of fine, coarse and lock window together.
    async fn update_postback(
        &self,
        fine_value: u32,
        coarse_value: Option<CoarseValue>,
        lock_window: bool,
    ) -> Result<(), UpdaterError> {
        let _ = (fine_value, coarse_value, lock_window);
        Err(UpdaterError::Unsupported(CapabilityTier::AsyncPostback))
    }

    /// Tier B: completion-style update of fine, coarse and lock window.
    ///
    /// Implementations bridge the platform completion into the returned
    /// future.
    async fn update_postback_with_completion(
        &self,
        fine_value: u32,
        coarse_value: Option<CoarseValue>,
        lock_window: bool,
    ) -> Result<(), UpdaterError> {
        let _ = (fine_value, coarse_value, lock_window);
        Err(UpdaterError::Unsupported(CapabilityTier::CompletionPostback))
    }

    /// Tier C: fire-and-forget fine value update.
    ///
    /// The platform reports no outcome, so the ratchet treats a returned
    /// `Ok` as success even though the true result is unobservable.
    fn update_fine_value(&self, fine_value: u32) -> Result<(), UpdaterError> {
        let _ = fine_value;
        Err(UpdaterError::Unsupported(CapabilityTier::FineValueOnly))
    }
}
