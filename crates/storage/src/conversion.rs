//! Durable conversion-value state.
//!
//! One [`ConversionState`] record exists per install, stored as JSON under
//! [`CONVERSION_STATE_KEY`]. The record is created lazily: reading an install
//! that has never been written yields [`ConversionState::default`].
//!
//! [`ConversionStateStore::save`] refuses to persist a fine value lower than
//! the one already on disk, so the non-decreasing guarantee holds even if a
//! caller bypasses the ratchet.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    backend::{JsonStoreExt, KeyValueStore},
    error::{StorageError, StorageResult},
};

/// Fixed namespace key of the conversion state record.
pub const CONVERSION_STATE_KEY: &str = "attribution.conversion_state";

/// Last conversion value applied for this install, plus registration metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionState {
    /// Last fine value successfully reported. Never decreases.
    pub last_fine_value: u32,
    /// Last coarse value reported, lower-cased.
    pub last_coarse_value: Option<String>,
    /// Lock-window flag of the last report.
    pub last_lock_window: bool,
    /// Whether the initial registration has completed.
    pub registered: bool,
    /// When the initial registration completed.
    pub registered_at: Option<DateTime<Utc>>,
}

impl ConversionState {
    /// Returns `true` if `fine`, `coarse` and `lock_window` equal the stored triple.
    ///
    /// `coarse` is compared case-insensitively.
    #[must_use]
    pub fn matches(&self, fine: u32, coarse: Option<&str>, lock_window: bool) -> bool {
        let coarse_matches = match (self.last_coarse_value.as_deref(), coarse) {
            (None, None) => true,
            (Some(stored), Some(requested)) => stored.eq_ignore_ascii_case(requested),
            _ => false,
        };
        self.last_fine_value == fine && coarse_matches && self.last_lock_window == lock_window
    }
}

/// Typed access to the [`ConversionState`] record.
#[derive(Clone)]
pub struct ConversionStateStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl ConversionStateStore {
    /// Creates a state store over `store` using [`CONVERSION_STATE_KEY`].
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(store, CONVERSION_STATE_KEY)
    }

    /// Creates a state store over `store` using a custom key.
    #[must_use]
    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    /// Loads the current state, or the defaults if none has been written.
    ///
    /// # Errors
    ///
    /// Propagates backend errors and [`StorageError::Serialization`] for a
    /// corrupt record.
    pub async fn load(&self) -> StorageResult<ConversionState> {
        Ok(self.store.get_json::<ConversionState>(&self.key).await?.unwrap_or_default())
    }

    /// Persists `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FineValueRegression`] if `state.last_fine_value`
    /// is lower than the persisted value, otherwise propagates backend errors.
    pub async fn save(&self, state: &ConversionState) -> StorageResult<()> {
        let current = self.load().await?;
        if state.last_fine_value < current.last_fine_value {
            return Err(StorageError::FineValueRegression {
                stored: current.last_fine_value,
                attempted: state.last_fine_value,
            });
        }
        self.store.set_json(&self.key, state).await
    }
}
