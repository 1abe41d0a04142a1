//! Durable key-value state for the attribution client.
//!
//! This crate provides the [`KeyValueStore`] trait the host environment
//! implements, two backends, and the typed [`ConversionStateStore`] that
//! holds the conversion-value ratchet's record.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Conversion-Value Ratchet (client)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  ConversionStateStore                       │
//! │        (one JSON record, non-decreasing fine value)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    KeyValueStore trait                      │
//! │                    (get, set, delete)                       │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryStore  │            FileStore / host store            │
//! │  (testing)   │               (durable)                      │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use attribution_storage::{ConversionStateStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let states = ConversionStateStore::new(Arc::new(MemoryStore::new()));
//!
//!     let mut state = states.load().await?;
//!     assert_eq!(state.last_fine_value, 0);
//!
//!     state.last_fine_value = 7;
//!     states.save(&state).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a fault-injecting store.

#![deny(unsafe_code)]

pub mod backend;
pub mod conversion;
pub mod error;
pub mod file;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use backend::{JsonStoreExt, KeyValueStore};
pub use conversion::{CONVERSION_STATE_KEY, ConversionState, ConversionStateStore};
pub use error::{BoxError, StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
