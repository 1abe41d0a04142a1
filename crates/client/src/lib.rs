//! Attribution client core.
//!
//! Reports lifecycle events to an attribution service over a signed,
//! retried request pipeline, and maintains the install's conversion value
//! through a monotonic ratchet.
//!
//! # Architecture
//!
//! ```text
//!  lifecycle events                      response hints
//!        │                                     │
//!        ▼                                     ▼
//! ┌──────────────────┐              ┌──────────────────────────┐
//! │ RetryCoordinator │              │  ConversionValueRatchet  │
//! ├──────────────────┤              ├──────────────────────────┤
//! │ SignedTransport  │              │   ConversionStateStore   │
//! ├──────────────────┤              ├──────────────────────────┤
//! │ Canonical signer │              │  PostbackUpdater (tiers) │
//! ├──────────────────┤              └──────────────────────────┘
//! │  HttpExchange    │
//! └──────────────────┘
//! ```
//!
//! [`AttributionClient`] ties the two halves together: event responses that
//! carry conversion hints are handed to the ratchet on detached tasks.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a scripted HTTP
//!   exchange and a recording postback updater.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ratchet;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod transport;

pub use capability::{
    CapabilityDescriptor, CapabilityTier, CoarseValue, PostbackUpdater, UpdaterError,
};
pub use client::{
    AttributionClient, DeviceContextProvider, INSTALL_INSTANCE_ID_KEY, PaymentData, UserData,
    endpoints,
};
pub use config::{
    ClientConfig, DEFAULT_BACKOFF_FACTOR, DEFAULT_BASE_DELAY, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, DEFAULT_PLATFORM, DEFAULT_REQUEST_TIMEOUT, RetryConfig,
};
pub use error::{BoxError, ClientError, ClientResult, TransportErrorKind};
pub use http::{HttpExchange, HttpRequest, HttpResponse, JsonObject, UreqExchange};
pub use metrics::{ClientMetrics, ClientMetricsSnapshot};
pub use ratchet::{
    ConversionUpdateRequest, ConversionValueRatchet, REGISTRATION_SOURCE_TAG, RatchetError,
    RegisterOutcome, UpdateOutcome,
};
pub use retry::RetryCoordinator;
pub use transport::{CONTENT_TYPE, RequestAttempt, SignedTransport};

pub use attribution_signing::SigningCredentials;
pub use attribution_storage::{ConversionState, FileStore, KeyValueStore, MemoryStore};
