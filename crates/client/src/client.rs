//! The [`AttributionClient`] context object.
//!
//! One client is built per process by the host. It owns the project
//! configuration, the signed transport and retry coordinator, the ratchet
//! with its state handle, and the install instance id. Public event
//! operations never return errors: a failure is logged and counted, and the
//! caller receives `None`.
//!
//! Conversion hints in a response's `data` object (`fine_conversion_value`,
//! `coarse_conversion_value`, `lock_postback`) are handed to the ratchet on
//! a detached task, so a slow update never delays the caller. Hosts that
//! need those tasks finished (shutdown, tests) call
//! [`AttributionClient::flush_pending_updates`].

use std::sync::Arc;

use attribution_signing::SigningCredentials;
use attribution_storage::{ConversionState, ConversionStateStore, KeyValueStore};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::{sync::OnceCell, task::JoinSet};

use crate::{
    capability::{CapabilityDescriptor, PostbackUpdater},
    config::ClientConfig,
    error::{ClientError, ClientResult},
    http::{HttpExchange, JsonObject, UreqExchange},
    metrics::{ClientMetrics, ClientMetricsSnapshot},
    ratchet::{ConversionUpdateRequest, ConversionValueRatchet},
    retry::RetryCoordinator,
    transport::SignedTransport,
};

/// Key under which the install instance id is stored.
pub const INSTALL_INSTANCE_ID_KEY: &str = "attribution.install_instance_id";

/// Endpoint paths, relative to the base URL.
pub mod endpoints {
    /// SDK initialization.
    pub const INIT: &str = "/api/client/init";
    /// Built-in trigger events such as signup.
    pub const TRIGGER: &str = "/api/client/trigger";
    /// User profile updates.
    pub const SET_USER_DATA: &str = "/api/client/set-user-data";
    /// Custom events.
    pub const CAPTURE_EVENT: &str = "/api/client/capture-event";
    /// Purchases.
    pub const CAPTURE_PAYMENT: &str = "/api/client/capture-payment";
    /// Purchase reversals.
    pub const REMOVE_PAYMENT: &str = "/api/client/remove-captured-payment";
    /// Attribution lookup.
    pub const ATTRIBUTION_DATA: &str = "/api/client/attribution-data";
}

/// Supplies the opaque device context embedded in every request body.
pub trait DeviceContextProvider: Send + Sync {
    /// Returns the current device context.
    fn device_context(&self) -> Value;
}

impl DeviceContextProvider for Value {
    fn device_context(&self) -> Value {
        self.clone()
    }
}

/// User profile fields sent by [`AttributionClient::set_user_data`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, bon::Builder)]
pub struct UserData {
    /// Host-assigned user id.
    #[builder(into)]
    pub id: String,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub name: Option<String>,
    /// Email address.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub email: Option<String>,
    /// Phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub phone: Option<String>,
}

/// A purchase reported by [`AttributionClient::capture_payment`].
#[derive(Debug, Clone, PartialEq, Serialize, bon::Builder)]
pub struct PaymentData {
    /// Store transaction id.
    #[builder(into)]
    pub payment_id: String,
    /// Purchasing user, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub user_id: Option<String>,
    /// Amount in major currency units.
    pub amount: f64,
    /// ISO 4217 currency code.
    #[builder(into)]
    pub currency: String,
    /// Free-form type, e.g. `"subscription"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub payment_type: Option<String>,
    /// Free-form status, e.g. `"completed"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub status: Option<String>,
}

/// Reports lifecycle events and manages the conversion value for one install.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use attribution_client::{
///     AttributionClient, CapabilityDescriptor, ClientConfig, PostbackUpdater, UpdaterError,
/// };
/// use attribution_storage::MemoryStore;
///
/// struct FineValueOnly;
///
/// impl PostbackUpdater for FineValueOnly {
///     fn update_fine_value(&self, _fine_value: u32) -> Result<(), UpdaterError> {
///         Ok(())
///     }
/// }
///
/// # async fn run() -> Result<(), attribution_client::ClientError> {
/// let client = AttributionClient::builder()
///     .config(ClientConfig::builder().project_token("tok").base_url("https://a.example").build()?)
///     .store(Arc::new(MemoryStore::new()))
///     .updater(Arc::new(FineValueOnly))
///     .capabilities(CapabilityDescriptor { fine_value_update: true, ..Default::default() })
///     .build();
///
/// client.init().await;
/// client.track_event("level_complete", None).await;
/// client.flush_pending_updates().await;
/// # Ok(())
/// # }
/// ```
pub struct AttributionClient {
    config: ClientConfig,
    coordinator: RetryCoordinator,
    ratchet: Arc<ConversionValueRatchet>,
    store: Arc<dyn KeyValueStore>,
    device_context: Arc<dyn DeviceContextProvider>,
    package_version: String,
    install_id: OnceCell<String>,
    pending: Mutex<JoinSet<bool>>,
    metrics: ClientMetrics,
}

#[bon::bon]
impl AttributionClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated client configuration.
    /// * `store` - Durable key-value store for the install id and conversion state.
    /// * `updater` - External conversion-value update mechanism.
    ///
    /// # Optional Fields
    ///
    /// * `exchange` - HTTP primitive (default: a dedicated [`UreqExchange`]).
    /// * `capabilities` - Declared update tiers (default: none).
    /// * `device_context` - Context provider (default: an empty object).
    /// * `credentials` - Signing credentials (default: unsigned).
    /// * `package_version` - Version tag sent with requests (default: this crate's version).
    #[builder]
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        updater: Arc<dyn PostbackUpdater>,
        exchange: Option<Arc<dyn HttpExchange>>,
        #[builder(default)] capabilities: CapabilityDescriptor,
        device_context: Option<Arc<dyn DeviceContextProvider>>,
        credentials: Option<SigningCredentials>,
        #[builder(into, default = env!("CARGO_PKG_VERSION").to_owned())] package_version: String,
    ) -> Self {
        let metrics = ClientMetrics::new();
        let exchange: Arc<dyn HttpExchange> = match exchange {
            Some(exchange) => exchange,
            None => Arc::new(UreqExchange::new(config.connect_timeout(), config.request_timeout())),
        };
        let device_context: Arc<dyn DeviceContextProvider> = match device_context {
            Some(provider) => provider,
            None => Arc::new(Value::Object(JsonObject::new())),
        };

        let transport = Arc::new(SignedTransport::new(exchange, config.clone()));
        if let Some(credentials) = credentials {
            transport.configure(credentials);
        }
        let coordinator =
            RetryCoordinator::new(transport, config.retry().clone(), metrics.clone());

        let ratchet = Arc::new(ConversionValueRatchet::new(
            ConversionStateStore::new(Arc::clone(&store)),
            updater,
            capabilities,
            metrics.clone(),
        ));

        Self {
            config,
            coordinator,
            ratchet,
            store,
            device_context,
            package_version,
            install_id: OnceCell::new(),
            pending: Mutex::new(JoinSet::new()),
            metrics,
        }
    }
}

impl AttributionClient {
    /// Reports SDK initialization, then registers the initial conversion
    /// value on a detached task.
    pub async fn init(&self) -> Option<JsonObject> {
        let response = self.report(endpoints::INIT, JsonObject::new()).await?;

        let ratchet = Arc::clone(&self.ratchet);
        self.spawn_pending(async move { ratchet.register_initial_conversion_value().await });
        Some(response)
    }

    /// Reports a signup.
    pub async fn signup(&self) -> Option<JsonObject> {
        let mut extra = JsonObject::new();
        extra.insert("trigger".into(), Value::from("signup"));
        self.report_event(endpoints::TRIGGER, "signup", extra).await
    }

    /// Sends the user's profile.
    pub async fn set_user_data(&self, user: &UserData) -> Option<JsonObject> {
        if user.id.trim().is_empty() {
            return self.reject(endpoints::SET_USER_DATA, "user id cannot be empty");
        }
        let user = match serde_json::to_value(user) {
            Ok(user) => user,
            Err(e) => {
                let err = ClientError::encoding_with_source("failed to serialize user data", e);
                return self.log_outcome(endpoints::SET_USER_DATA, Err(err));
            },
        };
        let mut extra = JsonObject::new();
        extra.insert("user_data".into(), user);
        self.report(endpoints::SET_USER_DATA, extra).await
    }

    /// Reports a custom event.
    pub async fn track_event(
        &self,
        name: &str,
        properties: Option<JsonObject>,
    ) -> Option<JsonObject> {
        if name.trim().is_empty() {
            return self.reject(endpoints::CAPTURE_EVENT, "event name cannot be empty");
        }
        let mut extra = JsonObject::new();
        extra.insert("event_name".into(), Value::from(name));
        extra.insert("properties".into(), Value::Object(properties.unwrap_or_default()));
        self.report_event(endpoints::CAPTURE_EVENT, name, extra).await
    }

    /// Reports a purchase.
    pub async fn capture_payment(&self, payment: &PaymentData) -> Option<JsonObject> {
        if payment.payment_id.trim().is_empty() {
            return self.reject(endpoints::CAPTURE_PAYMENT, "payment id cannot be empty");
        }
        let payment = match serde_json::to_value(payment) {
            Ok(payment) => payment,
            Err(e) => {
                let err = ClientError::encoding_with_source("failed to serialize payment", e);
                return self.log_outcome(endpoints::CAPTURE_PAYMENT, Err(err));
            },
        };
        let mut extra = JsonObject::new();
        extra.insert("payment".into(), payment);
        self.report_event(endpoints::CAPTURE_PAYMENT, "capture_payment", extra).await
    }

    /// Reports that a previously captured purchase was reversed.
    pub async fn remove_payment(&self, payment_id: &str) -> Option<JsonObject> {
        if payment_id.trim().is_empty() {
            return self.reject(endpoints::REMOVE_PAYMENT, "payment id cannot be empty");
        }
        let mut extra = JsonObject::new();
        extra.insert("payment_id".into(), Value::from(payment_id));
        self.report_event(endpoints::REMOVE_PAYMENT, "remove_payment", extra).await
    }

    /// Fetches attribution data with a single attempt.
    ///
    /// Returns the response's `data` object.
    pub async fn attribution_data(&self) -> Option<JsonObject> {
        let result = async {
            let body = self.request_body(JsonObject::new()).await?;
            let mut response =
                self.coordinator.execute_no_retry(endpoints::ATTRIBUTION_DATA, &body).await?;
            match response.remove("data") {
                Some(Value::Object(data)) => Ok(data),
                _ => Err(ClientError::decoding("response has no data object")),
            }
        }
        .await;
        self.log_outcome(endpoints::ATTRIBUTION_DATA, result)
    }

    /// Installs signing credentials for subsequent requests.
    pub fn configure_signing(&self, credentials: SigningCredentials) {
        self.coordinator.transport().configure(credentials);
    }

    /// Builds credentials from a base64-encoded secret and installs them.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidParameters`] if the key id is empty or
    /// the secret is not valid, non-empty base64. The current credentials are
    /// kept in that case.
    pub fn configure_signing_base64(&self, key_id: &str, secret_b64: &str) -> ClientResult<()> {
        let credentials = SigningCredentials::from_base64(key_id, secret_b64)?;
        self.configure_signing(credentials);
        Ok(())
    }

    /// Clears signing credentials; subsequent requests are unsigned.
    pub fn reset_signing(&self) {
        self.coordinator.transport().reset();
    }

    /// Applies a conversion-value update directly.
    pub async fn update_conversion_value(&self, request: ConversionUpdateRequest) -> bool {
        self.ratchet.update_conversion_value(request).await
    }

    /// Returns the persisted conversion state.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the record cannot be read.
    pub async fn conversion_state(&self) -> ClientResult<ConversionState> {
        Ok(self.ratchet.state().await?)
    }

    /// Returns this install's instance id, creating and persisting one on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the id cannot be read or saved.
    pub async fn install_instance_id(&self) -> ClientResult<String> {
        self.install_id
            .get_or_try_init(|| async {
                if let Some(raw) = self.store.get(INSTALL_INSTANCE_ID_KEY).await?
                    && let Ok(existing) = std::str::from_utf8(&raw)
                    && !existing.is_empty()
                {
                    return Ok(existing.to_owned());
                }
                let id = uuid::Uuid::new_v4().to_string();
                self.store.set(INSTALL_INSTANCE_ID_KEY, id.clone().into_bytes()).await?;
                tracing::debug!(install_instance_id = %id, "generated install instance id");
                Ok::<_, ClientError>(id)
            })
            .await
            .cloned()
    }

    /// Waits for every detached conversion task; returns how many succeeded.
    pub async fn flush_pending_updates(&self) -> usize {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        let mut succeeded = 0;
        while let Some(result) = pending.join_next().await {
            match result {
                Ok(true) => succeeded += 1,
                Ok(false) => {},
                Err(e) => tracing::warn!(error = %e, "conversion task did not complete"),
            }
        }
        succeeded
    }

    /// Returns the ratchet.
    #[must_use]
    pub fn ratchet(&self) -> &Arc<ConversionValueRatchet> {
        &self.ratchet
    }

    /// Returns the retry coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &RetryCoordinator {
        &self.coordinator
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns a snapshot of the client counters.
    #[must_use]
    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn report_event(
        &self,
        endpoint: &'static str,
        source_tag: &str,
        extra: JsonObject,
    ) -> Option<JsonObject> {
        let response = self.report(endpoint, extra).await?;
        if let Some(request) = conversion_hint(&response, source_tag) {
            let ratchet = Arc::clone(&self.ratchet);
            self.spawn_pending(async move { ratchet.update_conversion_value(request).await });
        }
        Some(response)
    }

    async fn report(&self, endpoint: &'static str, extra: JsonObject) -> Option<JsonObject> {
        let result = async {
            let body = self.request_body(extra).await?;
            self.coordinator.execute(endpoint, &body).await
        }
        .await;
        self.log_outcome(endpoint, result)
    }

    async fn request_body(&self, extra: JsonObject) -> ClientResult<JsonObject> {
        let mut body = JsonObject::new();
        body.insert("token".into(), Value::from(self.config.project_token()));
        body.insert("platform".into(), Value::from(self.config.platform()));
        body.insert("package_version".into(), Value::from(self.package_version.as_str()));
        body.insert("install_instance_id".into(), Value::from(self.install_instance_id().await?));
        body.insert("device_data".into(), self.device_context.device_context());
        body.extend(extra);
        Ok(body)
    }

    fn reject(&self, endpoint: &'static str, reason: &str) -> Option<JsonObject> {
        self.log_outcome(endpoint, Err(ClientError::InvalidParameters(reason.to_owned())))
    }

    fn log_outcome(
        &self,
        endpoint: &'static str,
        result: ClientResult<JsonObject>,
    ) -> Option<JsonObject> {
        match result {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::warn!(endpoint, error = %err, "attribution request failed");
                None
            },
        }
    }

    fn spawn_pending<F>(&self, task: F)
    where
        F: std::future::Future<Output = bool> + Send + 'static,
    {
        let mut pending = self.pending.lock();
        while pending.try_join_next().is_some() {}
        pending.spawn(task);
    }
}

impl std::fmt::Debug for AttributionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributionClient")
            .field("base_url", &self.config.base_url())
            .field("platform", &self.config.platform())
            .finish_non_exhaustive()
    }
}

/// Extracts a conversion update from a response's `data` object.
///
/// Returns `None` unless `data.fine_conversion_value` is a non-negative
/// integer that fits in `u32`.
pub(crate) fn conversion_hint(
    response: &JsonObject,
    source_tag: &str,
) -> Option<ConversionUpdateRequest> {
    let data = response.get("data")?.as_object()?;
    let raw_fine = data.get("fine_conversion_value")?;
    let Some(fine_value) = raw_fine.as_u64().and_then(|v| u32::try_from(v).ok()) else {
        tracing::debug!(value = %raw_fine, "ignoring malformed fine_conversion_value");
        return None;
    };

    Some(
        ConversionUpdateRequest::builder()
            .fine_value(fine_value)
            .maybe_coarse_value(data.get("coarse_conversion_value").and_then(Value::as_str))
            .lock_window(data.get("lock_postback").and_then(Value::as_bool).unwrap_or(false))
            .source_tag(source_tag)
            .build(),
    )
}
