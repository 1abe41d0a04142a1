//! End-to-end flows through [`AttributionClient`] with scripted collaborators.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use attribution_client::{
    AttributionClient, CapabilityDescriptor, CapabilityTier, ClientConfig, ClientError, CoarseValue,
    INSTALL_INSTANCE_ID_KEY, KeyValueStore, MemoryStore, PaymentData, SigningCredentials, UserData,
    endpoints,
    testutil::{RecordingUpdater, ScriptedExchange},
};
use attribution_signing::{AUTHORIZATION_HEADER, KEY_ID_HEADER, SIGNATURE_HEADER};
use serde_json::{Value, json};

struct Harness {
    client: AttributionClient,
    exchange: ScriptedExchange,
    updater: RecordingUpdater,
}

fn harness_with(store: MemoryStore, capabilities: CapabilityDescriptor) -> Harness {
    let exchange = ScriptedExchange::new();
    let updater = RecordingUpdater::new();
    let config = ClientConfig::builder()
        .project_token("tok_test")
        .base_url("https://attribution.test")
        .build()
        .expect("valid config");

    let client = AttributionClient::builder()
        .config(config)
        .exchange(Arc::new(exchange.clone()))
        .store(Arc::new(store))
        .updater(Arc::new(updater.clone()))
        .capabilities(capabilities)
        .device_context(Arc::new(json!({"os": "ios", "os_version": "17.2"})))
        .package_version("1.2.3")
        .build();

    Harness { client, exchange, updater }
}

fn harness() -> Harness {
    harness_with(MemoryStore::new(), CapabilityDescriptor::all())
}

fn body_of(exchange: &ScriptedExchange, index: usize) -> Value {
    serde_json::from_slice(&exchange.requests()[index].body).expect("json body")
}

#[tokio::test]
async fn init_registers_initial_conversion_value() {
    let h = harness();

    assert!(h.client.init().await.is_some());
    assert_eq!(h.client.flush_pending_updates().await, 1);

    let state = h.client.conversion_state().await.expect("state");
    assert!(state.registered);
    assert_eq!(state.last_fine_value, 0);
    let calls = h.updater.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].coarse_value, Some(CoarseValue::Low));
    assert_eq!(h.exchange.requests()[0].url, "https://attribution.test/api/client/init");
}

#[tokio::test]
async fn request_body_carries_identity_and_device_context() {
    let h = harness();

    h.client.track_event("level_complete", None).await.expect("response");

    let body = body_of(&h.exchange, 0);
    assert_eq!(body["token"], "tok_test");
    assert_eq!(body["platform"], "ios");
    assert_eq!(body["package_version"], "1.2.3");
    assert_eq!(body["event_name"], "level_complete");
    assert_eq!(body["device_data"], json!({"os": "ios", "os_version": "17.2"}));
    assert!(body["install_instance_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn install_instance_id_is_stable_across_clients() {
    let store = MemoryStore::new();
    let first = harness_with(store.clone(), CapabilityDescriptor::all());
    let id = first.client.install_instance_id().await.expect("id");

    let second = harness_with(store.clone(), CapabilityDescriptor::all());
    assert_eq!(second.client.install_instance_id().await.expect("id"), id);

    let stored = store.get(INSTALL_INSTANCE_ID_KEY).await.expect("get").expect("present");
    assert_eq!(&stored[..], id.as_bytes());
}

#[tokio::test]
async fn response_hint_feeds_the_ratchet() {
    let h = harness();
    h.exchange.push_json(&json!({
        "data": {
            "fine_conversion_value": 4,
            "coarse_conversion_value": "Medium",
            "lock_postback": true
        }
    }));

    let payment = PaymentData::builder().payment_id("p-1").amount(9.99).currency("EUR").build();
    let response = h.client.capture_payment(&payment).await.expect("response");
    assert_eq!(response["data"]["fine_conversion_value"], 4);
    assert_eq!(h.client.flush_pending_updates().await, 1);

    let state = h.client.conversion_state().await.expect("state");
    assert_eq!(state.last_fine_value, 4);
    assert_eq!(state.last_coarse_value.as_deref(), Some("medium"));
    assert!(state.last_lock_window);

    let calls = h.updater.calls();
    let call = &calls[0];
    assert_eq!(call.tier, CapabilityTier::AsyncPostback);
    assert_eq!(call.coarse_value, Some(CoarseValue::Medium));

    let body = body_of(&h.exchange, 0);
    assert_eq!(body["payment"]["payment_id"], "p-1");
}

#[tokio::test]
async fn lower_hint_does_not_regress_state() {
    let h = harness();
    h.exchange.push_json(&json!({"data": {"fine_conversion_value": 10}}));
    h.exchange.push_json(&json!({"data": {"fine_conversion_value": 3}}));

    h.client.signup().await.expect("signup");
    h.client.flush_pending_updates().await;
    h.client.track_event("purchase", None).await.expect("event");
    assert_eq!(h.client.flush_pending_updates().await, 0);

    assert_eq!(h.client.conversion_state().await.expect("state").last_fine_value, 10);
    assert_eq!(h.updater.call_count(), 1);
    assert_eq!(h.client.metrics().conversion_rejected_count, 1);
}

#[tokio::test]
async fn response_without_hint_leaves_ratchet_alone() {
    let h = harness();
    h.exchange.push_json(&json!({"data": {"coarse_conversion_value": "high"}}));

    h.client.track_event("open", None).await.expect("event");

    assert_eq!(h.client.flush_pending_updates().await, 0);
    assert_eq!(h.updater.call_count(), 0);
}

#[tokio::test]
async fn failures_return_none_instead_of_erroring() {
    let h = harness();
    h.exchange.push_status(400, "bad");

    assert!(h.client.signup().await.is_none());
    assert!(h.client.track_event("  ", None).await.is_none());
    assert!(h.client.remove_payment("").await.is_none());
    assert!(h.client.set_user_data(&UserData::default()).await.is_none());

    // Only the signup reached the network.
    assert_eq!(h.exchange.call_count(), 1);
    assert_eq!(h.client.metrics().request_failure_count, 1);
}

#[tokio::test]
async fn set_user_data_sends_profile() {
    let h = harness();
    let user = UserData::builder().id("u-42").email("u42@example.com").build();

    assert!(h.client.set_user_data(&user).await.is_some());

    let body = body_of(&h.exchange, 0);
    let url = format!("https://attribution.test{}", endpoints::SET_USER_DATA);
    assert_eq!(h.exchange.requests()[0].url, url);
    assert_eq!(body["user_data"], json!({"id": "u-42", "email": "u42@example.com"}));
}

#[tokio::test]
async fn attribution_data_is_single_attempt() {
    let h = harness();
    h.exchange.push_status(503, "");
    h.exchange.push_json(&json!({"data": {"campaign": "spring"}}));

    assert!(h.client.attribution_data().await.is_none());
    assert_eq!(h.exchange.call_count(), 1);

    let data = h.client.attribution_data().await.expect("data");
    assert_eq!(data["campaign"], "spring");
}

#[tokio::test]
async fn signing_can_be_toggled_at_runtime() {
    let h = harness();

    h.client.signup().await.expect("unsigned");
    h.client.configure_signing(SigningCredentials::new("key-1", "secret").expect("credentials"));
    h.client.signup().await.expect("signed");
    h.client.reset_signing();
    h.client.signup().await.expect("unsigned again");

    let requests = h.exchange.requests();
    assert!(requests[0].header(SIGNATURE_HEADER).is_none());
    assert_eq!(requests[1].header(AUTHORIZATION_HEADER), Some("HMAC-SHA256"));
    assert!(requests[1].header(SIGNATURE_HEADER).is_some());
    assert!(requests[2].header(SIGNATURE_HEADER).is_none());
}

#[tokio::test]
async fn base64_signing_secret_is_validated() {
    let h = harness();

    let err = h.client.configure_signing_base64("key-1", "not base64!").expect_err("bad secret");
    assert!(matches!(err, ClientError::InvalidParameters(_)), "got {err:?}");
    let err = h.client.configure_signing_base64("", "c2VjcmV0").expect_err("empty key id");
    assert!(matches!(err, ClientError::InvalidParameters(_)), "got {err:?}");
    h.client.signup().await.expect("unsigned");

    h.client.configure_signing_base64("key-2", "c2VjcmV0").expect("valid secret");
    h.client.signup().await.expect("signed");

    let requests = h.exchange.requests();
    assert!(requests[0].header(SIGNATURE_HEADER).is_none());
    assert_eq!(requests[1].header(KEY_ID_HEADER), Some("key-2"));
    assert!(requests[1].header(SIGNATURE_HEADER).is_some());
}

#[tokio::test]
async fn fine_only_platform_uses_oldest_tier() {
    let h = harness_with(
        MemoryStore::new(),
        CapabilityDescriptor { fine_value_update: true, ..Default::default() },
    );
    h.exchange.push_json(&json!({
        "data": {"fine_conversion_value": 2, "coarse_conversion_value": "high"}
    }));

    h.client.track_event("tutorial_done", None).await.expect("event");
    h.client.flush_pending_updates().await;

    assert_eq!(h.updater.tiers(), vec![CapabilityTier::FineValueOnly]);
    assert_eq!(h.client.conversion_state().await.expect("state").last_fine_value, 2);
}
