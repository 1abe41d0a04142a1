//! Retry coordinator behavior against a scripted exchange, on a paused clock.

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use attribution_client::{
    ClientConfig, ClientError, ClientMetrics, RetryCoordinator, SignedTransport, SigningCredentials,
    TransportErrorKind, testutil::ScriptedExchange,
};
use attribution_signing::{
    KEY_ID_HEADER, SIGNATURE_HEADER, SignedEnvelope, TIMESTAMP_HEADER, verify,
};
use serde_json::json;

fn coordinator(exchange: &ScriptedExchange) -> (RetryCoordinator, ClientMetrics) {
    let config = ClientConfig::builder()
        .project_token("tok")
        .base_url("https://api.test")
        .build()
        .expect("valid config");
    let metrics = ClientMetrics::new();
    let transport = Arc::new(SignedTransport::new(Arc::new(exchange.clone()), config.clone()));
    (RetryCoordinator::new(transport, config.retry().clone(), metrics.clone()), metrics)
}

fn gaps(exchange: &ScriptedExchange) -> Vec<Duration> {
    exchange.arrival_times().windows(2).map(|pair| pair[1] - pair[0]).collect()
}

#[tokio::test(start_paused = true)]
async fn backoff_schedule_is_2_4_8_16_seconds() {
    let exchange = ScriptedExchange::new();
    for _ in 0..4 {
        exchange.push_status(503, "unavailable");
    }
    exchange.push_json(&json!({"data": {"attempt": 4}}));
    let (coordinator, metrics) = coordinator(&exchange);

    let response = coordinator.execute("/api/client/init", &json!({})).await.expect("success");

    assert_eq!(response["data"]["attempt"], 4);
    assert_eq!(exchange.call_count(), 5);
    assert_eq!(
        gaps(&exchange),
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(16)
        ]
    );
    assert_eq!(metrics.snapshot().retry_count, 4);
    assert_eq!(metrics.snapshot().request_failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_surfaces_last_status_without_sixth_attempt() {
    let exchange = ScriptedExchange::new();
    for _ in 0..5 {
        exchange.push_status(500, "boom");
    }
    exchange.push_json(&json!({"data": {}}));
    let (coordinator, metrics) = coordinator(&exchange);

    let err = coordinator.execute("/e", &json!({})).await.expect_err("exhausted");

    match err {
        ClientError::HttpStatus { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(&body[..], b"boom");
        },
        other => panic!("expected HttpStatus(500), got {other:?}"),
    }
    assert_eq!(exchange.call_count(), 5);
    assert_eq!(metrics.snapshot().retry_exhausted_count, 1);
    assert_eq!(metrics.snapshot().request_failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn client_error_status_is_terminal_on_first_attempt() {
    let exchange = ScriptedExchange::new();
    exchange.push_status(400, "bad request");
    let (coordinator, metrics) = coordinator(&exchange);
    let start = tokio::time::Instant::now();

    let err = coordinator.execute("/e", &json!({})).await.expect_err("terminal");

    assert_eq!(err.status(), Some(400));
    assert_eq!(exchange.call_count(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(metrics.snapshot().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_and_transport_failures_are_retried() {
    let exchange = ScriptedExchange::new();
    exchange.push_status(429, "");
    exchange.push_transport_error(TransportErrorKind::NotConnected);
    exchange.push_transport_error(TransportErrorKind::CannotResolveHost);
    exchange.push_json(&json!({"data": {"ok": true}}));
    let (coordinator, _) = coordinator(&exchange);

    let response = coordinator.execute("/e", &json!({})).await.expect("success");

    assert_eq!(response["data"]["ok"], true);
    assert_eq!(exchange.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_transport_failure_keeps_its_kind() {
    let exchange = ScriptedExchange::new();
    for _ in 0..5 {
        exchange.push_transport_error(TransportErrorKind::TimedOut);
    }
    let (coordinator, _) = coordinator(&exchange);

    let err = coordinator.execute("/e", &json!({})).await.expect_err("exhausted");

    assert!(
        matches!(err, ClientError::Transport { kind: TransportErrorKind::TimedOut, .. }),
        "got {err:?}"
    );
    assert_eq!(exchange.call_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn undecodable_success_body_is_terminal() {
    let exchange = ScriptedExchange::new();
    exchange.push_status(200, "<html>oops</html>");
    let (coordinator, _) = coordinator(&exchange);

    let err = coordinator.execute("/e", &json!({})).await.expect_err("decoding");

    assert!(matches!(err, ClientError::Decoding { .. }));
    assert_eq!(exchange.call_count(), 1);
}

#[tokio::test]
async fn unencodable_body_fails_before_any_attempt() {
    let exchange = ScriptedExchange::new();
    let (coordinator, _) = coordinator(&exchange);

    let mut body = BTreeMap::new();
    body.insert(vec![1u8], 1);
    let err = coordinator.execute("/e", &body).await.expect_err("encoding");

    assert!(matches!(err, ClientError::Encoding { .. }));
    assert_eq!(exchange.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_retry_variant_makes_exactly_one_attempt() {
    let exchange = ScriptedExchange::new();
    exchange.push_status(503, "");
    exchange.push_json(&json!({"data": {}}));
    let (coordinator, _) = coordinator(&exchange);

    let err = coordinator.execute_no_retry("/e", &json!({})).await.expect_err("single attempt");

    assert_eq!(err.status(), Some(503));
    assert_eq!(exchange.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_attempt_is_signed_over_identical_bytes() {
    let exchange = ScriptedExchange::new();
    exchange.push_status(502, "");
    exchange.push_status(502, "");
    let (coordinator, _) = coordinator(&exchange);
    let credentials = SigningCredentials::new("key-7", "s3cret").expect("credentials");
    coordinator.transport().configure(credentials.clone());

    coordinator.execute("/e", &json!({"event": "install", "n": 1})).await.expect("success");

    let requests = exchange.requests();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(request.body, requests[0].body);
        let envelope = SignedEnvelope {
            signature: request.header(SIGNATURE_HEADER).expect("signature").to_owned(),
            timestamp_millis: request
                .header(TIMESTAMP_HEADER)
                .expect("timestamp")
                .parse()
                .expect("numeric timestamp"),
            key_id: request.header(KEY_ID_HEADER).expect("key id").to_owned(),
        };
        assert!(verify(Some(&request.body[..]), &envelope, &credentials));
    }
}

#[tokio::test(start_paused = true)]
async fn dropping_the_call_cancels_pending_backoff() {
    let exchange = ScriptedExchange::new();
    for _ in 0..5 {
        exchange.push_status(503, "");
    }
    let (coordinator, _) = coordinator(&exchange);

    let handle = tokio::spawn(async move { coordinator.execute("/e", &json!({})).await });

    // Attempts land at t=0 and t=2s; the next would be at t=6s.
    tokio::time::sleep(Duration::from_secs(3)).await;
    handle.abort();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(exchange.call_count(), 2);
}
