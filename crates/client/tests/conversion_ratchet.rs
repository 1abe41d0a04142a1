//! Conversion-value ratchet: monotonicity, idempotence, serialization and
//! durability.

#![allow(clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use attribution_client::{
    CapabilityDescriptor, ClientMetrics, CoarseValue, ConversionUpdateRequest,
    ConversionValueRatchet, RatchetError, RegisterOutcome,
    testutil::RecordingUpdater,
};
use attribution_storage::{
    ConversionStateStore, FileStore, KeyValueStore, MemoryStore, testutil::FlakyStore,
};

fn ratchet_over(
    store: Arc<dyn KeyValueStore>,
    updater: &RecordingUpdater,
) -> ConversionValueRatchet {
    ConversionValueRatchet::new(
        ConversionStateStore::new(store),
        Arc::new(updater.clone()),
        CapabilityDescriptor::all(),
        ClientMetrics::new(),
    )
}

fn request(fine: u32, coarse: Option<&str>, lock: bool) -> ConversionUpdateRequest {
    ConversionUpdateRequest::builder()
        .fine_value(fine)
        .maybe_coarse_value(coarse)
        .lock_window(lock)
        .source_tag("test")
        .build()
}

#[tokio::test]
async fn stored_value_tracks_running_maximum() {
    let updater = RecordingUpdater::new();
    let ratchet = ratchet_over(Arc::new(MemoryStore::new()), &updater);

    let sequence = [(3, true), (1, false), (7, true), (7, true), (5, false), (9, true), (0, false)];
    let mut running_max = 0;
    for (fine, expected) in sequence {
        let applied = ratchet.update_conversion_value(request(fine, None, false)).await;
        running_max = running_max.max(fine);

        assert_eq!(applied, expected, "update to {fine}");
        let state = ratchet.state().await.expect("state");
        assert_eq!(state.last_fine_value, running_max, "after update to {fine}");
    }
    // 3, 7 and 9 reached the updater; the repeated 7 was a no-op.
    assert_eq!(updater.call_count(), 3);
}

#[tokio::test]
async fn identical_triple_is_applied_once() {
    let updater = RecordingUpdater::new();
    let ratchet = ratchet_over(Arc::new(MemoryStore::new()), &updater);

    assert!(ratchet.update_conversion_value(request(5, Some("low"), false)).await);
    assert!(ratchet.update_conversion_value(request(5, Some("LOW"), false)).await);

    assert_eq!(updater.call_count(), 1);
}

#[tokio::test]
async fn concurrent_update_is_rejected_without_side_effects() {
    let updater = RecordingUpdater::new();
    let ratchet = Arc::new(ratchet_over(Arc::new(MemoryStore::new()), &updater));
    updater.close_gate();

    let first = {
        let ratchet = Arc::clone(&ratchet);
        tokio::spawn(async move { ratchet.update_conversion_value(request(5, None, false)).await })
    };
    updater.entered().await;

    let second = ratchet.try_update_conversion_value(&request(6, None, false)).await;
    assert!(matches!(second, Err(RatchetError::InFlight)));
    assert_eq!(updater.call_count(), 1);
    assert_eq!(ratchet.state().await.expect("state").last_fine_value, 0);

    updater.open_gate();
    updater.release_one();
    assert!(first.await.expect("join"));
    assert_eq!(ratchet.state().await.expect("state").last_fine_value, 5);

    // The guard is free again once the first update has persisted.
    let next = tokio::time::timeout(
        Duration::from_secs(5),
        ratchet.update_conversion_value(request(6, None, false)),
    )
    .await
    .expect("follow-up update completes");
    assert!(next);
    assert_eq!(updater.call_count(), 2);
}

#[tokio::test]
async fn registration_in_flight_blocks_updates() {
    let updater = RecordingUpdater::new();
    let ratchet = Arc::new(ratchet_over(Arc::new(MemoryStore::new()), &updater));
    updater.close_gate();

    let registration = {
        let ratchet = Arc::clone(&ratchet);
        tokio::spawn(async move { ratchet.register_initial_conversion_value().await })
    };
    updater.entered().await;

    assert!(!ratchet.update_conversion_value(request(2, None, false)).await);

    updater.open_gate();
    updater.release_one();
    assert!(registration.await.expect("join"));
    assert!(ratchet.state().await.expect("state").registered);
}

#[tokio::test]
async fn registration_runs_once() {
    let updater = RecordingUpdater::new();
    let ratchet = ratchet_over(Arc::new(MemoryStore::new()), &updater);

    let first = ratchet.try_register_initial_conversion_value().await.expect("first");
    let second = ratchet.try_register_initial_conversion_value().await.expect("second");

    assert!(matches!(first, RegisterOutcome::Registered { .. }));
    assert_eq!(second, RegisterOutcome::AlreadyRegistered);
    assert_eq!(updater.call_count(), 1);
    assert_eq!(updater.calls()[0].coarse_value, Some(CoarseValue::Low));
}

#[tokio::test]
async fn failed_persist_leaves_state_unchanged() {
    let store = FlakyStore::new();
    let updater = RecordingUpdater::new();
    let ratchet = ratchet_over(Arc::new(store.clone()), &updater);

    store.fail_writes(true);
    let result = ratchet.try_update_conversion_value(&request(4, Some("high"), false)).await;
    assert!(matches!(result, Err(RatchetError::Storage(_))));
    assert_eq!(ratchet.state().await.expect("state").last_fine_value, 0);

    store.fail_writes(false);
    assert!(ratchet.update_conversion_value(request(4, Some("high"), false)).await);
    assert_eq!(ratchet.state().await.expect("state").last_fine_value, 4);
    assert_eq!(updater.call_count(), 2);
}

#[tokio::test]
async fn ratchet_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("attribution.json");
    let updater = RecordingUpdater::new();

    {
        let store = FileStore::open(&path).await.expect("open");
        let ratchet = ratchet_over(Arc::new(store), &updater);
        assert!(ratchet.register_initial_conversion_value().await);
        assert!(ratchet.update_conversion_value(request(9, Some("medium"), true)).await);
    }

    let store = FileStore::open(&path).await.expect("reopen");
    let ratchet = ratchet_over(Arc::new(store), &updater);

    assert!(!ratchet.update_conversion_value(request(4, Some("high"), false)).await);
    assert_eq!(
        ratchet.try_register_initial_conversion_value().await.expect("register"),
        RegisterOutcome::AlreadyRegistered
    );
    let state = ratchet.state().await.expect("state");
    assert_eq!(state.last_fine_value, 9);
    assert_eq!(state.last_coarse_value.as_deref(), Some("medium"));
    assert!(state.last_lock_window);
    assert_eq!(updater.call_count(), 2);
}
