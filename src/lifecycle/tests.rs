//! Tests for orchestrator locking and ordering mechanics.

use std::time::Duration;

use crate::lock::{AcquireRetry, LeaseLock};
use crate::poll::PollPolicy;
use crate::test_support::{FakeCloud, FakeLockStore, LockEvent, NullKeyWriter, test_settings};

use super::{LifecycleError, LifecycleOrchestrator, lock_id_for_profile};

pub(crate) fn fast_orchestrator(
    cloud: FakeCloud,
    store: FakeLockStore,
) -> LifecycleOrchestrator<FakeCloud, FakeLockStore, NullKeyWriter> {
    let lock = LeaseLock::new(store).with_poll_policy(PollPolicy::fast(10));
    LifecycleOrchestrator::new(cloud, lock, NullKeyWriter, test_settings())
        .with_poll_policy(PollPolicy::fast(10))
        .with_acquire_retry(AcquireRetry {
            interval: Duration::from_millis(1),
            budget: Duration::from_millis(100),
        })
}

fn assert_lock_cycle(events: &[LockEvent], lock_id: &str) {
    let expected = vec![
        LockEvent::Acquired(lock_id.to_owned()),
        LockEvent::Released(lock_id.to_owned()),
    ];
    assert_eq!(events, expected.as_slice(), "expected one acquire/release cycle");
}

#[test]
fn lock_ids_are_profile_scoped() {
    assert_eq!(lock_id_for_profile("alpha"), "profile-alpha");
}

#[tokio::test]
async fn ensure_releases_the_lock_on_success() {
    let cloud = FakeCloud::new();
    let store = FakeLockStore::new();
    let orchestrator = fast_orchestrator(cloud, store.clone());

    orchestrator
        .ensure("alpha")
        .await
        .unwrap_or_else(|err| panic!("ensure: {err}"));
    assert_lock_cycle(&store.events(), "profile-alpha");
}

#[tokio::test]
async fn ensure_releases_the_lock_on_failure() {
    let cloud = FakeCloud::new();
    cloud.set_launch_stuck_state("terminated");
    let store = FakeLockStore::new();
    let orchestrator = fast_orchestrator(cloud, store.clone());

    let err = orchestrator
        .ensure("alpha")
        .await
        .expect_err("stuck launch should fail");
    assert!(matches!(err, LifecycleError::Create { .. }), "unexpected: {err}");
    assert_lock_cycle(&store.events(), "profile-alpha");
}

#[tokio::test]
async fn retire_without_instance_fails_and_releases_the_lock() {
    let cloud = FakeCloud::new();
    let store = FakeLockStore::new();
    let orchestrator = fast_orchestrator(cloud, store.clone());

    let err = orchestrator
        .retire("alpha")
        .await
        .expect_err("nothing to retire");
    assert!(
        matches!(err, LifecycleError::NoInstance { ref profile } if profile == "alpha"),
        "unexpected: {err}"
    );
    assert_lock_cycle(&store.events(), "profile-alpha");
}

#[tokio::test]
async fn snapshot_failure_prevents_termination() {
    let cloud = FakeCloud::new();
    let instance_id = cloud.seed_instance("alpha");
    cloud.fail_create_snapshot();
    let store = FakeLockStore::new();
    let orchestrator = fast_orchestrator(cloud.clone(), store.clone());

    let err = orchestrator
        .retire("alpha")
        .await
        .expect_err("snapshot failure should abort");
    assert!(matches!(err, LifecycleError::Snapshot { .. }), "unexpected: {err}");
    assert_eq!(cloud.terminate_calls(), 0);
    assert_eq!(
        cloud.instance_state_of(&instance_id).as_deref(),
        Some("running"),
        "instance must survive a failed snapshot"
    );
    assert_lock_cycle(&store.events(), "profile-alpha");
}

#[tokio::test]
async fn terminate_failure_keeps_the_confirmed_snapshot() {
    let cloud = FakeCloud::new();
    cloud.seed_instance("alpha");
    cloud.fail_terminate();
    let store = FakeLockStore::new();
    let orchestrator = fast_orchestrator(cloud.clone(), store.clone());

    let err = orchestrator
        .retire("alpha")
        .await
        .expect_err("terminate failure should surface");
    assert!(matches!(err, LifecycleError::Terminate { .. }), "unexpected: {err}");
    assert_eq!(cloud.snapshot_count("alpha"), 1);
    assert_lock_cycle(&store.events(), "profile-alpha");
}

#[tokio::test]
async fn contended_profile_times_out_with_lock_timeout() {
    let cloud = FakeCloud::new();
    let store = FakeLockStore::with_active_table();
    // A live holder that never expires within the retry budget.
    store.seed_lock("profile-alpha", i64::MAX);
    let orchestrator = fast_orchestrator(cloud, store);

    let err = orchestrator
        .ensure("alpha")
        .await
        .expect_err("held lock should time out");
    assert!(
        matches!(err, LifecycleError::LockTimeout { ref profile, .. } if profile == "alpha"),
        "unexpected: {err}"
    );
}
