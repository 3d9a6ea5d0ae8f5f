//! Tests for the lease lock over an in-memory store.

use std::time::Duration;

use crate::poll::PollPolicy;
use crate::test_support::FakeLockStore;

use super::{AcquireRetry, LeaseLock, LockError};

fn fast_retry() -> AcquireRetry {
    AcquireRetry {
        interval: Duration::from_millis(1),
        budget: Duration::from_millis(20),
    }
}

fn lock_over(store: FakeLockStore) -> LeaseLock<FakeLockStore> {
    LeaseLock::new(store).with_poll_policy(PollPolicy::fast(10))
}

#[tokio::test]
async fn acquire_writes_entry_and_release_removes_it() {
    let store = FakeLockStore::with_active_table();
    let lock = lock_over(store.clone());

    lock.acquire("profile-alpha")
        .await
        .unwrap_or_else(|err| panic!("acquire: {err}"));
    assert!(store.holder_expiry("profile-alpha").is_some());
    assert!(
        lock.is_held("profile-alpha")
            .await
            .unwrap_or_else(|err| panic!("is_held: {err}"))
    );

    lock.release("profile-alpha")
        .await
        .unwrap_or_else(|err| panic!("release: {err}"));
    assert!(store.holder_expiry("profile-alpha").is_none());
    assert!(
        !lock
            .is_held("profile-alpha")
            .await
            .unwrap_or_else(|err| panic!("is_held: {err}"))
    );
}

#[tokio::test]
async fn second_acquire_observes_already_held() {
    let store = FakeLockStore::with_active_table();
    let lock = lock_over(store);

    lock.acquire("profile-alpha")
        .await
        .unwrap_or_else(|err| panic!("first acquire: {err}"));
    let err = lock
        .acquire("profile-alpha")
        .await
        .expect_err("second acquire should lose");
    assert!(matches!(err, LockError::AlreadyHeld { .. }));
}

#[tokio::test]
async fn expired_entry_is_acquired_even_though_the_row_exists() {
    let store = FakeLockStore::with_active_table();
    store.seed_lock("profile-alpha", 1);
    let lock = lock_over(store.clone());

    lock.acquire("profile-alpha")
        .await
        .unwrap_or_else(|err| panic!("stale lease should be evicted: {err}"));
    let expiry = store
        .holder_expiry("profile-alpha")
        .unwrap_or_else(|| panic!("entry should exist after acquisition"));
    assert!(expiry > 1, "expiry should be refreshed, got {expiry}");
}

#[tokio::test]
async fn acquire_with_retry_times_out_under_contention() {
    let store = FakeLockStore::with_active_table();
    let lock = lock_over(store);

    lock.acquire("profile-alpha")
        .await
        .unwrap_or_else(|err| panic!("first acquire: {err}"));
    let err = lock
        .acquire_with_retry("profile-alpha", &fast_retry())
        .await
        .expect_err("contended acquire should time out");
    assert!(matches!(err, LockError::Timeout { .. }), "unexpected: {err}");
}

#[tokio::test]
async fn acquire_with_retry_wins_after_release() {
    let store = FakeLockStore::with_active_table();
    let lock = lock_over(store.clone());

    lock.acquire("profile-alpha")
        .await
        .unwrap_or_else(|err| panic!("first acquire: {err}"));

    let contender = lock.clone();
    let waiter = tokio::spawn(async move {
        contender
            .acquire_with_retry(
                "profile-alpha",
                &AcquireRetry {
                    interval: Duration::from_millis(1),
                    budget: Duration::from_secs(5),
                },
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(5)).await;
    lock.release("profile-alpha")
        .await
        .unwrap_or_else(|err| panic!("release: {err}"));

    waiter
        .await
        .unwrap_or_else(|err| panic!("join: {err}"))
        .unwrap_or_else(|err| panic!("waiter should acquire after release: {err}"));
}

#[tokio::test]
async fn releasing_a_lock_not_held_is_not_an_error() {
    let store = FakeLockStore::with_active_table();
    let lock = lock_over(store);
    lock.release("profile-unknown")
        .await
        .unwrap_or_else(|err| panic!("release should be idempotent: {err}"));
}

#[tokio::test]
async fn ensure_ready_creates_missing_table_and_waits_for_active() {
    let store = FakeLockStore::new();
    store.set_status_ticks_until_active(2);
    let lock = lock_over(store.clone());

    lock.ensure_ready()
        .await
        .unwrap_or_else(|err| panic!("ensure_ready: {err}"));
    assert_eq!(store.create_table_calls(), 1);

    // Idempotent on the second call: the table already exists.
    lock.ensure_ready()
        .await
        .unwrap_or_else(|err| panic!("second ensure_ready: {err}"));
    assert_eq!(store.create_table_calls(), 1);
}

#[tokio::test]
async fn ensure_ready_tolerates_losing_the_creation_race() {
    let store = FakeLockStore::new();
    store.fail_create_table_with_existing();
    let lock = lock_over(store.clone());

    lock.ensure_ready()
        .await
        .unwrap_or_else(|err| panic!("lost race should be harmless: {err}"));
    assert_eq!(store.create_table_calls(), 1);
}
