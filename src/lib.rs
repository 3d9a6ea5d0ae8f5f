//! Core library for the Roost instance manager.
//!
//! The crate provisions, reuses, and tears down single short-lived compute
//! instances identified by an operator-chosen profile name. A TTL-based
//! lease lock serialises concurrent operators per profile, and the
//! lifecycle orchestrator decides between reusing a live instance,
//! restoring one from a saved snapshot, and provisioning fresh.

pub mod artifacts;
pub mod aws;
pub mod config;
pub mod key_store;
pub mod lifecycle;
pub mod listing;
pub mod lock;
pub mod poll;
pub mod provider;
pub mod provision;
pub mod test_support;

pub use artifacts::{CleanupReport, RestoredInstance, SnapshotManager, image_name_for_snapshot};
pub use aws::{AwsClients, AwsError, AwsProvider, DynamoLockStore};
pub use config::{ConfigError, RoostConfig};
pub use key_store::{KeyStoreError, KeyWriter, PemKeyStore};
pub use lifecycle::{
    EnsureOutcome, LifecycleError, LifecycleOrchestrator, ProvisionSource, RetireOutcome,
    lock_id_for_profile,
};
pub use listing::{ProfileRow, collect_profiles, render_table};
pub use lock::{AcquireRetry, LeaseLock, LockError, LockStore, PutOutcome};
pub use poll::{PollError, PollPolicy, StatusProbe, wait_for_status};
pub use provider::{
    CloudProvider, InstanceSummary, KeyMaterial, LaunchSpec, SnapshotSummary,
};
pub use provision::{ProvisionError, ProvisionSettings, Provisioner};
