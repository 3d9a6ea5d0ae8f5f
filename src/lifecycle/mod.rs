//! Profile lifecycle orchestration: reuse, restore, create, retire.
//!
//! Each operation runs inside the profile's lease lock, so two operators
//! racing on one profile are linearised rather than interleaved. The
//! resolution order on `ensure` is fixed: a live instance wins, then a
//! snapshot restore, then a fresh launch. `retire` snapshots the root
//! volume before termination is issued; losing an instance without a
//! snapshot is a data-loss condition this ordering must never risk.

use thiserror::Error;

use crate::artifacts::{CleanupReport, SnapshotManager};
use crate::key_store::KeyWriter;
use crate::lock::{AcquireRetry, LeaseLock, LockError, LockStore};
use crate::poll::PollPolicy;
use crate::provider::{CloudProvider, InstanceSummary};
use crate::provision::{ProvisionError, ProvisionSettings, Provisioner};

/// Derives the lease lock identifier for a profile.
#[must_use]
pub fn lock_id_for_profile(profile: &str) -> String {
    format!("profile-{profile}")
}

/// How `ensure` arrived at a live instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisionSource {
    /// An instance was already live; nothing was mutated.
    Reused,
    /// The instance was launched from a profile snapshot.
    Restored,
    /// The instance was launched fresh from the base image.
    Created,
}

impl std::fmt::Display for ProvisionSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Reused => "reused",
            Self::Restored => "restored from snapshot",
            Self::Created => "created from base image",
        };
        formatter.write_str(label)
    }
}

/// Result of a successful `ensure`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnsureOutcome {
    /// Identifier of the live instance.
    pub instance_id: String,
    /// Public address, when the provider has assigned one.
    pub public_address: Option<String>,
    /// How the instance was obtained.
    pub source: ProvisionSource,
}

/// Result of a successful `retire`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetireOutcome {
    /// Instance that was terminated.
    pub instance_id: String,
    /// Snapshot confirmed before termination was issued.
    pub snapshot_id: String,
    /// Best-effort sweep of artifacts superseded by the new snapshot.
    pub cleanup: CleanupReport,
}

/// Errors raised by lifecycle operations.
///
/// Every variant names the profile and the phase that failed, so an
/// operator can diagnose without provider-level debugging.
#[derive(Debug, Error)]
pub enum LifecycleError<PE, LE>
where
    PE: std::error::Error + 'static,
    LE: std::error::Error + 'static,
{
    /// Raised when the lease lock is never acquired within the budget.
    #[error("timed out waiting for the lifecycle lock on profile {profile} ({waited_secs}s)")]
    LockTimeout {
        /// Contended profile.
        profile: String,
        /// Seconds spent retrying acquisition.
        waited_secs: u64,
    },
    /// Raised when locking fails for reasons other than contention.
    #[error("locking profile {profile} failed: {source}")]
    Lock {
        /// Profile being locked.
        profile: String,
        /// Underlying lock error.
        #[source]
        source: LockError<LE>,
    },
    /// Raised when searching for a live instance fails.
    #[error("searching for an instance for profile {profile} failed: {source}")]
    Search {
        /// Profile being searched.
        profile: String,
        /// Underlying provider error.
        #[source]
        source: PE,
    },
    /// Raised when restoring from a snapshot fails.
    #[error("restoring profile {profile} failed: {source}")]
    Restore {
        /// Profile being restored.
        profile: String,
        /// Underlying provisioning error.
        #[source]
        source: ProvisionError<PE>,
    },
    /// Raised when launching a fresh instance fails.
    #[error("launching a fresh instance for profile {profile} failed: {source}")]
    Create {
        /// Profile being provisioned.
        profile: String,
        /// Underlying provisioning error.
        #[source]
        source: ProvisionError<PE>,
    },
    /// Raised when `retire` finds no live instance.
    #[error("no live instance found for profile {profile}")]
    NoInstance {
        /// Profile that has nothing to retire.
        profile: String,
    },
    /// Raised when the root volume cannot be resolved before snapshotting.
    #[error("resolving the root volume for profile {profile} failed: {source}")]
    Volume {
        /// Profile being retired.
        profile: String,
        /// Underlying provider error.
        #[source]
        source: PE,
    },
    /// Raised when snapshotting fails; termination is never attempted.
    #[error("snapshotting profile {profile} before termination failed: {source}")]
    Snapshot {
        /// Profile being retired.
        profile: String,
        /// Underlying provider error.
        #[source]
        source: PE,
    },
    /// Raised when termination fails after the snapshot was confirmed.
    #[error("terminating instance {instance_id} for profile {profile} failed: {source}")]
    Terminate {
        /// Profile being retired.
        profile: String,
        /// Instance that could not be terminated.
        instance_id: String,
        /// Underlying provider error.
        #[source]
        source: PE,
    },
}

/// Serialises and executes lifecycle operations per profile.
#[derive(Debug)]
pub struct LifecycleOrchestrator<P, S, W>
where
    P: CloudProvider,
    S: LockStore,
    W: KeyWriter,
{
    provider: P,
    lock: LeaseLock<S>,
    key_writer: W,
    settings: ProvisionSettings,
    acquire_retry: AcquireRetry,
    poll: PollPolicy,
}

impl<P, S, W> LifecycleOrchestrator<P, S, W>
where
    P: CloudProvider,
    S: LockStore,
    W: KeyWriter,
{
    /// Creates an orchestrator with default retry and polling policies.
    #[must_use]
    pub fn new(provider: P, lock: LeaseLock<S>, key_writer: W, settings: ProvisionSettings) -> Self {
        Self {
            provider,
            lock,
            key_writer,
            settings,
            acquire_retry: AcquireRetry::default(),
            poll: PollPolicy::default(),
        }
    }

    /// Overrides the lock acquisition retry cadence.
    ///
    /// This is primarily used by tests to keep contention scenarios fast.
    #[must_use]
    pub fn with_acquire_retry(mut self, retry: AcquireRetry) -> Self {
        self.acquire_retry = retry;
        self
    }

    /// Overrides the status polling policy.
    ///
    /// This is primarily used by tests to keep readiness waits fast.
    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Returns a live instance for `profile`, reusing, restoring, or
    /// creating one as needed.
    ///
    /// Calling `ensure` again while an instance is live returns the same
    /// instance id without issuing any mutation.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] naming the profile and failed phase. The
    /// lease lock is released on every exit.
    pub async fn ensure(
        &self,
        profile: &str,
    ) -> Result<EnsureOutcome, LifecycleError<P::Error, S::Error>> {
        let lock_id = lock_id_for_profile(profile);
        self.acquire(profile, &lock_id).await?;
        let outcome = self.ensure_locked(profile).await;
        self.release(&lock_id).await;
        outcome
    }

    /// Snapshots and terminates the live instance for `profile`.
    ///
    /// The snapshot id is confirmed before termination is issued, and
    /// artifacts superseded by the new snapshot are swept best-effort
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NoInstance`] when nothing is live, and
    /// other [`LifecycleError`] variants naming the failed phase. The lease
    /// lock is released on every exit.
    pub async fn retire(
        &self,
        profile: &str,
    ) -> Result<RetireOutcome, LifecycleError<P::Error, S::Error>> {
        let lock_id = lock_id_for_profile(profile);
        self.acquire(profile, &lock_id).await?;
        let outcome = self.retire_locked(profile).await;
        self.release(&lock_id).await;
        outcome
    }

    async fn ensure_locked(
        &self,
        profile: &str,
    ) -> Result<EnsureOutcome, LifecycleError<P::Error, S::Error>> {
        if let Some(instance) = self.find_live_instance(profile).await? {
            tracing::info!(
                profile,
                instance_id = instance.id.as_str(),
                "reusing live instance"
            );
            return Ok(EnsureOutcome {
                instance_id: instance.id,
                public_address: instance.public_address,
                source: ProvisionSource::Reused,
            });
        }

        let provisioner = Provisioner::new(&self.provider, &self.key_writer, &self.settings)
            .with_poll_policy(self.poll.clone());
        let manager = SnapshotManager::new(&self.provider);

        let restore_attempt = manager
            .restore_from_snapshot(profile, &provisioner)
            .await
            .map_err(|source| LifecycleError::Restore {
                profile: profile.to_owned(),
                source,
            })?;

        if let Some(restored) = restore_attempt {
            // Older snapshots are superseded by the one just restored.
            let report = manager
                .delete_stale_artifacts(profile, Some(&restored.snapshot_id))
                .await;
            if !report.is_clean() {
                tracing::warn!(
                    profile,
                    warnings = report.warnings.len(),
                    "stale artifact sweep left residue"
                );
            }
            let public_address = self.lookup_address(&restored.instance_id).await;
            return Ok(EnsureOutcome {
                instance_id: restored.instance_id,
                public_address,
                source: ProvisionSource::Restored,
            });
        }

        let instance_id = provisioner.provision_fresh(profile).await.map_err(|source| {
            LifecycleError::Create {
                profile: profile.to_owned(),
                source,
            }
        })?;
        let public_address = self.lookup_address(&instance_id).await;
        Ok(EnsureOutcome {
            instance_id,
            public_address,
            source: ProvisionSource::Created,
        })
    }

    async fn retire_locked(
        &self,
        profile: &str,
    ) -> Result<RetireOutcome, LifecycleError<P::Error, S::Error>> {
        let Some(instance) = self.find_live_instance(profile).await? else {
            return Err(LifecycleError::NoInstance {
                profile: profile.to_owned(),
            });
        };

        let volume_id = self
            .provider
            .root_volume_id(&instance.id)
            .await
            .map_err(|source| LifecycleError::Volume {
                profile: profile.to_owned(),
                source,
            })?;

        let manager = SnapshotManager::new(&self.provider);
        let snapshot_id = manager
            .create_snapshot(&volume_id, &instance.id, profile)
            .await
            .map_err(|source| LifecycleError::Snapshot {
                profile: profile.to_owned(),
                source,
            })?;

        self.provider
            .terminate_instance(&instance.id)
            .await
            .map_err(|source| LifecycleError::Terminate {
                profile: profile.to_owned(),
                instance_id: instance.id.clone(),
                source,
            })?;
        tracing::info!(
            profile,
            instance_id = instance.id.as_str(),
            snapshot_id = snapshot_id.as_str(),
            "instance terminated"
        );

        let cleanup = manager
            .delete_stale_artifacts(profile, Some(&snapshot_id))
            .await;

        Ok(RetireOutcome {
            instance_id: instance.id,
            snapshot_id,
            cleanup,
        })
    }

    async fn find_live_instance(
        &self,
        profile: &str,
    ) -> Result<Option<InstanceSummary>, LifecycleError<P::Error, S::Error>> {
        self.provider
            .find_instance(profile)
            .await
            .map_err(|source| LifecycleError::Search {
                profile: profile.to_owned(),
                source,
            })
    }

    async fn acquire(
        &self,
        profile: &str,
        lock_id: &str,
    ) -> Result<(), LifecycleError<P::Error, S::Error>> {
        self.lock
            .ensure_ready()
            .await
            .map_err(|source| LifecycleError::Lock {
                profile: profile.to_owned(),
                source,
            })?;

        match self.lock.acquire_with_retry(lock_id, &self.acquire_retry).await {
            Ok(()) => Ok(()),
            Err(LockError::Timeout { waited_secs, .. }) => Err(LifecycleError::LockTimeout {
                profile: profile.to_owned(),
                waited_secs,
            }),
            Err(source) => Err(LifecycleError::Lock {
                profile: profile.to_owned(),
                source,
            }),
        }
    }

    /// Releases the lease; failures are logged, never propagated, so the
    /// primary outcome survives.
    async fn release(&self, lock_id: &str) {
        if let Err(err) = self.lock.release(lock_id).await {
            tracing::warn!(lock_id, "failed to release lifecycle lock: {err}");
        }
    }

    /// Best-effort address lookup for reporting; never fails the caller.
    async fn lookup_address(&self, instance_id: &str) -> Option<String> {
        match self.provider.describe_instance(instance_id).await {
            Ok(summary) => summary.and_then(|instance| instance.public_address),
            Err(err) => {
                tracing::warn!(instance_id, "failed to look up instance address: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests;
