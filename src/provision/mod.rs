//! Shared provisioning plumbing for the launch paths.
//!
//! Both the restore path and the fresh-create path need the same three
//! ingredients before an instance can boot: the shared security group, a
//! usable key pair, and a launch that blocks until the instance reports
//! `running`. [`Provisioner`] owns that plumbing so the lifecycle and the
//! snapshot manager stay focused on their own decisions.

use thiserror::Error;
use uuid::Uuid;

use crate::key_store::{KeyStoreError, KeyWriter};
use crate::poll::{PollError, PollPolicy, wait_for_status};
use crate::provider::{CloudProvider, InstanceRunningProbe, LaunchSpec};

const KEY_PAIR_NAME_PREFIX: &str = "roost-key-pair-";

/// Provider-independent provisioning inputs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionSettings {
    /// Name of the shared security group, created on first use.
    pub security_group: String,
    /// Commercial instance type for launches.
    pub instance_type: String,
    /// Key-pair name to reuse; a fresh pair is minted when absent.
    pub key_pair_name: Option<String>,
}

/// Errors raised while provisioning an instance.
#[derive(Debug, Error)]
pub enum ProvisionError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the shared security group cannot be resolved or created.
    #[error("failed to provision security group {name}: {source}")]
    SecurityGroup {
        /// Security group name.
        name: String,
        /// Underlying provider error.
        #[source]
        source: E,
    },
    /// Raised when a key pair cannot be created.
    #[error("failed to create key pair {name}: {source}")]
    KeyPair {
        /// Key-pair name being created.
        name: String,
        /// Underlying provider error.
        #[source]
        source: E,
    },
    /// Raised when private key material cannot be persisted.
    #[error("failed to store private key: {0}")]
    KeyFile(#[from] KeyStoreError),
    /// Raised when no usable base image can be resolved.
    #[error("failed to resolve base image: {source}")]
    BaseImage {
        /// Underlying provider error.
        #[source]
        source: E,
    },
    /// Raised when the snapshot lookup for a restore fails.
    #[error("failed to search snapshots: {source}")]
    SnapshotLookup {
        /// Underlying provider error.
        #[source]
        source: E,
    },
    /// Raised when an image cannot be registered from a snapshot.
    #[error("failed to register image from snapshot {snapshot_id}: {source}")]
    ImageRegistry {
        /// Snapshot backing the image.
        snapshot_id: String,
        /// Underlying provider error.
        #[source]
        source: E,
    },
    /// Raised when the launch call itself fails.
    #[error("failed to launch instance: {source}")]
    Launch {
        /// Underlying provider error.
        #[source]
        source: E,
    },
    /// Raised when a launched instance never reaches `running`.
    #[error("instance did not reach running state: {0}")]
    NotRunning(#[source] PollError<E>),
}

/// Provisions instances through a [`CloudProvider`], resolving the shared
/// security group and key material on demand.
#[derive(Debug)]
pub struct Provisioner<'a, P, W> {
    provider: &'a P,
    key_writer: &'a W,
    settings: &'a ProvisionSettings,
    poll: PollPolicy,
}

impl<'a, P, W> Provisioner<'a, P, W>
where
    P: CloudProvider,
    W: KeyWriter,
{
    /// Creates a provisioner with the default polling policy.
    #[must_use]
    pub fn new(provider: &'a P, key_writer: &'a W, settings: &'a ProvisionSettings) -> Self {
        Self {
            provider,
            key_writer,
            settings,
            poll: PollPolicy::default(),
        }
    }

    /// Overrides the polling policy used while waiting for readiness.
    #[must_use]
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Launches an instance from `image_id` and waits until it is running.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the security group, key pair,
    /// launch, or readiness wait fails.
    pub async fn launch_from_image(
        &self,
        profile: &str,
        image_id: &str,
        restored: bool,
    ) -> Result<String, ProvisionError<P::Error>> {
        let security_group_id = self.ensure_security_group().await?;
        let key_pair_name = self.resolve_key_pair().await?;

        let spec = LaunchSpec::new(
            profile,
            image_id,
            self.settings.instance_type.as_str(),
            security_group_id,
            key_pair_name,
        )
        .restored(restored);

        let instance_id = self
            .provider
            .launch_instance(&spec)
            .await
            .map_err(|source| ProvisionError::Launch { source })?;

        tracing::info!(profile, instance_id, restored, "instance launched");

        let probe = InstanceRunningProbe::new(self.provider, &instance_id);
        wait_for_status(&probe, &self.poll)
            .await
            .map_err(ProvisionError::NotRunning)?;

        Ok(instance_id)
    }

    /// Resolves the newest base image and launches a fresh instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when image resolution or the launch
    /// fails.
    pub async fn provision_fresh(
        &self,
        profile: &str,
    ) -> Result<String, ProvisionError<P::Error>> {
        let image_id = self
            .provider
            .latest_base_image()
            .await
            .map_err(|source| ProvisionError::BaseImage { source })?;
        tracing::info!(profile, image_id, "no snapshot found; launching fresh instance");
        self.launch_from_image(profile, &image_id, false).await
    }

    /// Finds the shared security group, creating it on first use.
    ///
    /// Creation is check-then-create; when two callers race, the loser
    /// re-reads and adopts the winner's group.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::SecurityGroup`] when lookup and creation
    /// both fail.
    pub async fn ensure_security_group(&self) -> Result<String, ProvisionError<P::Error>> {
        let name = &self.settings.security_group;
        let wrap = |source| ProvisionError::SecurityGroup {
            name: name.clone(),
            source,
        };

        if let Some(id) = self.provider.find_security_group(name).await.map_err(wrap)? {
            return Ok(id);
        }

        match self.provider.create_security_group(name).await {
            Ok(id) => Ok(id),
            Err(create_err) => {
                // A concurrent caller may have created it between the
                // lookup and our create.
                let existing = self.provider.find_security_group(name).await.map_err(wrap)?;
                existing.ok_or_else(|| wrap(create_err))
            }
        }
    }

    /// Returns the configured key-pair name, minting a new pair (and
    /// persisting its private key) when none is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::KeyPair`] when the provider call fails and
    /// [`ProvisionError::KeyFile`] when the private key cannot be stored.
    pub async fn resolve_key_pair(&self) -> Result<String, ProvisionError<P::Error>> {
        if let Some(name) = self
            .settings
            .key_pair_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
        {
            return Ok(name.trim().to_owned());
        }

        let name = generated_key_pair_name();
        let material =
            self.provider
                .create_key_pair(&name)
                .await
                .map_err(|source| ProvisionError::KeyPair {
                    name: name.clone(),
                    source,
                })?;
        let path = self.key_writer.write_private_key(&material)?;
        tracing::info!(key_pair = material.name.as_str(), path = path.as_str(), "created key pair");
        Ok(material.name)
    }
}

fn generated_key_pair_name() -> String {
    format!("{KEY_PAIR_NAME_PREFIX}{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests;
