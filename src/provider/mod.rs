//! Cloud provider abstraction for profile-tagged compute resources.
//!
//! The orchestrator never talks to a provider SDK directly; it goes through
//! [`CloudProvider`], which models the tag-filtered queries and mutations
//! the lifecycle needs. The AWS binding lives in [`crate::aws`]; tests use
//! the in-memory fake from [`crate::test_support`].

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::poll::{ProbeFuture, StatusProbe};

/// Tag key carrying the profile name on managed resources.
pub const PROFILE_TAG_KEY: &str = "Name";
/// Tag key marking resources owned by this tool.
pub const MANAGED_BY_TAG_KEY: &str = "ManagedBy";
/// Tag value marking resources owned by this tool.
pub const MANAGED_BY_TAG_VALUE: &str = "roost";
/// Tag key marking instances launched from a snapshot.
pub const RESTORED_TAG_KEY: &str = "Restored";

/// Instance state names reported by the provider.
pub mod state {
    /// Instance is being prepared.
    pub const PENDING: &str = "pending";
    /// Instance is live.
    pub const RUNNING: &str = "running";
    /// Instance is shutting down towards termination.
    pub const SHUTTING_DOWN: &str = "shutting-down";
    /// Instance has been terminated.
    pub const TERMINATED: &str = "terminated";
}

/// Point-in-time view of a managed instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSummary {
    /// Provider identifier for the instance.
    pub id: String,
    /// Profile the instance is tagged with.
    pub profile: String,
    /// Current instance state name.
    pub state: String,
    /// Public address, when one has been assigned.
    pub public_address: Option<String>,
    /// Launch time in epoch seconds, when reported.
    pub launched_at: Option<i64>,
    /// Whether the instance was launched from a snapshot.
    pub restored: bool,
}

/// Point-in-time view of a managed snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotSummary {
    /// Provider identifier for the snapshot.
    pub id: String,
    /// Profile the snapshot is tagged with.
    pub profile: String,
    /// Instance the snapshot was taken from, when recorded.
    pub source_instance_id: Option<String>,
    /// Creation time in epoch seconds.
    pub created_at: i64,
}

/// Key-pair name plus the private key material returned on creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyMaterial {
    /// Provider key-pair name.
    pub name: String,
    /// PEM-encoded private key.
    pub private_key_pem: String,
}

/// Parameters for launching one managed instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Profile the instance is tagged with.
    pub profile: String,
    /// Image to boot from.
    pub image_id: String,
    /// Commercial instance type.
    pub instance_type: String,
    /// Security group attached to the instance.
    pub security_group_id: String,
    /// Key pair installed for SSH access.
    pub key_pair_name: String,
    /// Whether the image derives from a profile snapshot.
    pub restored: bool,
}

impl LaunchSpec {
    /// Builds a launch spec for a fresh (non-restored) instance.
    #[must_use]
    pub fn new(
        profile: impl Into<String>,
        image_id: impl Into<String>,
        instance_type: impl Into<String>,
        security_group_id: impl Into<String>,
        key_pair_name: impl Into<String>,
    ) -> Self {
        Self {
            profile: profile.into(),
            image_id: image_id.into(),
            instance_type: instance_type.into(),
            security_group_id: security_group_id.into(),
            key_pair_name: key_pair_name.into(),
            restored: false,
        }
    }

    /// Marks the spec as restoring from a snapshot-derived image.
    #[must_use]
    pub const fn restored(mut self, restored: bool) -> Self {
        self.restored = restored;
        self
    }

    /// Validates that every required field is populated.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchSpecError`] naming the first empty field.
    pub fn validate(&self) -> Result<(), LaunchSpecError> {
        let fields = [
            ("profile", &self.profile),
            ("image_id", &self.image_id),
            ("instance_type", &self.instance_type),
            ("security_group_id", &self.security_group_id),
            ("key_pair_name", &self.key_pair_name),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(LaunchSpecError::MissingField(name.to_owned()));
            }
        }
        Ok(())
    }
}

/// Errors raised while validating a [`LaunchSpec`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum LaunchSpecError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    MissingField(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Interface the lifecycle uses to reach the cloud provider.
///
/// Every query is scoped to resources carrying the managed-by marker, so
/// unrelated account resources are never touched.
pub trait CloudProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Finds the live (`running` or `pending`) instance for a profile.
    fn find_instance<'a>(
        &'a self,
        profile: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceSummary>, Self::Error>;

    /// Describes one instance by id regardless of state.
    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceSummary>, Self::Error>;

    /// Lists every managed instance in any state.
    fn list_instances(&self) -> ProviderFuture<'_, Vec<InstanceSummary>, Self::Error>;

    /// Launches an instance and returns its id without waiting for readiness.
    fn launch_instance<'a>(
        &'a self,
        spec: &'a LaunchSpec,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Reads the current state name of one instance.
    fn instance_state<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Issues termination for one instance.
    fn terminate_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Resolves the root volume backing one instance.
    fn root_volume_id<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Resolves the newest usable base image for fresh provisioning.
    fn latest_base_image(&self) -> ProviderFuture<'_, String, Self::Error>;

    /// Creates a profile-tagged snapshot of a volume.
    fn create_snapshot<'a>(
        &'a self,
        volume_id: &'a str,
        instance_id: &'a str,
        profile: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Lists snapshots tagged for one profile.
    fn list_snapshots<'a>(
        &'a self,
        profile: &'a str,
    ) -> ProviderFuture<'a, Vec<SnapshotSummary>, Self::Error>;

    /// Lists every managed snapshot across profiles.
    fn list_all_snapshots(&self) -> ProviderFuture<'_, Vec<SnapshotSummary>, Self::Error>;

    /// Looks up an image by its exact name.
    fn find_image_by_name<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error>;

    /// Registers an image backed by a snapshot under the given name.
    fn register_image<'a>(
        &'a self,
        name: &'a str,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Lists images whose backing snapshot matches.
    fn images_backed_by<'a>(
        &'a self,
        snapshot_id: &'a str,
    ) -> ProviderFuture<'a, Vec<String>, Self::Error>;

    /// Deregisters one image.
    fn deregister_image<'a>(&'a self, image_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Deletes one snapshot.
    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str)
    -> ProviderFuture<'a, (), Self::Error>;

    /// Looks up the shared security group by name.
    fn find_security_group<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error>;

    /// Creates the shared security group and returns its id.
    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Creates a key pair and returns its private key material.
    fn create_key_pair<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, KeyMaterial, Self::Error>;
}

/// Probe that waits for an instance to report `running`.
#[derive(Debug)]
pub struct InstanceRunningProbe<'a, P: CloudProvider> {
    provider: &'a P,
    instance_id: &'a str,
}

impl<'a, P: CloudProvider> InstanceRunningProbe<'a, P> {
    /// Creates a probe for one instance.
    #[must_use]
    pub const fn new(provider: &'a P, instance_id: &'a str) -> Self {
        Self {
            provider,
            instance_id,
        }
    }
}

impl<P: CloudProvider> StatusProbe for InstanceRunningProbe<'_, P> {
    type Error = P::Error;

    fn current_status(&self) -> ProbeFuture<'_, String, Self::Error> {
        self.provider.instance_state(self.instance_id)
    }

    fn is_target(&self, status: &str) -> bool {
        status == state::RUNNING
    }

    fn is_error(&self, status: &str) -> bool {
        status == state::TERMINATED || status == state::SHUTTING_DOWN
    }

    fn resource_id(&self) -> &str {
        self.instance_id
    }

    fn resource_kind(&self) -> &'static str {
        "instance"
    }
}
