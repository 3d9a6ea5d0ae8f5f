//! Snapshot and image management tied to a profile.
//!
//! Snapshots are the durable form of a retired profile: one is taken
//! immediately before termination and the newest one seeds the next
//! restore. Images registered from snapshots are named deterministically
//! so retried restores reuse instead of duplicating, and stale artifacts
//! are swept best-effort once a newer snapshot supersedes them.

use crate::key_store::KeyWriter;
use crate::provider::{CloudProvider, SnapshotSummary};
use crate::provision::{ProvisionError, Provisioner};

/// Prefix of image names derived from snapshot ids.
pub const IMAGE_NAME_PREFIX: &str = "roost-ami-from-";

/// Deterministic image name for a snapshot, shared by restore attempts.
#[must_use]
pub fn image_name_for_snapshot(snapshot_id: &str) -> String {
    format!("{IMAGE_NAME_PREFIX}{snapshot_id}")
}

/// Instance restored from a profile snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestoredInstance {
    /// Identifier of the launched instance.
    pub instance_id: String,
    /// Snapshot the instance was restored from.
    pub snapshot_id: String,
    /// Image registered (or reused) for the restore.
    pub image_id: String,
}

/// Outcome of a best-effort artifact sweep.
///
/// Sweep failures never fail the caller's primary operation; they are
/// logged and collected here for reporting.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupReport {
    /// Snapshots deleted during the sweep.
    pub deleted_snapshots: Vec<String>,
    /// Images deregistered during the sweep.
    pub deleted_images: Vec<String>,
    /// Human-readable descriptions of skipped failures.
    pub warnings: Vec<String>,
}

impl CleanupReport {
    /// Returns true when the sweep completed without skipped failures.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Manages point-in-time artifacts for profiles through a provider.
#[derive(Debug)]
pub struct SnapshotManager<'a, P: CloudProvider> {
    provider: &'a P,
}

impl<'a, P: CloudProvider> SnapshotManager<'a, P> {
    /// Creates a manager over the given provider.
    #[must_use]
    pub const fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    /// Creates a profile-tagged snapshot of `volume_id`.
    ///
    /// # Errors
    ///
    /// Returns the provider error when snapshot creation fails; the caller
    /// must treat this as fatal since nothing has been mutated yet.
    pub async fn create_snapshot(
        &self,
        volume_id: &str,
        instance_id: &str,
        profile: &str,
    ) -> Result<String, P::Error> {
        let snapshot_id = self
            .provider
            .create_snapshot(volume_id, instance_id, profile)
            .await?;
        tracing::info!(profile, instance_id, snapshot_id, "snapshot created");
        Ok(snapshot_id)
    }

    /// Returns the newest snapshot tagged for `profile`, when any exists.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the listing fails.
    pub async fn latest_snapshot(
        &self,
        profile: &str,
    ) -> Result<Option<SnapshotSummary>, P::Error> {
        let snapshots = self.provider.list_snapshots(profile).await?;
        Ok(snapshots
            .into_iter()
            .max_by_key(|snapshot| snapshot.created_at))
    }

    /// Registers an image from `snapshot_id`, reusing any image already
    /// registered under the deterministic name.
    ///
    /// # Errors
    ///
    /// Returns the provider error when lookup or registration fails.
    pub async fn ensure_image(&self, snapshot_id: &str) -> Result<String, P::Error> {
        let name = image_name_for_snapshot(snapshot_id);
        if let Some(image_id) = self.provider.find_image_by_name(&name).await? {
            tracing::debug!(snapshot_id, image_id, "reusing registered image");
            return Ok(image_id);
        }
        let image_id = self.provider.register_image(&name, snapshot_id).await?;
        tracing::info!(snapshot_id, image_id, "registered image from snapshot");
        Ok(image_id)
    }

    /// Restores an instance from the newest profile snapshot.
    ///
    /// Returns `None` when no snapshot is tagged for the profile; the
    /// caller falls back to fresh provisioning. The launched instance has
    /// reached `running` by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the lookup, image registration, or
    /// launch fails.
    pub async fn restore_from_snapshot<W: KeyWriter>(
        &self,
        profile: &str,
        provisioner: &Provisioner<'a, P, W>,
    ) -> Result<Option<RestoredInstance>, ProvisionError<P::Error>> {
        let Some(snapshot) = self
            .latest_snapshot(profile)
            .await
            .map_err(|source| ProvisionError::SnapshotLookup { source })?
        else {
            return Ok(None);
        };

        tracing::info!(
            profile,
            snapshot_id = snapshot.id.as_str(),
            "found snapshot; restoring"
        );

        let image_id =
            self.ensure_image(&snapshot.id)
                .await
                .map_err(|source| ProvisionError::ImageRegistry {
                    snapshot_id: snapshot.id.clone(),
                    source,
                })?;

        let instance_id = provisioner
            .launch_from_image(profile, &image_id, true)
            .await?;

        Ok(Some(RestoredInstance {
            instance_id,
            snapshot_id: snapshot.id,
            image_id,
        }))
    }

    /// Deletes profile snapshots (and images registered from them) other
    /// than `keep`.
    ///
    /// Individual failures are logged and skipped; the sweep never fails
    /// the caller's primary operation.
    pub async fn delete_stale_artifacts(
        &self,
        profile: &str,
        keep: Option<&str>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        let snapshots = match self.provider.list_snapshots(profile).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                let warning = format!("failed to list snapshots for profile {profile}: {err}");
                tracing::warn!(profile, "{warning}");
                report.warnings.push(warning);
                return report;
            }
        };

        for snapshot in snapshots {
            if keep == Some(snapshot.id.as_str()) {
                continue;
            }
            if let Err(warning) = self.delete_snapshot_and_images(&snapshot.id, &mut report).await
            {
                tracing::warn!(profile, snapshot_id = snapshot.id.as_str(), "{warning}");
                report.warnings.push(warning);
            }
        }

        report
    }

    /// Deregisters images backed by one snapshot, then deletes it.
    async fn delete_snapshot_and_images(
        &self,
        snapshot_id: &str,
        report: &mut CleanupReport,
    ) -> Result<(), String> {
        let images = self
            .provider
            .images_backed_by(snapshot_id)
            .await
            .map_err(|err| format!("failed to find images backed by {snapshot_id}: {err}"))?;

        for image_id in images {
            self.provider
                .deregister_image(&image_id)
                .await
                .map_err(|err| format!("failed to deregister image {image_id}: {err}"))?;
            tracing::info!(image_id, snapshot_id, "deregistered stale image");
            report.deleted_images.push(image_id);
        }

        self.provider
            .delete_snapshot(snapshot_id)
            .await
            .map_err(|err| format!("failed to delete snapshot {snapshot_id}: {err}"))?;
        tracing::info!(snapshot_id, "deleted stale snapshot");
        report.deleted_snapshots.push(snapshot_id.to_owned());
        Ok(())
    }
}
