//! Read-only reporting over managed profiles.
//!
//! Listing never takes the lease lock: it tabulates whatever the provider
//! reports at the moment of the query. With `show_all`, profiles that only
//! survive as snapshots appear as `archived`; otherwise only running
//! instances are shown.

use std::collections::BTreeMap;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::provider::{CloudProvider, state};

/// State label for profiles that exist only as snapshots.
pub const ARCHIVED_STATE: &str = "archived";

const PLACEHOLDER: &str = "-";

/// One row of the profile listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfileRow {
    /// Profile name.
    pub profile: String,
    /// Instance id, or `-` for archived profiles.
    pub instance_id: String,
    /// Instance state name, or `archived`.
    pub state: String,
    /// Public address, or `-`.
    pub public_address: String,
    /// RFC 3339 launch time, or `-`.
    pub launched_at: String,
}

/// Collects listing rows for every managed profile.
///
/// # Errors
///
/// Returns the provider error when a listing query fails.
pub async fn collect_profiles<P: CloudProvider>(
    provider: &P,
    show_all: bool,
) -> Result<Vec<ProfileRow>, P::Error> {
    let mut rows: BTreeMap<String, ProfileRow> = BTreeMap::new();

    for instance in provider.list_instances().await? {
        rows.insert(
            instance.profile.clone(),
            ProfileRow {
                profile: instance.profile,
                instance_id: instance.id,
                state: instance.state,
                public_address: instance
                    .public_address
                    .unwrap_or_else(|| PLACEHOLDER.to_owned()),
                launched_at: instance
                    .launched_at
                    .map_or_else(|| PLACEHOLDER.to_owned(), format_epoch),
            },
        );
    }

    if show_all {
        for snapshot in provider.list_all_snapshots().await? {
            rows.entry(snapshot.profile.clone()).or_insert(ProfileRow {
                profile: snapshot.profile,
                instance_id: PLACEHOLDER.to_owned(),
                state: ARCHIVED_STATE.to_owned(),
                public_address: PLACEHOLDER.to_owned(),
                launched_at: PLACEHOLDER.to_owned(),
            });
        }
    }

    let rows = rows
        .into_values()
        .filter(|row| show_all || row.state == state::RUNNING)
        .collect();
    Ok(rows)
}

/// Renders rows as a fixed-width table.
#[must_use]
pub fn render_table(rows: &[ProfileRow]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<20} {:<25} {:<15} {:<18} {:<25}\n",
        "NAME", "INSTANCE ID", "STATE", "PUBLIC ADDRESS", "LAUNCH TIME"
    ));
    out.push_str(&"-".repeat(105));
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{:<20} {:<25} {:<15} {:<18} {:<25}\n",
            row.profile, row.instance_id, row.state, row.public_address, row.launched_at
        ));
    }
    out
}

fn format_epoch(epoch: i64) -> String {
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|moment| moment.format(&Rfc3339).ok())
        .unwrap_or_else(|| PLACEHOLDER.to_owned())
}

#[cfg(test)]
mod tests {
    use super::{ARCHIVED_STATE, ProfileRow, collect_profiles, render_table};
    use crate::test_support::FakeCloud;

    #[tokio::test]
    async fn running_only_by_default() {
        let cloud = FakeCloud::new();
        let running = cloud.seed_instance("alpha");
        cloud.seed_snapshot("beta", 1);

        let rows = collect_profiles(&cloud, false)
            .await
            .unwrap_or_else(|err| panic!("collect: {err}"));

        assert_eq!(rows.len(), 1);
        let row = rows.first().unwrap_or_else(|| panic!("row missing"));
        assert_eq!(row.profile, "alpha");
        assert_eq!(row.instance_id, running);
    }

    #[tokio::test]
    async fn show_all_includes_archived_profiles() {
        let cloud = FakeCloud::new();
        cloud.seed_instance("alpha");
        cloud.seed_snapshot("beta", 1);

        let rows = collect_profiles(&cloud, true)
            .await
            .unwrap_or_else(|err| panic!("collect: {err}"));

        assert_eq!(rows.len(), 2);
        let beta = rows
            .iter()
            .find(|row| row.profile == "beta")
            .unwrap_or_else(|| panic!("beta row missing"));
        assert_eq!(beta.state, ARCHIVED_STATE);
        assert_eq!(beta.instance_id, "-");
    }

    #[test]
    fn render_table_aligns_columns() {
        let rows = vec![ProfileRow {
            profile: String::from("alpha"),
            instance_id: String::from("i-123"),
            state: String::from("running"),
            public_address: String::from("198.51.100.7"),
            launched_at: String::from("2026-08-07T00:00:00Z"),
        }];
        let rendered = render_table(&rows);
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("alpha"));
        assert!(rendered.lines().count() >= 3);
    }
}
