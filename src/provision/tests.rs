//! Tests for shared provisioning plumbing.

use crate::test_support::{FakeCloud, NullKeyWriter, test_settings};
use crate::poll::PollPolicy;
use crate::provision::{ProvisionError, ProvisionSettings, Provisioner};

fn fast_provisioner<'a>(
    cloud: &'a FakeCloud,
    key_writer: &'a NullKeyWriter,
    cfg: &'a ProvisionSettings,
) -> Provisioner<'a, FakeCloud, NullKeyWriter> {
    Provisioner::new(cloud, key_writer, cfg).with_poll_policy(PollPolicy::fast(10))
}

#[tokio::test]
async fn security_group_is_created_once_and_reused() {
    let cloud = FakeCloud::new();
    let key_writer = NullKeyWriter;
    let cfg = test_settings();
    let provisioner = fast_provisioner(&cloud, &key_writer, &cfg);

    let first = provisioner
        .ensure_security_group()
        .await
        .unwrap_or_else(|err| panic!("first ensure: {err}"));
    let second = provisioner
        .ensure_security_group()
        .await
        .unwrap_or_else(|err| panic!("second ensure: {err}"));
    assert_eq!(first, second);
}

#[tokio::test]
async fn configured_key_pair_is_reused_without_minting() {
    let cloud = FakeCloud::new();
    let key_writer = NullKeyWriter;
    let cfg = test_settings();
    let provisioner = fast_provisioner(&cloud, &key_writer, &cfg);

    let name = provisioner
        .resolve_key_pair()
        .await
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    assert_eq!(name, "roost-key-pair-test");
    assert!(cloud.key_pairs().is_empty());
}

#[tokio::test]
async fn missing_key_pair_is_minted_with_generated_name() {
    let cloud = FakeCloud::new();
    let key_writer = NullKeyWriter;
    let cfg = ProvisionSettings {
        key_pair_name: None,
        ..test_settings()
    };
    let provisioner = fast_provisioner(&cloud, &key_writer, &cfg);

    let name = provisioner
        .resolve_key_pair()
        .await
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    assert!(name.starts_with("roost-key-pair-"), "name: {name}");
    assert_eq!(cloud.key_pairs(), vec![name]);
}

#[tokio::test]
async fn fresh_provision_resolves_base_image_and_waits_for_running() {
    let cloud = FakeCloud::new();
    cloud.set_pending_ticks(3);
    let key_writer = NullKeyWriter;
    let cfg = test_settings();
    let provisioner = fast_provisioner(&cloud, &key_writer, &cfg);

    let instance_id = provisioner
        .provision_fresh("alpha")
        .await
        .unwrap_or_else(|err| panic!("provision_fresh: {err}"));

    assert_eq!(cloud.base_image_lookups(), 1);
    assert_eq!(cloud.launch_calls(), 1);
    assert_eq!(
        cloud.instance_state_of(&instance_id).as_deref(),
        Some("running")
    );
}

#[tokio::test]
async fn launch_stuck_in_teardown_state_is_fatal() {
    let cloud = FakeCloud::new();
    cloud.set_launch_stuck_state("shutting-down");
    let key_writer = NullKeyWriter;
    let cfg = test_settings();
    let provisioner = fast_provisioner(&cloud, &key_writer, &cfg);

    let err = provisioner
        .provision_fresh("alpha")
        .await
        .expect_err("stuck launch should fail");
    assert!(
        matches!(err, ProvisionError::NotRunning(_)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn launch_that_never_runs_times_out() {
    let cloud = FakeCloud::new();
    cloud.set_pending_ticks(u32::MAX);
    let key_writer = NullKeyWriter;
    let cfg = test_settings();
    let provisioner =
        Provisioner::new(&cloud, &key_writer, &cfg).with_poll_policy(PollPolicy::fast(3));

    let err = provisioner
        .provision_fresh("alpha")
        .await
        .expect_err("eternally pending launch should time out");
    assert!(
        matches!(err, ProvisionError::NotRunning(_)),
        "unexpected error: {err}"
    );
}
