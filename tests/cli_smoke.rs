//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use predicates::prelude::*;

fn roost() -> Command {
    Command::cargo_bin("roost").unwrap_or_else(|err| panic!("binary should build: {err}"))
}

#[test]
fn no_arguments_shows_help_and_fails() {
    roost()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_lifecycle_subcommands() {
    roost()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("use"))
        .stdout(predicate::str::contains("retire"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn use_requires_a_profile_argument() {
    roost()
        .args(["use"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PROFILE").or(predicate::str::contains("profile")));
}
