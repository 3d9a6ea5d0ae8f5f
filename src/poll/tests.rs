//! Tests for the generic polling loop.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;

use super::{PollError, PollPolicy, ProbeFuture, StatusProbe, wait_for_status};

#[derive(Debug, Error)]
#[error("{0}")]
struct ProbeFailure(String);

/// Probe double fed from a scripted status sequence.
struct ScriptedProbe {
    statuses: Mutex<VecDeque<Result<String, String>>>,
    target: &'static str,
    error: &'static str,
}

impl ScriptedProbe {
    fn new(statuses: Vec<Result<&str, &str>>) -> Self {
        Self {
            statuses: Mutex::new(
                statuses
                    .into_iter()
                    .map(|entry| entry.map(str::to_owned).map_err(str::to_owned))
                    .collect(),
            ),
            target: "running",
            error: "terminated",
        }
    }
}

impl StatusProbe for ScriptedProbe {
    type Error = ProbeFailure;

    fn current_status(&self) -> ProbeFuture<'_, String, Self::Error> {
        let next = self
            .statuses
            .lock()
            .unwrap_or_else(|err| panic!("scripted probe lock poisoned: {err}"))
            .pop_front();
        Box::pin(async move {
            match next {
                Some(Ok(status)) => Ok(status),
                Some(Err(message)) => Err(ProbeFailure(message)),
                None => Ok(String::from("pending")),
            }
        })
    }

    fn is_target(&self, status: &str) -> bool {
        status == self.target
    }

    fn is_error(&self, status: &str) -> bool {
        status == self.error
    }

    fn resource_id(&self) -> &str {
        "res-1"
    }

    fn resource_kind(&self) -> &'static str {
        "scripted resource"
    }
}

#[tokio::test]
async fn reaches_target_after_transient_statuses() {
    let probe = ScriptedProbe::new(vec![Ok("pending"), Ok("pending"), Ok("running")]);
    wait_for_status(&probe, &PollPolicy::fast(10))
        .await
        .unwrap_or_else(|err| panic!("expected target status: {err}"));
}

#[tokio::test]
async fn stops_on_error_status() {
    let probe = ScriptedProbe::new(vec![Ok("pending"), Ok("terminated")]);
    let err = wait_for_status(&probe, &PollPolicy::fast(10))
        .await
        .expect_err("error status should end the wait");
    assert!(
        matches!(err, PollError::ErrorState { ref status, .. } if status == "terminated"),
        "unexpected outcome: {err}"
    );
}

#[tokio::test]
async fn times_out_when_budget_exhausted() {
    let probe = ScriptedProbe::new(vec![]);
    let err = wait_for_status(&probe, &PollPolicy::fast(3))
        .await
        .expect_err("expected timeout");
    assert!(matches!(err, PollError::Timeout { .. }), "unexpected outcome: {err}");
}

#[tokio::test]
async fn surfaces_probe_failures() {
    let probe = ScriptedProbe::new(vec![Ok("pending"), Err("api unreachable")]);
    let err = wait_for_status(&probe, &PollPolicy::fast(10))
        .await
        .expect_err("probe failure should surface");
    assert!(
        matches!(err, PollError::Probe { ref id, .. } if id == "res-1"),
        "unexpected outcome: {err}"
    );
}
