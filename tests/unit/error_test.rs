//! Tests for error types

use std::time::Duration;

use offload_gate::core::{FailureOrigin, GateError, WorkerFailure};

#[test]
fn test_capacity_exceeded_error() {
    let err = GateError::CapacityExceeded { limit: 8 };
    assert_eq!(format!("{err}"), "capacity exceeded: limit 8");
}

#[test]
fn test_timeout_error() {
    let err = GateError::Timeout(Duration::from_millis(250));
    assert_eq!(format!("{err}"), "work item timed out after 250ms");
}

#[test]
fn test_cancelled_error() {
    assert_eq!(format!("{}", GateError::Cancelled), "work item cancelled");
}

#[test]
fn test_worker_execution_error() {
    let err = GateError::execution(anyhow::anyhow!("connection reset").context("fetching page"));
    let failure = err.worker_failure().unwrap();
    assert_eq!(failure.origin(), FailureOrigin::Error);
    assert_eq!(failure.message(), "fetching page: connection reset");
    assert!(format!("{err}").contains("fetching page: connection reset"));
}

#[test]
fn test_worker_failure_without_source_error() {
    let failure = WorkerFailure::new(FailureOrigin::ProcessExit, "exit status: 3");
    assert!(failure.error().is_none());
    assert_eq!(failure.origin(), FailureOrigin::ProcessExit);
}

#[test]
fn test_non_execution_errors_have_no_failure() {
    assert!(GateError::ShutDown.worker_failure().is_none());
    assert!(GateError::Unroutable("x".into()).worker_failure().is_none());
}
