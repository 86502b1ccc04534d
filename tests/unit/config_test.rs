//! Tests for configuration validation

use std::time::Duration;

use offload_gate::config::{
    GateConfig, GateSetConfig, OverflowPolicy, ProcessWorkerConfig, WorkerKind,
};

#[test]
fn test_gate_config_defaults() {
    let cfg = GateConfig::new();
    assert!(cfg.validate().is_ok());
    assert!(cfg.max_worker_concurrency >= 1);
    assert_eq!(cfg.worker_kind, WorkerKind::Thread);
    assert_eq!(cfg.default_timeout(), None);
    assert_eq!(cfg.queue_depth(), cfg.max_worker_concurrency);
}

#[test]
fn test_gate_config_invalid_concurrency() {
    assert!(GateConfig::new().with_max_worker_concurrency(0).validate().is_err());
}

#[test]
fn test_gate_config_invalid_timeout() {
    let cfg = GateConfig::new().with_default_timeout(Duration::ZERO);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_gate_config_invalid_stack_size() {
    assert!(GateConfig::new().with_thread_stack_size(1024).validate().is_err());
}

#[test]
fn test_process_kind_requires_program() {
    let cfg = GateConfig::new().with_worker_kind(WorkerKind::Process);
    assert!(cfg.validate().is_err());
    assert!(cfg
        .with_process(ProcessWorkerConfig::new("/usr/bin/worker"))
        .validate()
        .is_ok());
}

#[test]
fn test_gate_config_from_json() {
    let cfg = GateConfig::from_json_str(
        r#"{
            "max_worker_concurrency": 4,
            "worker_kind": "process",
            "default_timeout_ms": 1500,
            "overflow": "reject",
            "process": { "program": "/opt/app/worker", "args": ["--worker"] }
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.max_worker_concurrency, 4);
    assert_eq!(cfg.worker_kind, WorkerKind::Process);
    assert_eq!(cfg.default_timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(cfg.overflow, OverflowPolicy::Reject);
    assert_eq!(cfg.queue_depth(), 0);
    assert_eq!(cfg.process.unwrap().args, vec!["--worker"]);
}

#[test]
fn test_gate_config_from_json_rejects_unknown_kind() {
    assert!(GateConfig::from_json_str(r#"{"worker_kind": "fiber"}"#).is_err());
}

#[test]
fn test_gate_set_config_empty_gates() {
    let cfg = GateSetConfig {
        gates: std::collections::HashMap::new(),
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_gate_set_config_names_bad_gate() {
    let err = GateSetConfig::from_json_str(r#"{"gates": {"cpu": {"max_worker_concurrency": 0}}}"#)
        .unwrap_err();
    assert!(err.to_string().contains("gate `cpu`"));
}

#[test]
fn test_gate_config_from_lookup_defaults_when_unset() {
    let cfg = GateConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, GateConfig::default());
}

#[test]
fn test_gate_config_from_lookup_overflow_and_queue() {
    let cfg = GateConfig::from_lookup(|key| match key {
        "OFFLOAD_GATE_MAX_WORKER_CONCURRENCY" => Some("2".into()),
        "OFFLOAD_GATE_MAX_QUEUE_DEPTH" => Some("10".into()),
        "OFFLOAD_GATE_OVERFLOW" => Some("Queue".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.queue_depth(), 10);
}
