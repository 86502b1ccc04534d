//! Tests for builder modules

use std::sync::Arc;

use offload_gate::builders::{build_gates, GateBuilder};
use offload_gate::config::{GateConfig, GateSetConfig, ProcessWorkerConfig};
use offload_gate::core::{GateError, InMemoryAuditSink, WorkItem};
use offload_gate::runtime::TokioSpawner;

#[tokio::test]
async fn test_gate_builder_defaults() {
    let gate = GateBuilder::new(GateConfig::new().with_max_worker_concurrency(3))
        .build()
        .unwrap();
    assert_eq!(gate.config().max_worker_concurrency, 3);
    assert_eq!(gate.stats().thread.max_concurrency, 3);
    assert!(gate.stats().process.is_none());
    gate.shutdown(true).await;
}

#[tokio::test]
async fn test_gate_builder_rejects_invalid_config() {
    let err = GateBuilder::new(GateConfig::new().with_max_worker_concurrency(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_gate_builder_with_audit_and_spawner() {
    let sink = InMemoryAuditSink::new(16);
    let gate = GateBuilder::new(
        GateConfig::new()
            .with_max_worker_concurrency(1)
            .with_process(ProcessWorkerConfig::new("/bin/true")),
    )
    .with_audit(Arc::new(sink.clone()))
    .with_spawner(Arc::new(TokioSpawner::current().unwrap()))
    .build()
    .unwrap();

    assert!(gate.stats().process.is_some());
    gate.submit(WorkItem::inline(|_| Ok(()))).await.unwrap();
    assert_eq!(sink.events().len(), 3);
}

#[test]
fn test_process_pool_needs_runtime_or_spawner() {
    let err = GateBuilder::new(
        GateConfig::new()
            .with_max_worker_concurrency(1)
            .with_process(ProcessWorkerConfig::new("/bin/true")),
    )
    .build()
    .unwrap_err();
    assert!(matches!(err, GateError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_build_gates_from_json() {
    let cfg = GateSetConfig::from_json_str(
        r#"{
            "gates": {
                "cpu": { "max_worker_concurrency": 2 },
                "io": { "max_worker_concurrency": 8, "overflow": "reject" }
            }
        }"#,
    )
    .unwrap();

    let gates = build_gates(&cfg).unwrap();
    assert_eq!(gates.len(), 2);
    assert_eq!(gates["cpu"].stats().thread.max_concurrency, 2);
    assert_eq!(gates["io"].config().queue_depth(), 0);

    for gate in gates.values() {
        gate.shutdown(true).await;
    }
}
