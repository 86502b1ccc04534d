//! Tests for audit sink

use offload_gate::core::{build_audit_event, AuditSink, InMemoryAuditSink, Route, WorkId, WorkState};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);
    let id = WorkId::new();

    sink.record(build_audit_event(id, Some("thumbnail".into()), Route::Thread, WorkState::Submitted, None));
    sink.record(build_audit_event(id, Some("thumbnail".into()), Route::Thread, WorkState::Executing, None));
    assert_eq!(sink.events().len(), 2);

    let events = sink.events();
    assert_eq!(events[0].work_id, id);
    assert_eq!(events[0].route, Route::Thread);
    assert_eq!(events[1].state, WorkState::Executing);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);
    let ids: Vec<WorkId> = (0..3).map(|_| WorkId::new()).collect();

    for id in &ids {
        sink.record(build_audit_event(*id, None, Route::Inline, WorkState::Submitted, None));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].work_id, ids[1]); // First one popped
    assert_eq!(events[1].work_id, ids[2]);
}

#[test]
fn test_build_audit_event() {
    let id = WorkId::new();
    let event = build_audit_event(
        id,
        None,
        Route::Process,
        WorkState::Failed,
        Some("worker process exited".to_string()),
    );

    assert_eq!(event.work_id, id);
    assert_eq!(event.route, Route::Process);
    assert_eq!(event.state, WorkState::Failed);
    assert_eq!(event.detail.as_deref(), Some("worker process exited"));
    assert!(event.created_at_ms > 0);
}

#[test]
fn test_audit_event_serializes_states_in_snake_case() {
    let event = build_audit_event(WorkId::new(), None, Route::NativeAsync, WorkState::InlineExecuting, None);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["state"], "inline_executing");
    assert_eq!(json["route"], "native_async");
}

#[test]
fn test_sink_clones_share_buffer() {
    let sink = InMemoryAuditSink::new(4);
    let handed_out = sink.clone();
    handed_out.record(build_audit_event(WorkId::new(), None, Route::Inline, WorkState::Completed, None));
    assert_eq!(sink.events().len(), 1);
}
