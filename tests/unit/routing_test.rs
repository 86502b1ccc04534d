//! Tests for the dispatch decision

use offload_gate::config::WorkerKind;
use offload_gate::core::{route, GateError, PayloadKind, Route, WorkClass};

#[test]
fn test_inline_safe_stays_on_caller() {
    for kind in [PayloadKind::Call, PayloadKind::Future] {
        assert_eq!(
            route(WorkClass::InlineSafe, kind, WorkerKind::Thread, false).unwrap(),
            Route::Inline
        );
    }
}

#[test]
fn test_cpu_bound_is_never_inline() {
    for worker_kind in [WorkerKind::Thread, WorkerKind::Process] {
        for kind in [PayloadKind::Call, PayloadKind::Future, PayloadKind::Job] {
            for process in [false, true] {
                if let Ok(r) = route(WorkClass::CpuBound, kind, worker_kind, process) {
                    assert!(matches!(r, Route::Thread | Route::Process));
                }
            }
        }
    }
}

#[test]
fn test_jobs_need_process_pool() {
    assert_eq!(
        route(WorkClass::BlockingIo, PayloadKind::Job, WorkerKind::Thread, true).unwrap(),
        Route::Process
    );
    assert!(matches!(
        route(WorkClass::CpuBound, PayloadKind::Job, WorkerKind::Thread, false),
        Err(GateError::Unroutable(_))
    ));
}

#[test]
fn test_route_display() {
    assert_eq!(Route::NativeAsync.to_string(), "native-async");
    assert_eq!(Route::Thread.to_string(), "thread");
}
