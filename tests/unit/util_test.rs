//! Tests for utility functions

use offload_gate::util::{now_ms, panic_message};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(a > 0);
    assert!(b >= a);
}

#[test]
fn test_panic_message_for_foreign_payload() {
    let payload = std::panic::catch_unwind(|| std::panic::panic_any(17_u8)).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "panic with a non-string payload");
}
