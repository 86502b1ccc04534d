//! Tests for cancellation tokens

use std::time::Duration;

use offload_gate::core::CancelToken;

#[test]
fn test_child_is_cancelled_with_parent() {
    let parent = CancelToken::new();
    let child = parent.child_token();
    let grandchild = child.child_token();

    parent.cancel();
    assert!(child.is_cancelled());
    assert!(grandchild.is_cancelled());
}

#[test]
fn test_cancelling_child_leaves_parent() {
    let parent = CancelToken::new();
    let child = parent.child_token();

    child.cancel();
    assert!(child.is_cancelled());
    assert!(!parent.is_cancelled());
}

#[test]
fn test_child_of_cancelled_token_starts_cancelled() {
    let parent = CancelToken::new();
    parent.cancel();
    assert!(parent.child_token().is_cancelled());
}

#[tokio::test]
async fn test_cancelled_wakes_waiter() {
    let token = CancelToken::new();
    let waiter = {
        let token = token.clone();
        tokio::spawn(async move { token.cancelled().await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter woke")
        .unwrap();
}

#[tokio::test]
async fn test_cancelled_returns_immediately_when_already_cancelled() {
    let token = CancelToken::new();
    token.cancel();
    tokio::time::timeout(Duration::from_millis(100), token.cancelled())
        .await
        .expect("already cancelled");
}
