//! Tests for tokio spawner utilities

use futures::FutureExt;
use offload_gate::runtime::{Spawn, TokioSpawner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(
        async move {
            tx.send(123).unwrap();
        }
        .boxed(),
    );

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test]
async fn test_current_spawner_uses_running_runtime() {
    let spawner = TokioSpawner::current().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(Box::pin(async move {
        let _ = tx.send("ran");
    }));
    assert_eq!(rx.await.unwrap(), "ran");
}

#[test]
fn test_current_spawner_outside_runtime_fails() {
    assert!(TokioSpawner::current().is_err());
}
