use std::time::Duration;

use socks5d::registry::SessionRegistry;
use tokio::sync::oneshot;

#[test]
fn ids_are_unique() {
    let mut registry = SessionRegistry::new();
    let a = registry.next_id();
    let b = registry.next_id();
    assert_ne!(a, b);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn register_and_unregister() {
    let mut registry = SessionRegistry::new();
    let id = registry.next_id();
    registry.register(id, tokio::spawn(async {}));

    assert!(registry.contains(id));
    assert_eq!(registry.len(), 1);
    assert!(registry.unregister(id));
    assert!(!registry.unregister(id));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn shutdown_aborts_sessions() {
    let mut registry = SessionRegistry::new();
    let (tx, rx) = oneshot::channel::<()>();

    let id = registry.next_id();
    registry.register(
        id,
        tokio::spawn(async move {
            // holds the sender until aborted
            let _tx = tx;
            std::future::pending::<()>().await;
        }),
    );

    registry.shutdown();
    assert!(registry.is_empty());

    let dropped = tokio::time::timeout(Duration::from_secs(5), rx).await;
    assert!(matches!(dropped, Ok(Err(_))));
}
