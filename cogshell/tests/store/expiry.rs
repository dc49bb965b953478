//! Optional TTL expiry of pending requests.

use super::common::{init_test_logging, wait_for_condition};
use cogshell::{PendingRequestStore, StoreError};
use std::{sync::Arc, time::Duration};

#[tokio::test]
async fn test_entries_never_expire_without_ttl() {
    init_test_logging();
    let store = PendingRequestStore::<String>::new();
    let id = store.put("patient".to_string()).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.purge_expired().await, 0);
    assert_eq!(store.pop(Some(id.as_str())).await, Ok("patient".to_string()));
}

#[tokio::test]
async fn test_expired_entry_is_not_found() {
    init_test_logging();
    let store = PendingRequestStore::<String>::with_ttl(Some(Duration::from_millis(50)));
    let id = store.put("stale".to_string()).await;
    assert!(store.pending().await[0].expires_at.is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(
        store.pop(Some(id.as_str())).await,
        Err(StoreError::NotFound {
            id: id.to_string()
        })
    );
}

#[tokio::test]
async fn test_purge_keeps_fresh_entries() {
    init_test_logging();
    let store = PendingRequestStore::<&str>::with_ttl(Some(Duration::from_millis(200)));
    store.put("old").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let fresh = store.put("fresh").await;

    assert_eq!(store.purge_expired().await, 1);
    assert_eq!(store.len().await, 1);
    assert_eq!(store.pop(Some(fresh.as_str())).await, Ok("fresh"));
}

#[tokio::test]
async fn test_background_sweeper_purges_expired_entries() {
    init_test_logging();
    let store = Arc::new(PendingRequestStore::<String>::with_ttl(Some(
        Duration::from_millis(50),
    )));
    store.put("swept".to_string()).await;
    PendingRequestStore::<String>::start_background_sweeper(store.clone(), Duration::from_millis(25));

    let swept = wait_for_condition(Duration::from_secs(5), Duration::from_millis(25), || {
        let store = store.clone();
        async move { store.is_empty().await }
    })
    .await;
    assert!(swept, "sweeper never purged the expired entry");
}
