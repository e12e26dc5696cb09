//! Leader-lock election over the conditional-write store.

use linebot_sync::{LeaderLock, MemoryObjectStore, ObjectStore};
use std::sync::Arc;
use std::time::Duration;

fn two_nodes(ttl: Duration) -> (LeaderLock, LeaderLock) {
    let store = Arc::new(MemoryObjectStore::new());
    (
        LeaderLock::new(Arc::clone(&store) as Arc<dyn ObjectStore>, "locks/leader", ttl),
        LeaderLock::new(store as Arc<dyn ObjectStore>, "locks/leader", ttl),
    )
}

#[tokio::test]
async fn live_lock_is_exclusive() {
    let (n1, n2) = two_nodes(Duration::from_secs(60));
    assert!(n1.acquire().await.unwrap());
    assert!(!n2.acquire().await.unwrap());
    // The holder can keep renewing.
    assert!(n1.renew().await.unwrap());
}

#[tokio::test]
async fn crashed_leader_is_replaced_after_expiry() {
    let (n1, n2) = two_nodes(Duration::from_millis(20));

    assert!(n1.acquire().await.unwrap());
    // n1 "crashes": no renewals happen.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(n2.acquire().await.unwrap());

    // The revived n1 notices the loss on its next renew...
    assert!(!n1.renew().await.unwrap());
    // ...and its release leaves n2's record alone.
    n1.release().await.unwrap();
    assert!(n2.renew().await.unwrap());
}

#[tokio::test]
async fn concurrent_steal_has_one_winner() {
    let (n1, n2) = two_nodes(Duration::from_millis(10));
    assert!(n1.acquire().await.unwrap());
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Both observe the expired record and race the conditional write.
    let (a, b) = tokio::join!(n1.acquire(), n2.acquire());
    let winners = [a.unwrap(), b.unwrap()];
    assert_eq!(winners.iter().filter(|w| **w).count(), 1);
}

#[tokio::test]
async fn release_then_reacquire() {
    let (n1, n2) = two_nodes(Duration::from_secs(60));
    assert!(n1.acquire().await.unwrap());
    n1.release().await.unwrap();
    assert!(n2.acquire().await.unwrap());
}
