//! Token bucket behavior across the operations the tiers rely on.

use linebot_ratelimit::{TokenBucket, WaitError};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn burst_is_bounded_by_capacity() {
    let bucket = TokenBucket::new(10, 0.0);
    let mut granted = 0;
    for _ in 0..100 {
        if bucket.allow() {
            granted += 1;
        }
    }
    assert_eq!(granted, 10);
}

#[test]
fn fractional_refill_accumulates() {
    // 0.2 tokens/sec: a single token takes five seconds, so right after
    // spending the burst nothing is available.
    let bucket = TokenBucket::new(2, 0.2);
    assert!(bucket.allow());
    assert!(bucket.allow());
    assert!(!bucket.allow());
    assert!(bucket.available() < 1.0);
}

#[test]
fn is_full_tracks_idle_refill() {
    let bucket = TokenBucket::new(1, 100.0);
    assert!(bucket.is_full());
    assert!(bucket.allow());
    assert!(!bucket.is_full());
    std::thread::sleep(Duration::from_millis(30));
    assert!(bucket.is_full());
}

#[tokio::test]
async fn concurrent_allow_never_overspends() {
    let bucket = Arc::new(TokenBucket::new(50, 0.0));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let bucket = Arc::clone(&bucket);
        tasks.push(tokio::spawn(async move {
            let mut granted = 0u32;
            for _ in 0..25 {
                if bucket.allow() {
                    granted += 1;
                }
            }
            granted
        }));
    }

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap();
    }
    assert_eq!(total, 50);
}

#[tokio::test]
async fn wait_blocks_until_refill_then_grants() {
    let bucket = TokenBucket::new(1, 50.0);
    assert!(bucket.allow());

    let started = Instant::now();
    bucket.wait(None).await.unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(10), "waited {waited:?}");
    assert!(waited < Duration::from_secs(2), "waited {waited:?}");
}

#[tokio::test]
async fn wait_deadline_on_empty_frozen_bucket() {
    let bucket = TokenBucket::new(1, 0.0);
    assert!(bucket.allow());
    let err = bucket
        .wait(Some(Instant::now() + Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert_eq!(err, WaitError::DeadlineExceeded);
}
