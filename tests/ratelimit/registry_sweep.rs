//! Keyed registry lifecycle: lazy creation, sweeping, fairness.

use linebot_ratelimit::KeyedLimiter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn sweeper_evicts_idle_keys_on_its_own() {
    let swept = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&swept);
    let limiter = KeyedLimiter::builder()
        .name("user")
        .capacity(1)
        .refill_per_sec(50.0)
        .sweep_interval(Duration::from_millis(50))
        .on_sweep(move |removed| {
            s.fetch_add(removed, Ordering::SeqCst);
        })
        .build();

    assert!(limiter.allow("U1"));
    assert!(limiter.allow("U2"));
    assert_eq!(limiter.active_count(), 2);

    // Both buckets refill within ~20ms and the sweeper ticks at 50ms.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(limiter.active_count(), 0);
    assert!(swept.load(Ordering::SeqCst) >= 2);
    limiter.stop();
}

#[tokio::test]
async fn busy_keys_survive_sweeps() {
    let limiter = KeyedLimiter::builder()
        .name("user")
        .capacity(3)
        .refill_per_sec(0.1)
        .sweep_interval(Duration::from_millis(40))
        .build();

    assert!(limiter.allow("busy"));
    tokio::time::sleep(Duration::from_millis(150)).await;
    // Far below capacity at 0.1 tokens/sec; the sweeper must not touch it.
    assert_eq!(limiter.active_count(), 1);
    limiter.stop();
}

#[tokio::test]
async fn concurrent_allow_during_sweep_is_safe() {
    let limiter = KeyedLimiter::builder()
        .name("user")
        .capacity(2)
        .refill_per_sec(100.0)
        .sweep_interval(Duration::from_millis(5))
        .build();

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let limiter = Arc::clone(&limiter);
        tasks.push(tokio::spawn(async move {
            for i in 0..200 {
                let _ = limiter.allow(&format!("U{}", (worker + i) % 7));
                if i % 20 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    // No panics, no poisoned locks; whatever keys remain are live ones.
    assert!(limiter.active_count() <= 7);
    limiter.stop();
}

#[tokio::test]
async fn stop_then_allow_still_works() {
    let limiter = KeyedLimiter::builder().capacity(1).build();
    limiter.stop();
    // The sweeper is gone but the registry itself keeps serving.
    assert!(limiter.allow("U1"));
    assert!(!limiter.allow("U1"));
}
