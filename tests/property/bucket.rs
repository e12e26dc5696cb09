//! Token bucket invariants.
//!
//! - A frozen bucket never grants more than its capacity.
//! - Within any window, grants never exceed capacity plus refill.
//! - The observable level never exceeds capacity.

use linebot_ratelimit::TokenBucket;
use proptest::prelude::*;
use std::time::Instant;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn frozen_bucket_grants_exactly_capacity(
        capacity in 1u32..=50,
        attempts in 0usize..=200,
    ) {
        let bucket = TokenBucket::new(capacity, 0.0);
        let granted = (0..attempts).filter(|_| bucket.allow()).count();
        prop_assert_eq!(granted, attempts.min(capacity as usize));
    }

    #[test]
    fn grants_are_bounded_by_capacity_plus_refill(
        capacity in 1u32..=20,
        rate in 0.0f64..=500.0,
        attempts in 1usize..=500,
    ) {
        let started = Instant::now();
        let bucket = TokenBucket::new(capacity, rate);
        let granted = (0..attempts).filter(|_| bucket.allow()).count();
        let elapsed = started.elapsed().as_secs_f64();

        // One extra grant of slack absorbs the rounding at the window
        // edges; the bound itself is capacity + elapsed * rate.
        let bound = capacity as f64 + elapsed * rate + 1.0;
        prop_assert!(
            (granted as f64) <= bound,
            "granted {} exceeds bound {}", granted, bound
        );
    }

    #[test]
    fn level_never_exceeds_capacity(
        capacity in 1u32..=50,
        rate in 0.0f64..=10_000.0,
        spends in 0usize..=60,
    ) {
        let bucket = TokenBucket::new(capacity, rate);
        for _ in 0..spends {
            let _ = bucket.allow();
            prop_assert!(bucket.available() <= capacity as f64);
        }
        prop_assert!(bucket.available() <= capacity as f64);
    }
}
