//! Full-jitter backoff bounds.

use linebot_llm::{full_jitter, has_sufficient_budget};
use proptest::prelude::*;
use std::time::{Duration, Instant};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn jitter_stays_under_the_exponential_cap(
        attempt in 1u32..=20,
        initial_ms in 1u64..=1_000,
        max_ms in 1u64..=10_000,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let max = Duration::from_millis(max_ms);

        let exponential = initial
            .saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX));
        let cap = exponential.min(max);

        let delay = full_jitter(attempt, initial, max);
        prop_assert!(delay < cap.max(Duration::from_nanos(1)),
            "delay {:?} not under cap {:?}", delay, cap);
    }

    #[test]
    fn attempt_zero_is_always_zero(
        initial_ms in 0u64..=10_000,
        max_ms in 0u64..=10_000,
    ) {
        let delay = full_jitter(
            0,
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
        );
        prop_assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn jitter_actually_varies(attempt in 3u32..=10) {
        // With a wide cap, 32 draws collapsing to one value means the
        // randomness is broken.
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(60);
        let first = full_jitter(attempt, initial, max);
        let varied = (0..32).any(|_| full_jitter(attempt, initial, max) != first);
        prop_assert!(varied);
    }

    #[test]
    fn budget_check_is_consistent(delay_ms in 0u64..=1_000) {
        let delay = Duration::from_millis(delay_ms);
        // A deadline comfortably beyond the delay always has budget.
        let roomy = Instant::now() + delay + Duration::from_secs(5);
        prop_assert!(has_sufficient_budget(Some(roomy), delay));
        // A deadline already behind us never does (for nonzero delays).
        if delay > Duration::ZERO {
            let passed = Instant::now() - Duration::from_millis(1);
            prop_assert!(!has_sufficient_budget(Some(passed), delay));
        }
    }
}
