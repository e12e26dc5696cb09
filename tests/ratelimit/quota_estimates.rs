//! LLM quota shape and the user-facing reset estimate.

use linebot_ratelimit::LlmQuota;
use std::time::Duration;

#[tokio::test]
async fn quota_is_per_key() {
    let quota = LlmQuota::new(2, Duration::from_secs(3600));
    assert!(quota.allow("U1"));
    assert!(quota.allow("U1"));
    assert!(!quota.allow("U1"));
    assert!(quota.allow("U2"));
    quota.stop();
}

#[tokio::test]
async fn estimate_scales_with_consumption() {
    let quota = LlmQuota::new(6, Duration::from_secs(3600));

    assert_eq!(quota.estimate_reset_minutes("U1"), 1);

    for _ in 0..3 {
        assert!(quota.allow("U1"));
    }
    // Half spent: about 30 minutes at 10 minutes per request.
    let half = quota.estimate_reset_minutes("U1");
    assert!((25..=31).contains(&half), "got {half}");

    for _ in 0..3 {
        assert!(quota.allow("U1"));
    }
    let full = quota.estimate_reset_minutes("U1");
    assert!((55..=60).contains(&full), "got {full}");
    quota.stop();
}

#[tokio::test]
async fn estimate_never_reports_zero() {
    let quota = LlmQuota::new(120, Duration::from_secs(3600));
    assert!(quota.allow("U1"));
    // One request of 120/hour refills in 30 seconds, still reported as
    // one minute.
    assert_eq!(quota.estimate_reset_minutes("U1"), 1);
    quota.stop();
}
