//! Classifier totality and precedence.

use linebot_llm::{classify, ErrorAction, LlmError};
use proptest::prelude::*;

fn provider(status: u16, message: String) -> LlmError {
    LlmError::Provider {
        provider: "p".to_string(),
        status,
        message,
        retry_after: None,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn every_error_maps_to_exactly_one_action(
        status in 100u16..=599,
        message in "[a-z ]{0,40}",
    ) {
        let err = provider(status, message);
        let action = classify(&err);
        // Total and deterministic.
        prop_assert_eq!(action, classify(&err));
        prop_assert!(matches!(
            action,
            ErrorAction::Retry | ErrorAction::Fallback | ErrorAction::Fail
        ));
    }

    #[test]
    fn quota_wording_always_falls_back(
        status in 100u16..=599,
        prefix in "[a-z ]{0,10}",
    ) {
        let err = provider(status, format!("{prefix} quota exceeded"));
        prop_assert_eq!(classify(&err), ErrorAction::Fallback);
    }

    #[test]
    fn five_hundreds_without_special_wording_retry(status in 500u16..=599) {
        let err = provider(status, "server error".to_string());
        prop_assert_eq!(classify(&err), ErrorAction::Retry);
    }
}
