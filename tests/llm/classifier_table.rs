//! The classification table, end to end: status rules, wording rules,
//! precedence, and the conservative default.

use linebot_llm::{classify, ErrorAction, LlmError};

fn provider(status: u16, message: &str) -> LlmError {
    LlmError::Provider {
        provider: "test".to_string(),
        status,
        message: message.to_string(),
        retry_after: None,
    }
}

#[test]
fn context_signals() {
    assert_eq!(classify(&LlmError::Cancelled), ErrorAction::Fail);
    assert_eq!(classify(&LlmError::DeadlineExceeded), ErrorAction::Retry);
}

#[test]
fn transient_status_rows() {
    for status in [408, 409, 429, 500, 502, 503, 504, 529] {
        assert_eq!(classify(&provider(status, "x")), ErrorAction::Retry, "{status}");
    }
}

#[test]
fn permanent_status_rows() {
    for status in [400, 401, 403, 404, 422] {
        assert_eq!(classify(&provider(status, "x")), ErrorAction::Fail, "{status}");
    }
}

#[test]
fn quota_wording_rows() {
    for message in [
        "You exceeded your current quota, please check your plan",
        "billing hard limit has been reached",
        "daily limit exceeded for this model",
        "monthly limit reached",
    ] {
        assert_eq!(
            classify(&provider(429, message)),
            ErrorAction::Fallback,
            "{message}"
        );
    }
}

#[test]
fn transient_wording_rows() {
    for message in [
        "rate limit exceeded, slow down",
        "RESOURCE_EXHAUSTED",
        "too many requests in flight",
        "the model is currently unavailable",
        "server overloaded",
        "we are at capacity",
        "bad gateway",
        "upstream timeout",
        "deadline exceeded talking to backend",
        "connection reset by peer",
    ] {
        assert_eq!(
            classify(&LlmError::ResponseFormat(message.to_string())),
            ErrorAction::Retry,
            "{message}"
        );
    }
}

#[test]
fn permanent_wording_rows() {
    for message in [
        "invalid api key provided",
        "unauthorized",
        "forbidden",
        "model not found",
        "bad request: missing field",
        "request body was malformed",
        "unprocessable entity",
    ] {
        assert_eq!(
            classify(&LlmError::ResponseFormat(message.to_string())),
            ErrorAction::Fail,
            "{message}"
        );
    }
}

#[test]
fn unknown_defaults_to_retry() {
    assert_eq!(
        classify(&LlmError::ResponseFormat("zorp".to_string())),
        ErrorAction::Retry
    );
}

#[test]
fn classification_is_deterministic() {
    let samples = [
        provider(429, "quota exceeded"),
        provider(503, "unavailable"),
        provider(404, "not found"),
        LlmError::Cancelled,
        LlmError::DeadlineExceeded,
    ];
    for err in &samples {
        assert_eq!(classify(err), classify(err));
    }
}

#[test]
fn budget_exhaustion_is_terminal() {
    let inner = provider(503, "unavailable");
    assert_eq!(
        classify(&inner.into_budget_exhausted()),
        ErrorAction::Fail
    );
}
