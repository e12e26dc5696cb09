use crate::error::LlmError;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// What to do with a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Transient; try the same handle again after a backoff.
    Retry,
    /// This handle is out of budget; move to the next handle in the chain.
    Fallback,
    /// Permanent; retrying or switching handles will not help.
    Fail,
}

const FALLBACK_MARKERS: &[&str] = &["quota", "billing", "daily limit", "monthly limit"];

const RETRY_MARKERS: &[&str] = &[
    "rate limit",
    "resource_exhausted",
    "too many",
    "unavailable",
    "overloaded",
    "capacity",
    "gateway",
    "timeout",
    "deadline",
    "connection",
];

const FAIL_MARKERS: &[&str] = &[
    "invalid api key",
    "unauthorized",
    "forbidden",
    "not found",
    "bad request",
    "malformed",
    "unprocessable",
];

/// Maps an error to the action the chain should take.
///
/// Total over [`LlmError`]: every error maps to exactly one action, with
/// `Retry` as the conservative default for anything unrecognised. Quota
/// wording is checked before the status rules because providers report
/// exhausted daily quotas as plain 429s; retrying those burns the whole
/// backoff ladder before the chain would ever switch handles.
pub fn classify(err: &LlmError) -> ErrorAction {
    match err {
        LlmError::Cancelled => return ErrorAction::Fail,
        LlmError::DeadlineExceeded => return ErrorAction::Retry,
        LlmError::BudgetExhausted { .. } => return ErrorAction::Fail,
        LlmError::Config(_) => return ErrorAction::Fail,
        _ => {}
    }

    let message = err.to_string().to_lowercase();

    if FALLBACK_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorAction::Fallback;
    }

    if let Some(status) = err.status() {
        match status {
            429 | 408 | 409 => return ErrorAction::Retry,
            s if s >= 500 => return ErrorAction::Retry,
            400 | 401 | 403 | 404 | 422 => return ErrorAction::Fail,
            _ => {}
        }
    }

    if RETRY_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorAction::Retry;
    }

    if FAIL_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorAction::Fail;
    }

    ErrorAction::Retry
}

/// Reads a retry delay from response headers.
///
/// Recognises `retry-after-ms` (non-standard, milliseconds) and
/// `retry-after` (integer seconds or an HTTP-date). Returns zero when
/// absent or unparseable.
pub fn parse_retry_after(headers: &HeaderMap) -> Duration {
    if let Some(value) = headers.get("retry-after-ms") {
        if let Some(ms) = value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
            return Duration::from_millis(ms);
        }
    }

    if let Some(value) = headers.get("retry-after") {
        if let Ok(text) = value.to_str() {
            let text = text.trim();
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs);
            }
            if let Ok(when) = httpdate::parse_http_date(text) {
                return when
                    .duration_since(std::time::SystemTime::now())
                    .unwrap_or(Duration::ZERO);
            }
        }
    }

    Duration::ZERO
}
