//! The chain walk of the fallback sequence described in the product's
//! degradation story: retry the model, switch models, switch providers,
//! report only real provider switches.

use super::support::ScriptedProvider;
use linebot_llm::{ChainBuilder, ChatProvider, ChatRequest, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn full_ladder_gemini_retries_then_model_switch_then_provider_switch() {
    let m1 = ScriptedProvider::always_failing("gemini", "m1", 503, "service unavailable");
    let m2 = ScriptedProvider::always_failing("gemini", "m2", 503, "service unavailable");
    let groq = ScriptedProvider::succeeding("groq", "m1");

    let fallbacks = Arc::new(AtomicU32::new(0));
    let f = Arc::clone(&fallbacks);

    let chain = ChainBuilder::new("intent")
        .retry(fast_retry())
        .handle(Arc::clone(&m1) as Arc<dyn ChatProvider>)
        .handle(Arc::clone(&m2) as Arc<dyn ChatProvider>)
        .handle(Arc::clone(&groq) as Arc<dyn ChatProvider>)
        .on_provider_fallback(move |from, to| {
            assert_eq!((from, to), ("gemini", "groq"));
            f.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let out = chain
        .generate(&ChatRequest::prompt("hello"), None)
        .await
        .unwrap();
    assert_eq!(out, "groq:m1");

    // Each failing handle burns its full retry budget.
    assert_eq!(m1.call_count(), 3);
    assert_eq!(m2.call_count(), 3);
    assert_eq!(groq.call_count(), 1);
    // m1 -> m2 stayed inside gemini; exactly one cross-provider switch.
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn success_within_provider_reports_no_fallback() {
    let m1 = ScriptedProvider::always_failing("gemini", "m1", 503, "service unavailable");
    let m2 = ScriptedProvider::failing_n_times("gemini", "m2", 1, 503, "service unavailable");

    let fallbacks = Arc::new(AtomicU32::new(0));
    let f = Arc::clone(&fallbacks);

    let chain = ChainBuilder::new("intent")
        .retry(fast_retry())
        .handle(Arc::clone(&m1) as Arc<dyn ChatProvider>)
        .handle(Arc::clone(&m2) as Arc<dyn ChatProvider>)
        .on_provider_fallback(move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let out = chain
        .generate(&ChatRequest::prompt("hello"), None)
        .await
        .unwrap();
    assert_eq!(out, "gemini:m2");
    assert_eq!(m2.call_count(), 2);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn retry_counts_attempts_per_handle() {
    let flaky = ScriptedProvider::failing_n_times("gemini", "m1", 2, 503, "overloaded");
    let chain = ChainBuilder::new("t")
        .retry(fast_retry())
        .handle(Arc::clone(&flaky) as Arc<dyn ChatProvider>)
        .build();

    chain
        .generate(&ChatRequest::prompt("x"), None)
        .await
        .unwrap();
    assert_eq!(flaky.call_count(), 3);
}

#[tokio::test]
async fn auth_failure_aborts_the_whole_walk() {
    let bad = ScriptedProvider::always_failing("gemini", "m1", 401, "unauthorized");
    let never_reached = ScriptedProvider::succeeding("groq", "m1");

    let chain = ChainBuilder::new("t")
        .retry(fast_retry())
        .handle(Arc::clone(&bad) as Arc<dyn ChatProvider>)
        .handle(Arc::clone(&never_reached) as Arc<dyn ChatProvider>)
        .build();

    assert!(chain.generate(&ChatRequest::prompt("x"), None).await.is_err());
    assert_eq!(bad.call_count(), 1);
    assert_eq!(never_reached.call_count(), 0);
}

#[tokio::test]
async fn quota_error_advances_without_retrying() {
    let exhausted =
        ScriptedProvider::always_failing("gemini", "m1", 429, "You exceeded your current quota");
    let next = ScriptedProvider::succeeding("groq", "m1");

    let chain = ChainBuilder::new("t")
        .retry(fast_retry())
        .handle(Arc::clone(&exhausted) as Arc<dyn ChatProvider>)
        .handle(Arc::clone(&next) as Arc<dyn ChatProvider>)
        .build();

    let out = chain
        .generate(&ChatRequest::prompt("x"), None)
        .await
        .unwrap();
    assert_eq!(out, "groq:m1");
    assert_eq!(exhausted.call_count(), 1);
}
