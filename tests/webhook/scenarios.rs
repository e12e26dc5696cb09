//! The end-to-end conversation scenarios.

use super::support::*;
use axum::http::StatusCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn rate_limit_in_one_on_one() {
    // Bucket: two tokens, no refill. Three rapid messages from U1.
    let client = RecordingClient::new();
    let ingress = build_ingress(
        Arc::clone(&client),
        IngressOptions {
            user_capacity: 2,
            nlu: None,
            ..IngressOptions::default()
        },
    );

    for token in ["tok0000000001", "tok0000000002", "tok0000000003"] {
        let body = personal_text("U1", "ping", token);
        assert_eq!(post(&ingress, &body), StatusCode::OK);
    }
    ingress.shutdown(Duration::from_secs(5)).await;

    let sent = client.sent();
    assert_eq!(sent.len(), 3);
    // Two help-fallback replies for the unmatched text, then the nudge.
    for reply in &sent[..2] {
        let text = reply.1[0].text_content().unwrap();
        assert!(!text.starts_with('⏳'), "unexpected early nudge: {text}");
    }
    let nudge = sent[2].1[0].text_content().unwrap();
    assert!(nudge.starts_with('⏳'), "expected nudge, got {nudge}");
}

#[tokio::test]
async fn group_without_mention_stays_silent() {
    let client = RecordingClient::new();
    let ingress = build_ingress(Arc::clone(&client), IngressOptions::default());

    let body = serde_json::to_vec(&serde_json::json!({
        "events": [{
            "type": "message",
            "replyToken": "tok0000000001",
            "source": {"type": "group", "groupId": "G1", "userId": "U1"},
            "message": {"type": "text", "id": "m", "text": "help",
                         "mention": {"mentionees": []}}
        }]
    }))
    .unwrap();

    // The HTTP ack is still 200; the silence is only about replies.
    assert_eq!(post(&ingress, &body), StatusCode::OK);
    ingress.shutdown(Duration::from_secs(5)).await;
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn group_mention_is_excised_and_routed() {
    let client = RecordingClient::new();
    let ingress = build_ingress(Arc::clone(&client), IngressOptions::default());

    let body = serde_json::to_vec(&serde_json::json!({
        "events": [{
            "type": "message",
            "replyToken": "tok0000000001",
            "source": {"type": "group", "groupId": "G1", "userId": "U1"},
            "message": {"type": "text", "id": "m", "text": "@Bot 微積分",
                         "mention": {"mentionees": [
                             {"index": 0, "length": 4, "isSelf": true}
                         ]}}
        }]
    }))
    .unwrap();

    assert_eq!(post(&ingress, &body), StatusCode::OK);
    ingress.shutdown(Duration::from_secs(5)).await;

    let sent = client.sent();
    assert_eq!(sent.len(), 1, "mentioned message must be answered");
    let text = sent[0].1[0].text_content().unwrap();
    // The mention span is gone: the course handler saw only the query.
    assert_eq!(text, "課程查詢結果：微積分");
}

#[tokio::test]
async fn unmatched_message_consults_the_intent_parser() {
    let client = RecordingClient::new();
    let provider = CountingProvider::new();
    let ingress = build_ingress(
        Arc::clone(&client),
        IngressOptions {
            nlu: Some(nlu_over(Arc::clone(&provider) as _)),
            ..IngressOptions::default()
        },
    );

    let body = personal_text("U1", "幫我找關於極限的課", "tok0000000001");
    assert_eq!(post(&ingress, &body), StatusCode::OK);
    ingress.shutdown(Duration::from_secs(5)).await;

    // The intent parser returned action=course, query=微積分; the course
    // handler answered with that query.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1[0].text_content().unwrap(),
        "課程查詢結果：微積分"
    );
}

#[tokio::test]
async fn llm_quota_exhaustion_reports_reset_estimate() {
    let client = RecordingClient::new();
    let provider = CountingProvider::new();
    let ingress = build_ingress(
        Arc::clone(&client),
        IngressOptions {
            llm_per_hour: 1,
            nlu: Some(nlu_over(Arc::clone(&provider) as _)),
            ..IngressOptions::default()
        },
    );

    let first = personal_text("U1", "幫我找課 alpha", "tok0000000001");
    let second = personal_text("U1", "幫我找課 beta", "tok0000000002");
    assert_eq!(post(&ingress, &first), StatusCode::OK);
    assert_eq!(post(&ingress, &second), StatusCode::OK);
    ingress.shutdown(Duration::from_secs(5)).await;

    // Only the first message reached the provider.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    let sent = client.sent();
    assert_eq!(sent.len(), 2);
    let quota_text = sent[1].1[0].text_content().unwrap();
    assert!(quota_text.contains("每小時限 1 次"), "got {quota_text}");
    assert!(quota_text.contains("分鐘"), "got {quota_text}");
}

#[tokio::test]
async fn quota_exhaustion_in_group_is_silent() {
    let client = RecordingClient::new();
    let provider = CountingProvider::new();
    let ingress = build_ingress(
        Arc::clone(&client),
        IngressOptions {
            llm_per_hour: 1,
            nlu: Some(nlu_over(Arc::clone(&provider) as _)),
            ..IngressOptions::default()
        },
    );

    let event = |token: &str, text: &str| {
        serde_json::to_vec(&serde_json::json!({
            "events": [{
                "type": "message",
                "replyToken": token,
                "source": {"type": "group", "groupId": "G1", "userId": "U1"},
                "message": {"type": "text", "id": "m", "text": format!("@Bot {text}"),
                             "mention": {"mentionees": [
                                 {"index": 0, "length": 4, "isSelf": true}
                             ]}}
            }]
        }))
        .unwrap()
    };

    assert_eq!(post(&ingress, &event("tok0000000001", "找找 alpha")), StatusCode::OK);
    assert_eq!(post(&ingress, &event("tok0000000002", "找找 beta")), StatusCode::OK);
    ingress.shutdown(Duration::from_secs(5)).await;

    // First got an answer through the parser; second hit the quota and
    // was silently dropped because this is a shared chat.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.sent().len(), 1);
}
