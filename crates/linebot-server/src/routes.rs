//! HTTP surface.
//!
//! Five routes: a redirect root, liveness, readiness, the webhook, and
//! the Prometheus exposition. Every response carries the security
//! headers, set by overriding middleware so handlers cannot forget
//! them.

use crate::storage::CacheStore;
use crate::upstream::{probe_all, Upstream};
use crate::webhook::WebhookIngress;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{HeaderName, HeaderValue, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;

const PROBE_BUDGET: Duration = Duration::from_secs(3);
const SIGNATURE_HEADER: &str = "x-line-signature";
const MAX_CALLBACK_BODY: usize = 1024 * 1024;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<WebhookIngress>,
    pub engine: Arc<dyn CacheStore>,
    pub upstreams: Vec<Arc<dyn Upstream>>,
    pub prometheus: PrometheusHandle,
    pub redirect_url: String,
}

/// Builds the router with the full middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(redirect_root).head(redirect_root))
        .route("/healthz", get(healthz).head(healthz))
        .route("/ready", get(ready).head(ready))
        .route(
            "/callback",
            post(callback).layer(DefaultBodyLimit::max(MAX_CALLBACK_BODY)),
        )
        .route("/metrics", get(metrics_export))
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-frame-options"),
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-xss-protection"),
                    HeaderValue::from_static("1; mode=block"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("referrer-policy"),
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                )),
        )
        .with_state(state)
}

async fn redirect_root(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(LOCATION, state.redirect_url.clone())],
    )
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if !state.engine.ready().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "degraded",
                "reason": "storage engine is not ready",
            })),
        );
    }

    let probes: BTreeMap<String, bool> = probe_all(&state.upstreams, PROBE_BUDGET)
        .await
        .into_iter()
        .collect();

    let mut cache = BTreeMap::new();
    for namespace in state.engine.namespaces() {
        let count = state.engine.count(&namespace).await.unwrap_or(0);
        cache.insert(namespace, count);
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "upstreams": probes,
            "cache": cache,
        })),
    )
}

async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    state.ingress.callback(signature, &body)
}

async fn metrics_export(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}
