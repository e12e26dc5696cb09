//! Application lifecycle: ordered construction, the serve loop, ordered
//! shutdown.

use crate::config::Config;
use crate::handlers::{HandlerPipeline, HelpHandler};
use crate::jobs::{JobRunner, JobsConfig};
use crate::line::LineClient;
use crate::routes::{build_router, AppState};
use crate::storage::{CacheStore, EngineAdapter, MemoryCacheStore, StorageError};
use crate::upstream::{HttpUpstream, StaticStickerProvider, StickerProvider, Upstream};
use crate::webhook::{NluGate, WebhookConfig, WebhookIngress};
use linebot_llm::{ChainBuilder, FallbackChain, IntentParser, QueryExpander};
use linebot_ratelimit::{KeyedLimiter, LlmQuota, TokenBucket};
use linebot_sync::{
    restore_snapshot, HttpObjectStore, ObjectStore, ScheduleStore, SnapshotConfig,
    SnapshotManager, SyncError,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

/// Fatal startup/shutdown error.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("metrics recorder: {0}")]
    Metrics(String),
}

/// The assembled service.
pub struct App {
    cfg: Config,
    state: AppState,
    ingress: Arc<WebhookIngress>,
    engine: Arc<dyn CacheStore>,
    jobs: Arc<JobRunner>,
    snapshots: Option<Arc<SnapshotManager>>,
}

impl App {
    /// Builds every component in dependency order. LLM and snapshot
    /// features degrade to disabled rather than failing startup; only
    /// storage and the metrics recorder are load-bearing.
    pub async fn build(cfg: Config) -> Result<Self, AppError> {
        let prometheus = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|err| AppError::Metrics(err.to_string()))?;

        // Object store first: a published snapshot seeds the database
        // before the engine opens it.
        let object_store: Option<Arc<dyn ObjectStore>> = match &cfg.object_store_url {
            Some(url) => {
                let http = reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(60))
                    .build()?;
                match HttpObjectStore::new(http, url.clone(), cfg.object_store_token.as_deref()) {
                    Ok(store) => Some(Arc::new(store)),
                    Err(err) => {
                        tracing::warn!(error = %err, "object store misconfigured, running single-node");
                        None
                    }
                }
            }
            None => None,
        };

        let initial_etag = match &object_store {
            Some(store) => {
                match restore_snapshot(
                    store.as_ref(),
                    &cfg.snapshot_key,
                    &cfg.db_path,
                    &cfg.snapshot_temp_dir,
                )
                .await
                {
                    Ok(etag) => etag,
                    Err(err) => {
                        tracing::warn!(error = %err, "snapshot restore failed, starting cold");
                        None
                    }
                }
            }
            None => None,
        };

        let engine: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::open(&cfg.db_path).await?);

        let scraper_http = reqwest::Client::builder()
            .timeout(cfg.scraper_timeout)
            .build()?;
        let upstreams: Vec<Arc<dyn Upstream>> = cfg
            .upstream_urls
            .iter()
            .enumerate()
            .map(|(index, url)| {
                let name = url::host_label(url).unwrap_or_else(|| format!("source{index}"));
                Arc::new(HttpUpstream::new(name, url.clone(), scraper_http.clone()))
                    as Arc<dyn Upstream>
            })
            .collect();

        let stickers: Arc<dyn StickerProvider> = Arc::new(StaticStickerProvider::default_set());

        // LLM features: any construction problem disables the feature
        // and the rest of the service carries on.
        let nlu = build_nlu(&cfg);
        let nlu_enabled = nlu.is_some();

        let pipeline = Arc::new(HandlerPipeline::new(vec![Arc::new(HelpHandler::new(
            nlu_enabled,
        ))]));

        let user_limiter = KeyedLimiter::builder()
            .name("user")
            .capacity(cfg.user_rate_tokens)
            .refill_per_sec(cfg.user_rate_refill)
            .sweep_interval(cfg.limiter_sweep_interval)
            .build();
        let llm_quota = Arc::new(LlmQuota::new(
            cfg.llm_requests_per_hour,
            cfg.limiter_sweep_interval,
        ));
        let outbound = Arc::new(TokenBucket::new(
            cfg.global_outbound_rps,
            f64::from(cfg.global_outbound_rps),
        ));

        let line_http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        let ingress = WebhookIngress::builder()
            .config(WebhookConfig {
                channel_secret: cfg.channel_secret.clone(),
                max_messages_per_reply: cfg.max_messages_per_reply,
                max_events_per_webhook: cfg.max_events_per_webhook,
                min_reply_token_length: cfg.min_reply_token_length,
                max_message_length: cfg.max_message_length,
                max_postback_data_size: cfg.max_postback_data_size,
                processing_timeout: cfg.webhook_timeout,
            })
            .reply_client(Arc::new(LineClient::new(
                line_http,
                cfg.channel_token.clone(),
            )))
            .pipeline(Arc::clone(&pipeline))
            .nlu(nlu)
            .user_limiter(user_limiter)
            .llm_quota(Arc::clone(&llm_quota))
            .outbound(outbound)
            .stickers(Arc::clone(&stickers))
            .build();

        let (snapshots, schedule) = match &object_store {
            Some(store) => {
                let manager = SnapshotManager::new(
                    Arc::clone(store),
                    Arc::new(EngineAdapter(Arc::clone(&engine))),
                    SnapshotConfig {
                        key: cfg.snapshot_key.clone(),
                        poll_interval: cfg.snapshot_poll_interval,
                        lock_key: cfg.snapshot_lock_key.clone(),
                        lock_ttl: cfg.snapshot_lock_ttl,
                        temp_dir: cfg.snapshot_temp_dir.clone(),
                        db_path: cfg.db_path.clone(),
                    },
                    initial_etag,
                );
                manager.spawn_poll_loop();
                let schedule = Arc::new(ScheduleStore::new(
                    Arc::clone(store),
                    cfg.schedule_key.clone(),
                ));
                (Some(manager), Some(schedule))
            }
            None => (None, None),
        };

        let jobs = JobRunner::new(
            Arc::clone(&engine),
            upstreams.clone(),
            Arc::clone(&stickers),
            schedule,
            snapshots.clone(),
            JobsConfig {
                cache_ttl: cfg.cache_ttl,
                cleanup_interval: cfg.cleanup_interval,
                cleanup_initial_delay: cfg.cleanup_initial_delay,
                refresh_interval: cfg.refresh_interval,
                refresh_initial_delay: cfg.refresh_initial_delay,
                warmup_modules: cfg.warmup_modules.clone(),
            },
        );
        jobs.spawn_all();

        let state = AppState {
            ingress: Arc::clone(&ingress),
            engine: Arc::clone(&engine),
            upstreams,
            prometheus,
            redirect_url: cfg.redirect_url.clone(),
        };

        Ok(Self {
            cfg,
            state,
            ingress,
            engine,
            jobs,
            snapshots,
        })
    }

    /// Serves until SIGINT/SIGTERM, then runs the ordered shutdown.
    pub async fn run(self) -> Result<(), AppError> {
        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", self.cfg.port)).await?;
        tracing::info!(port = self.cfg.port, "listening");

        let router = build_router(self.state.clone());
        let jobs = Arc::clone(&self.jobs);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                tracing::info!("shutdown signal received");
                // Background jobs stop scheduling new work first; the
                // HTTP server then drains its connections.
                jobs.cancel();
            })
            .await?;

        self.ingress.shutdown(self.cfg.shutdown_grace).await;
        self.jobs.shutdown().await;
        // LLM handles close with the chains they live in; nothing to
        // flush, failures would only be logged anyway.
        if let Err(err) = self.engine.close().await {
            tracing::warn!(error = %err, "storage close failed");
        }
        if let Some(snapshots) = &self.snapshots {
            snapshots.shutdown().await;
        }
        tracing::info!("shutdown complete");
        Ok(())
    }
}

fn build_chain(cfg: &Config, name: &str, entries: &[String]) -> FallbackChain {
    let mut builder = ChainBuilder::new(name)
        .retry(cfg.llm_retry_policy())
        .attempt_timeout(cfg.llm_attempt_timeout);

    for (provider, model) in Config::parse_model_list(entries) {
        builder = match provider.as_str() {
            "gemini" => match &cfg.gemini_api_key {
                Some(key) => builder.gemini(key, &model),
                None => builder,
            },
            "groq" => match &cfg.groq_api_key {
                Some(key) => builder.groq(key, &model),
                None => builder,
            },
            other => {
                tracing::warn!(provider = other, model = %model, "unknown provider, dropping handle");
                builder
            }
        };
    }
    builder.build()
}

fn build_nlu(cfg: &Config) -> Option<Arc<NluGate>> {
    if !cfg.llm_configured() {
        tracing::info!("no LLM keys configured, natural-language features disabled");
        return None;
    }

    let intent_chain = build_chain(cfg, "intent", &cfg.intent_models);
    let expander_chain = build_chain(cfg, "expand", &cfg.expander_models);
    if intent_chain.is_empty() {
        tracing::warn!("no usable intent handles, natural-language features disabled");
        return None;
    }

    Some(Arc::new(NluGate {
        intent: IntentParser::new(intent_chain),
        expander: QueryExpander::new(expander_chain),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

mod url {
    /// Pulls a short label out of a URL for logs and probe reports.
    pub fn host_label(url: &str) -> Option<String> {
        let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
        let host = rest.split(['/', ':']).next()?;
        if host.is_empty() {
            None
        } else {
            Some(host.to_string())
        }
    }

}
