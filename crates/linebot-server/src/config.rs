use clap::Parser;
use linebot_llm::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

fn duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Service configuration; every option is a flag with an environment
/// fallback, so containers configure purely through the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "linebot", about = "Campus LINE-bot webhook service")]
pub struct Config {
    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Channel secret for webhook signature verification.
    #[arg(long, env = "LINE_CHANNEL_SECRET", default_value = "", hide_env_values = true)]
    pub channel_secret: String,

    /// Channel access token for the Messaging API.
    #[arg(long, env = "LINE_CHANNEL_TOKEN", default_value = "", hide_env_values = true)]
    pub channel_token: String,

    /// Where `GET /` sends visitors.
    #[arg(
        long,
        env = "REDIRECT_URL",
        default_value = "https://github.com/campus-bots/linebot"
    )]
    pub redirect_url: String,

    /// Path of the local cache database.
    #[arg(long, env = "DB_PATH", default_value = "cache.db")]
    pub db_path: PathBuf,

    /// TTL for cached upstream records.
    #[arg(long, env = "CACHE_TTL", value_parser = duration, default_value = "168h")]
    pub cache_ttl: Duration,

    /// Upstream fetch timeout.
    #[arg(long, env = "SCRAPER_TIMEOUT", value_parser = duration, default_value = "30s")]
    pub scraper_timeout: Duration,

    /// Upstream fetch retries.
    #[arg(long, env = "SCRAPER_RETRIES", default_value_t = 3)]
    pub scraper_retries: u32,

    /// Per-event processing budget after the webhook ack.
    #[arg(long, env = "WEBHOOK_TIMEOUT", value_parser = duration, default_value = "25s")]
    pub webhook_timeout: Duration,

    /// Per-conversation bucket capacity.
    #[arg(long, env = "USER_RATE_TOKENS", default_value_t = 5)]
    pub user_rate_tokens: u32,

    /// Per-conversation refill, tokens per second.
    #[arg(long, env = "USER_RATE_REFILL", default_value_t = 0.2)]
    pub user_rate_refill: f64,

    /// Global outbound reply budget, requests per second.
    #[arg(long, env = "GLOBAL_OUTBOUND_RPS", default_value_t = 80)]
    pub global_outbound_rps: u32,

    /// Per-conversation LLM quota, requests per hour.
    #[arg(long, env = "LLM_REQUESTS_PER_HOUR", default_value_t = 10)]
    pub llm_requests_per_hour: u32,

    /// Idle-bucket sweep cadence for the keyed limiters.
    #[arg(long, env = "LIMITER_SWEEP_INTERVAL", value_parser = duration, default_value = "5m")]
    pub limiter_sweep_interval: Duration,

    /// Cache cleanup cadence.
    #[arg(long, env = "CLEANUP_INTERVAL", value_parser = duration, default_value = "12h")]
    pub cleanup_interval: Duration,

    /// Delay before the first cleanup run.
    #[arg(long, env = "CLEANUP_INITIAL_DELAY", value_parser = duration, default_value = "10m")]
    pub cleanup_initial_delay: Duration,

    /// Upstream refresh cadence (stickers and sources).
    #[arg(long, env = "REFRESH_INTERVAL", value_parser = duration, default_value = "24h")]
    pub refresh_interval: Duration,

    /// Delay before the first refresh run.
    #[arg(long, env = "REFRESH_INITIAL_DELAY", value_parser = duration, default_value = "1m")]
    pub refresh_initial_delay: Duration,

    /// Upstream source URLs, probed by readiness and refreshed by the
    /// scheduler. Empty is fine; registered scrapers replace these.
    #[arg(long, env = "UPSTREAM_URLS", value_delimiter = ',')]
    pub upstream_urls: Vec<String>,

    /// Modules the daily 03:00 pre-warm touches.
    #[arg(
        long,
        env = "WARMUP_MODULES",
        value_delimiter = ',',
        default_value = "course,contact"
    )]
    pub warmup_modules: Vec<String>,

    /// Object store bucket URL; unset runs single-node (no leader
    /// election, no snapshot polling).
    #[arg(long, env = "OBJECT_STORE_URL")]
    pub object_store_url: Option<String>,

    /// Bearer token for the object store.
    #[arg(long, env = "OBJECT_STORE_TOKEN", hide_env_values = true)]
    pub object_store_token: Option<String>,

    /// Object key of the published snapshot.
    #[arg(long, env = "SNAPSHOT_KEY", default_value = "snapshots/cache.db.zst")]
    pub snapshot_key: String,

    /// Follower snapshot poll cadence.
    #[arg(long, env = "SNAPSHOT_POLL_INTERVAL", value_parser = duration, default_value = "5m")]
    pub snapshot_poll_interval: Duration,

    /// Object key of the leader lock.
    #[arg(long, env = "SNAPSHOT_LOCK_KEY", default_value = "locks/leader.json")]
    pub snapshot_lock_key: String,

    /// Leader lock TTL.
    #[arg(long, env = "SNAPSHOT_LOCK_TTL", value_parser = duration, default_value = "15m")]
    pub snapshot_lock_ttl: Duration,

    /// Scratch directory for snapshot compression and downloads.
    #[arg(long, env = "SNAPSHOT_TEMP_DIR", default_value = "/tmp")]
    pub snapshot_temp_dir: PathBuf,

    /// Object key of the shared schedule state.
    #[arg(long, env = "SCHEDULE_KEY", default_value = "state/schedule.json")]
    pub schedule_key: String,

    /// Gemini API key; unset disables Gemini handles.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Groq API key; unset disables Groq handles.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    /// Ordered `provider/model` handles for intent parsing.
    #[arg(
        long,
        env = "INTENT_MODELS",
        value_delimiter = ',',
        default_value = "gemini/gemini-2.0-flash,gemini/gemini-1.5-flash,groq/llama-3.3-70b-versatile"
    )]
    pub intent_models: Vec<String>,

    /// Ordered `provider/model` handles for query expansion.
    #[arg(
        long,
        env = "EXPANDER_MODELS",
        value_delimiter = ',',
        default_value = "gemini/gemini-1.5-flash,groq/llama-3.1-8b-instant"
    )]
    pub expander_models: Vec<String>,

    /// LLM retry attempts per handle.
    #[arg(long, env = "LLM_RETRY_MAX_ATTEMPTS", default_value_t = 3)]
    pub llm_retry_max_attempts: u32,

    /// Initial LLM backoff.
    #[arg(long, env = "LLM_RETRY_INITIAL_DELAY", value_parser = duration, default_value = "500ms")]
    pub llm_retry_initial_delay: Duration,

    /// LLM backoff cap.
    #[arg(long, env = "LLM_RETRY_MAX_DELAY", value_parser = duration, default_value = "8s")]
    pub llm_retry_max_delay: Duration,

    /// Per-call LLM timeout.
    #[arg(long, env = "LLM_ATTEMPT_TIMEOUT", value_parser = duration, default_value = "20s")]
    pub llm_attempt_timeout: Duration,

    /// Reply messages per reply token.
    #[arg(long, env = "MAX_MESSAGES_PER_REPLY", default_value_t = 5)]
    pub max_messages_per_reply: usize,

    /// Events processed per webhook request; extras are dropped.
    #[arg(long, env = "MAX_EVENTS_PER_WEBHOOK", default_value_t = 100)]
    pub max_events_per_webhook: usize,

    /// Reply tokens shorter than this are treated as absent.
    #[arg(long, env = "MIN_REPLY_TOKEN_LENGTH", default_value_t = 10)]
    pub min_reply_token_length: usize,

    /// Inbound message length cap, in characters.
    #[arg(long, env = "MAX_MESSAGE_LENGTH", default_value_t = 20_000)]
    pub max_message_length: usize,

    /// Postback payload size cap, in bytes.
    #[arg(long, env = "MAX_POSTBACK_DATA_SIZE", default_value_t = 300)]
    pub max_postback_data_size: usize,

    /// HTTP shutdown grace period.
    #[arg(long, env = "SHUTDOWN_GRACE", value_parser = duration, default_value = "10s")]
    pub shutdown_grace: Duration,
}

impl Config {
    /// True when snapshot sync is configured.
    pub fn sync_enabled(&self) -> bool {
        self.object_store_url.is_some()
    }

    /// True when at least one LLM provider key is present.
    pub fn llm_configured(&self) -> bool {
        self.gemini_api_key.is_some() || self.groq_api_key.is_some()
    }

    /// The retry policy shared by both chains.
    pub fn llm_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_retry_max_attempts,
            initial_delay: self.llm_retry_initial_delay,
            max_delay: self.llm_retry_max_delay,
        }
    }

    /// Parses `provider/model` entries, skipping malformed ones.
    pub fn parse_model_list(entries: &[String]) -> Vec<(String, String)> {
        entries
            .iter()
            .filter_map(|entry| {
                let (provider, model) = entry.split_once('/')?;
                let provider = provider.trim().to_lowercase();
                let model = model.trim();
                if provider.is_empty() || model.is_empty() {
                    return None;
                }
                Some((provider, model.to_string()))
            })
            .collect()
    }
}
