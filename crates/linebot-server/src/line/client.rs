use super::types::OutMessage;
use async_trait::async_trait;
use serde::Serialize;

const DEFAULT_API_BASE: &str = "https://api.line.me";

/// Error from the Messaging API.
#[derive(Debug, thiserror::Error)]
pub enum LineApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("line api returned status {status}: {body}")]
    Status { status: u16, body: String },
}

impl LineApiError {
    /// The platform rejected the reply token (expired, reused, or bogus).
    pub fn is_invalid_reply_token(&self) -> bool {
        matches!(self, LineApiError::Status { body, .. } if body.contains("Invalid reply token"))
    }

    /// The platform throttled us.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            LineApiError::Status { status, body, .. } => {
                *status == 429 || body.to_lowercase().contains("rate limit")
            }
            LineApiError::Http(_) => false,
        }
    }
}

/// Outbound surface of the Messaging API used by the ingress.
#[async_trait]
pub trait ReplyClient: Send + Sync {
    /// Sends reply messages for a reply token. Tokens are single-use.
    async fn reply(&self, reply_token: &str, messages: &[OutMessage]) -> Result<(), LineApiError>;

    /// Shows the typing/loading indicator in a 1-on-1 chat. Best effort.
    async fn show_loading(&self, chat_id: &str) -> Result<(), LineApiError>;
}

/// HTTP implementation of [`ReplyClient`].
pub struct LineClient {
    http: reqwest::Client,
    channel_token: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: &'a [OutMessage],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadingRequest<'a> {
    chat_id: &'a str,
    loading_seconds: u32,
}

impl LineClient {
    /// Creates a client with the channel access token.
    pub fn new(http: reqwest::Client, channel_token: impl Into<String>) -> Self {
        Self {
            http,
            channel_token: channel_token.into(),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Overrides the API base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), LineApiError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.channel_token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(LineApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ReplyClient for LineClient {
    async fn reply(&self, reply_token: &str, messages: &[OutMessage]) -> Result<(), LineApiError> {
        self.post_json(
            "/v2/bot/message/reply",
            &ReplyRequest {
                reply_token,
                messages,
            },
        )
        .await
    }

    async fn show_loading(&self, chat_id: &str) -> Result<(), LineApiError> {
        self.post_json(
            "/v2/bot/chat/loading/start",
            &LoadingRequest {
                chat_id,
                loading_seconds: 20,
            },
        )
        .await
    }
}
