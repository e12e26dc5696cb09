//! Upstream data sources.
//!
//! The scraper that actually parses university pages is an external
//! collaborator; the runtime only needs refresh, probe, and warm-up
//! entry points. The same goes for the sticker set the bot replies
//! with.

use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

/// Error from an upstream source.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream {name} returned status {status}")]
    Status { name: String, status: u16 },
}

/// A remote source feeding one or more cache namespaces.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Short name for logs and probe reports.
    fn name(&self) -> &str;

    /// Full refresh of this source's cached data.
    async fn refresh(&self) -> Result<(), UpstreamError>;

    /// Cheap reachability probe (HEAD). The caller bounds the wait.
    async fn probe(&self) -> Result<(), UpstreamError>;

    /// Pre-warms one module of this source; unknown modules are a no-op.
    async fn warm(&self, module: &str) -> Result<(), UpstreamError>;
}

/// Minimal HTTP upstream: probes with HEAD and treats refresh/warm as a
/// GET that primes the remote cache. Real scrapers replace this.
pub struct HttpUpstream {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl HttpUpstream {
    /// Creates an upstream over one base URL.
    pub fn new(name: impl Into<String>, url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refresh(&self) -> Result<(), UpstreamError> {
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status {
                name: self.name.clone(),
                status: response.status().as_u16(),
            });
        }
        // Drain the body so the connection can be reused.
        let _ = response.bytes().await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), UpstreamError> {
        let response = self.http.head(&self.url).send().await?;
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(UpstreamError::Status {
                name: self.name.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn warm(&self, _module: &str) -> Result<(), UpstreamError> {
        self.refresh().await
    }
}

/// The sticker set used for sticker replies.
#[async_trait]
pub trait StickerProvider: Send + Sync {
    /// Picks a sticker `(package_id, sticker_id)`, or `None` when the
    /// set is empty.
    fn pick(&self) -> Option<(String, String)>;

    /// Refreshes the set; returns its new size.
    async fn refresh(&self) -> Result<usize, UpstreamError>;
}

/// A fixed sticker set rotated round-robin.
pub struct StaticStickerProvider {
    stickers: RwLock<Vec<(String, String)>>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl StaticStickerProvider {
    /// Creates a provider over a fixed set.
    pub fn new(stickers: Vec<(String, String)>) -> Self {
        Self {
            stickers: RwLock::new(stickers),
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// The stock set shipped with the bot.
    pub fn default_set() -> Self {
        Self::new(vec![
            ("446".to_string(), "1988".to_string()),
            ("446".to_string(), "2008".to_string()),
            ("789".to_string(), "10857".to_string()),
        ])
    }
}

#[async_trait]
impl StickerProvider for StaticStickerProvider {
    fn pick(&self) -> Option<(String, String)> {
        let stickers = self.stickers.read().unwrap();
        if stickers.is_empty() {
            return None;
        }
        let index = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            % stickers.len();
        Some(stickers[index].clone())
    }

    async fn refresh(&self) -> Result<usize, UpstreamError> {
        Ok(self.stickers.read().unwrap().len())
    }
}

/// Probes every upstream with an individual timeout, reporting each
/// outcome. Used by the readiness endpoint with a 3-second budget.
pub async fn probe_all(
    upstreams: &[std::sync::Arc<dyn Upstream>],
    each_within: Duration,
) -> Vec<(String, bool)> {
    let probes = upstreams.iter().map(|upstream| async move {
        let ok = tokio::time::timeout(each_within, upstream.probe())
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        (upstream.name().to_string(), ok)
    });
    futures::future::join_all(probes).await
}
