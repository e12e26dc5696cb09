use crate::backoff::{full_jitter, has_sufficient_budget, RetryPolicy};
use crate::classify::{classify, ErrorAction};
use crate::error::LlmError;
use crate::events::ChainEvent;
use crate::providers::{ChatProvider, ChatRequest, GeminiClient, GroqClient};
use linebot_core::events::{EventListeners, FnListener};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An ordered list of provider handles tried in sequence.
///
/// Each handle is retried on transient errors with full-jitter backoff;
/// a permanent error or the end of the chain stops the walk. See the
/// crate docs for the intent/expansion contracts built on top.
pub struct FallbackChain {
    handles: Vec<Arc<dyn ChatProvider>>,
    retry: RetryPolicy,
    attempt_timeout: Option<Duration>,
    listeners: EventListeners<ChainEvent>,
    name: String,
}

impl FallbackChain {
    /// Starts building a chain.
    pub fn builder(name: impl Into<String>) -> ChainBuilder {
        ChainBuilder::new(name)
    }

    /// Number of usable handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True when no handle survived construction.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The chain name used in events and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Walks the chain until a handle produces text.
    ///
    /// `deadline` bounds the whole walk including backoff sleeps; `None`
    /// leaves pacing to the providers' own client timeouts.
    pub async fn generate(
        &self,
        request: &ChatRequest,
        deadline: Option<Instant>,
    ) -> Result<String, LlmError> {
        if self.handles.is_empty() {
            return Err(LlmError::Config(format!(
                "chain {} has no usable handles",
                self.name
            )));
        }

        let last_index = self.handles.len() - 1;
        let mut result = Err(LlmError::Config("unreachable".to_string()));

        for (index, handle) in self.handles.iter().enumerate() {
            match self.try_with_retry(handle.as_ref(), request, deadline).await {
                Ok((text, attempts)) => {
                    if index > 0 {
                        let previous = self.handles[index - 1].provider_tag();
                        if previous != handle.provider_tag() {
                            #[cfg(feature = "metrics")]
                            metrics::counter!(
                                "linebot_llm_provider_fallback_total",
                                "chain" => self.name.clone()
                            )
                            .increment(1);

                            self.listeners.emit(&ChainEvent::ProviderFallback {
                                chain: self.name.clone(),
                                timestamp: Instant::now(),
                                from: previous.to_string(),
                                to: handle.provider_tag().to_string(),
                            });
                        }
                    }

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "linebot_llm_calls_total",
                        "chain" => self.name.clone(),
                        "provider" => handle.provider_tag().to_string(),
                        "result" => "success"
                    )
                    .increment(1);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        chain = %self.name,
                        provider = handle.provider_tag(),
                        model = handle.model(),
                        attempts,
                        "chain call succeeded"
                    );

                    self.listeners.emit(&ChainEvent::Success {
                        chain: self.name.clone(),
                        timestamp: Instant::now(),
                        provider: handle.provider_tag().to_string(),
                        model: handle.model().to_string(),
                        attempts,
                    });
                    return Ok(text);
                }
                Err((err, attempts)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        chain = %self.name,
                        provider = handle.provider_tag(),
                        model = handle.model(),
                        attempts,
                        error = %err,
                        "chain handle failed"
                    );

                    self.listeners.emit(&ChainEvent::HandleFailed {
                        chain: self.name.clone(),
                        timestamp: Instant::now(),
                        provider: handle.provider_tag().to_string(),
                        model: handle.model().to_string(),
                        attempts,
                    });

                    let action = classify(&err);
                    result = Err(err);
                    if action == ErrorAction::Fail || index == last_index {
                        break;
                    }
                }
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "linebot_llm_calls_total",
            "chain" => self.name.clone(),
            "provider" => "none".to_string(),
            "result" => "error"
        )
        .increment(1);

        result
    }

    async fn try_with_retry(
        &self,
        handle: &dyn ChatProvider,
        request: &ChatRequest,
        deadline: Option<Instant>,
    ) -> Result<(String, u32), (LlmError, u32)> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let attempts = attempt + 1;

            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err((LlmError::DeadlineExceeded, attempt));
                }
            }

            let result = self.bounded_call(handle, request, deadline).await;

            let err = match result {
                Ok(text) => return Ok((text, attempts)),
                Err(err) => err,
            };

            if classify(&err) != ErrorAction::Retry || attempts >= max_attempts {
                return Err((err, attempts));
            }

            let mut delay = full_jitter(attempts, self.retry.initial_delay, self.retry.max_delay);
            if let Some(advertised) = err.retry_after() {
                delay = delay.max(advertised);
            }

            if !has_sufficient_budget(deadline, delay) {
                return Err((err.into_budget_exhausted(), attempts));
            }

            self.listeners.emit(&ChainEvent::Retry {
                chain: self.name.clone(),
                timestamp: Instant::now(),
                provider: handle.provider_tag().to_string(),
                model: handle.model().to_string(),
                attempt: attempts,
                delay,
            });

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn bounded_call(
        &self,
        handle: &dyn ChatProvider,
        request: &ChatRequest,
        deadline: Option<Instant>,
    ) -> Result<String, LlmError> {
        let mut budget = self.attempt_timeout;
        if let Some(d) = deadline {
            let remaining = d.saturating_duration_since(Instant::now());
            budget = Some(budget.map_or(remaining, |t| t.min(remaining)));
        }

        match budget {
            Some(t) => match tokio::time::timeout(t, handle.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::DeadlineExceeded),
            },
            None => handle.complete(request).await,
        }
    }
}

/// Builder for [`FallbackChain`].
pub struct ChainBuilder {
    name: String,
    retry: RetryPolicy,
    attempt_timeout: Option<Duration>,
    handles: Vec<Arc<dyn ChatProvider>>,
    listeners: EventListeners<ChainEvent>,
    http: reqwest::Client,
}

impl ChainBuilder {
    /// Creates a builder with the default retry policy and a fresh HTTP
    /// client shared by every handle added through [`gemini`](Self::gemini)
    /// / [`groq`](Self::groq).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry: RetryPolicy::default(),
            attempt_timeout: None,
            handles: Vec::new(),
            listeners: EventListeners::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Replaces the shared HTTP client (timeouts, proxies).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Sets the retry policy applied per handle.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Caps each individual provider call, independent of the walk
    /// deadline.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Appends a Gemini handle. A configuration error drops the handle
    /// and is logged; it never fails the build.
    pub fn gemini(mut self, api_key: &str, model: &str) -> Self {
        match GeminiClient::new(self.http.clone(), api_key, model) {
            Ok(client) => self.handles.push(Arc::new(client)),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(model, error = %_err, "dropping gemini handle");
            }
        }
        self
    }

    /// Appends a Groq handle, with the same drop-on-error behaviour.
    pub fn groq(mut self, api_key: &str, model: &str) -> Self {
        match GroqClient::new(self.http.clone(), api_key, model) {
            Ok(client) => self.handles.push(Arc::new(client)),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(model, error = %_err, "dropping groq handle");
            }
        }
        self
    }

    /// Appends a pre-built handle.
    pub fn handle(mut self, handle: Arc<dyn ChatProvider>) -> Self {
        self.handles.push(handle);
        self
    }

    /// Registers a callback for cross-provider fallbacks.
    pub fn on_provider_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let ChainEvent::ProviderFallback { from, to, .. } = event {
                f(from, to);
            }
        }));
        self
    }

    /// Registers a callback for successful calls with the attempt count.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let ChainEvent::Success { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Registers a callback for each retry.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event| {
            if let ChainEvent::Retry { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        }));
        self
    }

    /// Builds the chain.
    pub fn build(self) -> FallbackChain {
        FallbackChain {
            handles: self.handles,
            retry: self.retry,
            attempt_timeout: self.attempt_timeout,
            listeners: self.listeners,
            name: self.name,
        }
    }
}

/// A parsed user intent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Intent {
    /// What the user wants: `course`, `id`, `contact`, or `other`.
    pub action: String,
    /// The extracted search term, already stripped of filler words.
    #[serde(default)]
    pub query: String,
}

const INTENT_SYSTEM_PROMPT: &str = "\
You route messages for a campus assistant. Reply with one JSON object, no \
prose: {\"action\": \"course\"|\"id\"|\"contact\"|\"other\", \"query\": \
\"<search term>\"}. Use \"other\" when nothing fits.";

/// Intent parsing over a fallback chain.
///
/// Total failure propagates: the ingress falls back to the keyword path
/// when this returns an error.
pub struct IntentParser {
    chain: FallbackChain,
}

impl IntentParser {
    /// Wraps a chain. An empty chain builds fine but reports
    /// `is_enabled() == false`.
    pub fn new(chain: FallbackChain) -> Self {
        Self { chain }
    }

    /// True when at least one handle is available.
    pub fn is_enabled(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Parses the user's text into an [`Intent`].
    pub async fn parse(
        &self,
        text: &str,
        deadline: Option<Instant>,
    ) -> Result<Intent, LlmError> {
        let request = ChatRequest::prompt(text).with_system(INTENT_SYSTEM_PROMPT);
        let raw = self.chain.generate(&request, deadline).await?;
        extract_intent(&raw)
    }
}

fn extract_intent(raw: &str) -> Result<Intent, LlmError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => {
            return Err(LlmError::ResponseFormat(format!(
                "no JSON object in intent reply: {raw:.80}"
            )))
        }
    };
    let intent: Intent = serde_json::from_str(json)?;
    if intent.action.is_empty() {
        return Err(LlmError::ResponseFormat(
            "intent reply carried an empty action".to_string(),
        ));
    }
    Ok(intent)
}

const EXPANDER_SYSTEM_PROMPT: &str = "\
You expand search queries for a campus assistant. Reply with up to five \
alternative phrasings of the query, one per line, no numbering, no prose. \
Keep the original language.";

/// Query expansion over a fallback chain.
///
/// Expansion is a total function: when every handle fails, the original
/// query comes back alone and the failure is only recorded, never
/// surfaced. The original query always leads the output so downstream
/// ranking keeps its exact-match signal.
pub struct QueryExpander {
    chain: FallbackChain,
}

impl QueryExpander {
    /// Wraps a chain.
    pub fn new(chain: FallbackChain) -> Self {
        Self { chain }
    }

    /// True when at least one handle is available.
    pub fn is_enabled(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Expands `query` into itself plus up to five alternatives.
    pub async fn expand(&self, query: &str, deadline: Option<Instant>) -> Vec<String> {
        if self.chain.is_empty() {
            return vec![query.to_string()];
        }

        let request = ChatRequest::prompt(query).with_system(EXPANDER_SYSTEM_PROMPT);
        match self.chain.generate(&request, deadline).await {
            Ok(raw) => assemble_expansions(query, &raw),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(chain = %self.chain.name, error = %_err, "expansion degraded to original query");

                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "linebot_llm_degraded_total",
                    "chain" => self.chain.name.clone()
                )
                .increment(1);

                self.chain.listeners.emit(&ChainEvent::Degraded {
                    chain: self.chain.name.clone(),
                    timestamp: Instant::now(),
                });
                vec![query.to_string()]
            }
        }
    }
}

fn assemble_expansions(original: &str, raw: &str) -> Vec<String> {
    let mut out = vec![original.to_string()];
    for line in raw.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '•']).trim();
        if line.is_empty() || line == original {
            continue;
        }
        if out.iter().any(|existing| existing == line) {
            continue;
        }
        out.push(line.to_string());
        if out.len() > 5 {
            break;
        }
    }
    out
}
