//! The `prompt -> text` contract consumed by the analysis pipeline

use crate::{CompletionRequest, LLMError, LLMProvider, Message, Result, RetryPolicy};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_TOKENS: usize = 8192;

/// One analysis call: a prompt plus optional sampling overrides
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Generative text analysis, treated as an opaque function
///
/// Implementations are expected to apply their own timeout and retry policy;
/// callers only see the final text or the final error.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Run one prompt and return the raw response text
    async fn analyze(&self, request: AnalysisRequest) -> Result<String>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// [`AnalysisService`] backed by an [`LLMProvider`]
///
/// Each call waits on the rate limiter, runs under a deadline, and is retried
/// according to the configured [`RetryPolicy`].
pub struct LlmAnalysisService {
    provider: Arc<dyn LLMProvider>,
    model: String,
    system_prompt: Option<String>,
    max_tokens: usize,
    json_mode: bool,
    timeout: Duration,
    retry: RetryPolicy,
    limiter: Option<SharedRateLimiter>,
}

impl LlmAnalysisService {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            json_mode: false,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            limiter: None,
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Ask the backend for JSON-object output when it supports it
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Space calls evenly so no more than `rpm` start per minute.
    ///
    /// Zero disables pacing.
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.limiter = NonZeroU32::new(rpm)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completion_request(&self, request: &AnalysisRequest) -> CompletionRequest {
        let mut builder = CompletionRequest::builder(&self.model)
            .add_message(Message::user(&request.prompt))
            .max_tokens(request.max_tokens.unwrap_or(self.max_tokens))
            .json_mode(self.json_mode);
        if let Some(system) = &self.system_prompt {
            builder = builder.system(system);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        builder.build()
    }
}

#[async_trait]
impl AnalysisService for LlmAnalysisService {
    #[instrument(
        skip(self, request),
        fields(provider = %self.provider.name(), model = %self.model, prompt_chars = request.prompt.len())
    )]
    async fn analyze(&self, request: AnalysisRequest) -> Result<String> {
        let completion = self.completion_request(&request);

        self.retry
            .execute("analysis_service", || {
                let completion = completion.clone();
                async move {
                    if let Some(limiter) = &self.limiter {
                        limiter.until_ready().await;
                    }

                    let response =
                        tokio::time::timeout(self.timeout, self.provider.complete(completion))
                            .await
                            .map_err(|_| LLMError::Timeout(self.timeout))??;

                    debug!(
                        "Analysis response: {} output tokens, stop reason {:?}",
                        response.usage.output_tokens, response.stop_reason
                    );

                    response
                        .message
                        .text()
                        .map(str::to_owned)
                        .ok_or_else(|| LLMError::EmptyResponse(self.provider.name().to_string()))
                }
            })
            .await
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}
