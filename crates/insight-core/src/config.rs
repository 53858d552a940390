//! Configuration for pipeline runs

use crate::error::{InsightError, Result};
use insight_llm::{LLMProvider, LlmAnalysisService, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const ENV_PREFIX: &str = "INSIGHT_";

/// Tuning knobs for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How many days back collectors should look
    pub day_window: u32,

    /// Lookback window for price-trend statistics
    pub price_lookback_days: u32,

    /// Deadline for a single analysis-service call
    pub call_timeout: Duration,

    /// Deadline for one collector invocation
    pub collector_timeout: Duration,

    /// Deadline for one market-data request
    pub market_data_timeout: Duration,

    /// Attempts per external call, including the first
    pub retry_max_attempts: u32,

    /// Backoff before the first retry
    pub retry_backoff_base: Duration,

    /// Upper bound on any single backoff
    pub retry_backoff_max: Duration,

    /// Analysis-service calls allowed to start per minute (0 disables pacing)
    pub requests_per_minute: u32,

    /// Company items analyzed concurrently
    pub company_concurrency: usize,

    /// Characters of each item kept in the market-context prompt
    pub context_text_limit: usize,

    /// Characters of each item kept in the company-analysis prompt
    pub company_text_limit: usize,

    /// Taxonomy nodes listed per level in prompts
    pub taxonomy_max_per_level: usize,

    /// Symbols listed in the company-analysis mapping excerpt
    pub symbol_mapping_max: usize,

    /// Market contexts kept in the LRU cache
    pub context_cache_capacity: usize,

    pub context_temperature: f32,
    pub company_temperature: f32,
    pub consolidation_temperature: f32,

    /// Language narrative fields should be written in
    pub response_language: String,

    /// Refresh stored prices and company metadata after consolidation
    pub refresh_after_run: bool,

    /// Stop collecting after the first successful source
    pub debug_single_source: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            day_window: 3,
            price_lookback_days: 7,
            call_timeout: Duration::from_secs(120),
            collector_timeout: Duration::from_secs(600),
            market_data_timeout: Duration::from_secs(30),
            retry_max_attempts: 2,
            retry_backoff_base: Duration::from_secs(2),
            retry_backoff_max: Duration::from_secs(30),
            requests_per_minute: 15,
            company_concurrency: 1,
            context_text_limit: 1500,
            company_text_limit: 4000,
            taxonomy_max_per_level: 15,
            symbol_mapping_max: 100,
            context_cache_capacity: 8,
            context_temperature: 0.3,
            company_temperature: 0.3,
            consolidation_temperature: 0.2,
            response_language: "Vietnamese".to_string(),
            refresh_after_run: true,
            debug_single_source: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Defaults overridden by `INSIGHT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for `INSIGHT_*` keys
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut builder = Self::builder();

        if let Some(v) = get("DAY_WINDOW") {
            builder = builder.day_window(parse_var("DAY_WINDOW", &v)?);
        }
        if let Some(v) = get("PRICE_LOOKBACK_DAYS") {
            builder = builder.price_lookback_days(parse_var("PRICE_LOOKBACK_DAYS", &v)?);
        }
        if let Some(v) = get("CALL_TIMEOUT_SECS") {
            builder = builder.call_timeout(Duration::from_secs(parse_var("CALL_TIMEOUT_SECS", &v)?));
        }
        if let Some(v) = get("RETRY_MAX_ATTEMPTS") {
            builder = builder.retry_max_attempts(parse_var("RETRY_MAX_ATTEMPTS", &v)?);
        }
        if let Some(v) = get("REQUESTS_PER_MINUTE") {
            builder = builder.requests_per_minute(parse_var("REQUESTS_PER_MINUTE", &v)?);
        }
        if let Some(v) = get("COMPANY_CONCURRENCY") {
            builder = builder.company_concurrency(parse_var("COMPANY_CONCURRENCY", &v)?);
        }
        if let Some(v) = get("RESPONSE_LANGUAGE") {
            builder = builder.response_language(v);
        }
        if let Some(v) = get("REFRESH_AFTER_RUN") {
            builder = builder.refresh_after_run(parse_bool("REFRESH_AFTER_RUN", &v)?);
        }
        if let Some(v) = get("DEBUG_SINGLE_SOURCE") {
            builder = builder.debug_single_source(parse_bool("DEBUG_SINGLE_SOURCE", &v)?);
        }

        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.retry_max_attempts == 0 {
            return Err(InsightError::Config(
                "retry_max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.company_concurrency == 0 {
            return Err(InsightError::Config(
                "company_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.price_lookback_days == 0 {
            return Err(InsightError::Config(
                "price_lookback_days must be greater than 0".to_string(),
            ));
        }
        for (name, t) in [
            ("context_temperature", self.context_temperature),
            ("company_temperature", self.company_temperature),
            ("consolidation_temperature", self.consolidation_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(InsightError::Config(format!(
                    "{name} must be within 0.0..=2.0, got {t}"
                )));
            }
        }
        Ok(())
    }

    /// Get retry backoff duration for attempt number
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        self.retry_policy().backoff(attempt)
    }

    /// Retry policy applied to every external call
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            self.retry_backoff_base,
            self.retry_backoff_max,
            2.0,
        )
    }

    /// Wrap a provider with this configuration's timeout, retry and pacing
    pub fn analysis_service(
        &self,
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
    ) -> LlmAnalysisService {
        LlmAnalysisService::new(provider, model)
            .with_timeout(self.call_timeout)
            .with_retry_policy(self.retry_policy())
            .with_requests_per_minute(self.requests_per_minute)
            .with_json_mode(true)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        InsightError::Config(format!("{ENV_PREFIX}{name}='{value}' is invalid: {e}"))
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(InsightError::Config(format!(
            "{ENV_PREFIX}{name}='{value}' is not a boolean"
        ))),
    }
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    day_window: Option<u32>,
    price_lookback_days: Option<u32>,
    call_timeout: Option<Duration>,
    collector_timeout: Option<Duration>,
    market_data_timeout: Option<Duration>,
    retry_max_attempts: Option<u32>,
    retry_backoff_base: Option<Duration>,
    retry_backoff_max: Option<Duration>,
    requests_per_minute: Option<u32>,
    company_concurrency: Option<usize>,
    context_cache_capacity: Option<usize>,
    response_language: Option<String>,
    refresh_after_run: Option<bool>,
    debug_single_source: Option<bool>,
}

impl PipelineConfigBuilder {
    pub fn day_window(mut self, days: u32) -> Self {
        self.day_window = Some(days);
        self
    }

    pub fn price_lookback_days(mut self, days: u32) -> Self {
        self.price_lookback_days = Some(days);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn collector_timeout(mut self, timeout: Duration) -> Self {
        self.collector_timeout = Some(timeout);
        self
    }

    pub fn market_data_timeout(mut self, timeout: Duration) -> Self {
        self.market_data_timeout = Some(timeout);
        self
    }

    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    pub fn retry_backoff_base(mut self, duration: Duration) -> Self {
        self.retry_backoff_base = Some(duration);
        self
    }

    pub fn retry_backoff_max(mut self, duration: Duration) -> Self {
        self.retry_backoff_max = Some(duration);
        self
    }

    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = Some(rpm);
        self
    }

    pub fn company_concurrency(mut self, concurrency: usize) -> Self {
        self.company_concurrency = Some(concurrency);
        self
    }

    pub fn context_cache_capacity(mut self, capacity: usize) -> Self {
        self.context_cache_capacity = Some(capacity);
        self
    }

    pub fn response_language(mut self, language: impl Into<String>) -> Self {
        self.response_language = Some(language.into());
        self
    }

    pub fn refresh_after_run(mut self, enabled: bool) -> Self {
        self.refresh_after_run = Some(enabled);
        self
    }

    pub fn debug_single_source(mut self, enabled: bool) -> Self {
        self.debug_single_source = Some(enabled);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();

        let config = PipelineConfig {
            day_window: self.day_window.unwrap_or(defaults.day_window),
            price_lookback_days: self.price_lookback_days.unwrap_or(defaults.price_lookback_days),
            call_timeout: self.call_timeout.unwrap_or(defaults.call_timeout),
            collector_timeout: self.collector_timeout.unwrap_or(defaults.collector_timeout),
            market_data_timeout: self.market_data_timeout.unwrap_or(defaults.market_data_timeout),
            retry_max_attempts: self.retry_max_attempts.unwrap_or(defaults.retry_max_attempts),
            retry_backoff_base: self.retry_backoff_base.unwrap_or(defaults.retry_backoff_base),
            retry_backoff_max: self.retry_backoff_max.unwrap_or(defaults.retry_backoff_max),
            requests_per_minute: self.requests_per_minute.unwrap_or(defaults.requests_per_minute),
            company_concurrency: self.company_concurrency.unwrap_or(defaults.company_concurrency),
            context_cache_capacity: self
                .context_cache_capacity
                .unwrap_or(defaults.context_cache_capacity),
            response_language: self.response_language.unwrap_or(defaults.response_language),
            refresh_after_run: self.refresh_after_run.unwrap_or(defaults.refresh_after_run),
            debug_single_source: self.debug_single_source.unwrap_or(defaults.debug_single_source),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.day_window, 3);
        assert_eq!(config.price_lookback_days, 7);
        assert_eq!(config.retry_max_attempts, 2);
        assert_eq!(config.company_concurrency, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::builder()
            .day_window(1)
            .company_concurrency(4)
            .response_language("English")
            .refresh_after_run(false)
            .build()
            .unwrap();

        assert_eq!(config.day_window, 1);
        assert_eq!(config.company_concurrency, 4);
        assert_eq!(config.response_language, "English");
        assert!(!config.refresh_after_run);
    }

    #[test]
    fn test_validation() {
        assert!(PipelineConfig::builder().retry_max_attempts(0).build().is_err());
        assert!(PipelineConfig::builder().company_concurrency(0).build().is_err());
        assert!(PipelineConfig::builder().price_lookback_days(0).build().is_err());
    }

    #[test]
    fn test_retry_backoff() {
        let config = PipelineConfig::default();
        assert_eq!(config.retry_backoff(0), Duration::ZERO);
        assert_eq!(config.retry_backoff(1), Duration::from_secs(2));
        assert_eq!(config.retry_backoff(2), Duration::from_secs(4));
        assert_eq!(config.retry_policy().max_attempts, 2);
    }

    #[test]
    fn test_from_env_with() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("INSIGHT_DAY_WINDOW", "5"),
            ("INSIGHT_COMPANY_CONCURRENCY", "2"),
            ("INSIGHT_DEBUG_SINGLE_SOURCE", "yes"),
            ("INSIGHT_CALL_TIMEOUT_SECS", "45"),
        ]);
        let config =
            PipelineConfig::from_env_with(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();

        assert_eq!(config.day_window, 5);
        assert_eq!(config.company_concurrency, 2);
        assert!(config.debug_single_source);
        assert_eq!(config.call_timeout, Duration::from_secs(45));
        assert_eq!(config.price_lookback_days, 7);
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        let err = PipelineConfig::from_env_with(|k| {
            (k == "INSIGHT_DAY_WINDOW").then(|| "three".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("INSIGHT_DAY_WINDOW"));

        assert!(
            PipelineConfig::from_env_with(|k| {
                (k == "INSIGHT_REFRESH_AFTER_RUN").then(|| "maybe".to_string())
            })
            .is_err()
        );
    }
}
