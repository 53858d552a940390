//! Post-run refresh of stored price history and company metadata

use super::price_trend::fetch_history;
use crate::api::MarketDataProvider;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::{ClassificationTaxonomy, RefreshSummary, SymbolClassification};
use crate::store::InsightStore;
use chrono::{Days, NaiveDate};
use insight_llm::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Brings stored bars up to date for the symbols of a run
///
/// Failures are counted in the summary and never propagate.
pub struct MetadataRefresher {
    store: Arc<dyn InsightStore>,
    provider: Arc<dyn MarketDataProvider>,
    lookback_days: u32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl MetadataRefresher {
    pub fn new(
        store: Arc<dyn InsightStore>,
        provider: Arc<dyn MarketDataProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            lookback_days: config.price_lookback_days,
            timeout: config.market_data_timeout,
            retry: config.retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip_all, fields(symbols = symbols.len()))]
    pub async fn refresh(
        &self,
        symbols: &[String],
        taxonomy: &ClassificationTaxonomy,
        today: NaiveDate,
    ) -> RefreshSummary {
        let mut summary = RefreshSummary {
            symbols_attempted: symbols.len(),
            ..RefreshSummary::default()
        };

        for symbol in symbols {
            match self.refresh_prices(symbol, today).await {
                Ok(inserted) => {
                    summary.symbols_updated += 1;
                    summary.bars_inserted += inserted;
                }
                Err(e) => {
                    warn!("Price refresh failed for {symbol}: {e}");
                    summary.failures += 1;
                }
            }
        }

        let companies: Vec<SymbolClassification> = symbols
            .iter()
            .filter_map(|s| taxonomy.lookup_symbol(s).cloned())
            .collect();
        if !companies.is_empty() {
            match self.store.upsert_companies(&companies).await {
                Ok(count) => summary.companies_upserted = count,
                Err(e) => {
                    warn!("Company metadata refresh failed: {e}");
                    summary.failures += 1;
                }
            }
        }

        info!(
            "Refresh: {}/{} symbols, {} bars, {} companies, {} failures",
            summary.symbols_updated,
            summary.symbols_attempted,
            summary.bars_inserted,
            summary.companies_upserted,
            summary.failures
        );
        summary
    }

    /// Fetch bars after the newest stored one and insert them
    async fn refresh_prices(&self, symbol: &str, today: NaiveDate) -> Result<usize> {
        let start = match self.store.latest_price_date(symbol).await? {
            Some(latest) => latest.succ_opt().unwrap_or(latest),
            None => today
                .checked_sub_days(Days::new(u64::from(self.lookback_days)))
                .unwrap_or(today),
        };
        if start > today {
            debug!("{symbol}: price history already current");
            return Ok(0);
        }

        let bars = fetch_history(
            self.provider.as_ref(),
            symbol,
            (start, today),
            self.timeout,
            &self.retry,
        )
        .await?;
        if bars.is_empty() {
            return Ok(0);
        }
        self.store.insert_price_bars(symbol, &bars).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockMarketDataProvider;
    use crate::error::InsightError;
    use crate::model::sample_taxonomy;
    use crate::store::memory::{InMemoryStore, bar};
    use mockall::predicate::{always, eq};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_starts_after_latest_stored_bar() {
        let store = InMemoryStore::new();
        store.insert_price_bars("ACB", &[bar(6, 25.0, 100)]).await.unwrap();

        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_history()
            .with(eq("ACB"), eq(NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()), eq(today()))
            .times(1)
            .returning(|_, _, _| Ok(vec![bar(7, 25.5, 100), bar(10, 26.0, 100)]));
        provider
            .expect_history()
            .with(eq("HPG"), eq(NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()), always())
            .times(1)
            .returning(|_, _, _| Ok(vec![bar(4, 20.0, 100)]));

        let refresher = MetadataRefresher::new(
            Arc::new(store.clone()),
            Arc::new(provider),
            &PipelineConfig::default(),
        );
        let summary = refresher
            .refresh(&["ACB".to_string(), "HPG".to_string()], &sample_taxonomy(), today())
            .await;

        assert_eq!(summary.symbols_attempted, 2);
        assert_eq!(summary.symbols_updated, 2);
        assert_eq!(summary.bars_inserted, 3);
        assert_eq!(summary.companies_upserted, 2);
        assert_eq!(summary.failures, 0);
        assert_eq!(store.bar_count("ACB").await, 3);
        assert!(store.company("HPG").await.is_some());
    }

    #[tokio::test]
    async fn test_provider_failure_is_counted() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_history()
            .returning(|_, _, _| Err(InsightError::MarketData("HTTP 404".into())));

        let refresher = MetadataRefresher::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(provider),
            &PipelineConfig::default(),
        )
        .with_retry_policy(RetryPolicy::no_retry());
        let summary = refresher
            .refresh(&["VCB".to_string()], &sample_taxonomy(), today())
            .await;

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.symbols_updated, 0);
        assert_eq!(summary.companies_upserted, 1);
    }

    #[tokio::test]
    async fn test_current_history_skips_the_provider() {
        let store = InMemoryStore::new();
        store.insert_price_bars("VCB", &[bar(10, 90.0, 100)]).await.unwrap();
        let mut provider = MockMarketDataProvider::new();
        provider.expect_history().never();

        let refresher = MetadataRefresher::new(
            Arc::new(store),
            Arc::new(provider),
            &PipelineConfig::default(),
        );
        let summary = refresher
            .refresh(&["VCB".to_string()], &sample_taxonomy(), today())
            .await;
        assert_eq!(summary.bars_inserted, 0);
        assert_eq!(summary.symbols_updated, 1);
    }
}
