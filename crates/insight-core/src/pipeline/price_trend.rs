//! Price-trend statistics over a short lookback window

use crate::api::{MarketDataProvider, PriceBar};
use crate::config::PipelineConfig;
use crate::error::{InsightError, Result};
use crate::model::{PriceTrend, PriceTrendSummary, TrendDirection, VolumeTrend};
use chrono::{Days, NaiveDate};
use insight_llm::RetryPolicy;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ABOVE_AVERAGE_RATIO: f64 = 1.2;
const BELOW_AVERAGE_RATIO: f64 = 0.8;

/// Summary statistics for `bars`; `None` when there are no bars
///
/// Bars may arrive in any order. Volatility is the population standard
/// deviation of close-to-close percent changes.
pub fn summarize_bars(symbol: &str, bars: &[PriceBar]) -> Option<PriceTrendSummary> {
    let mut sorted: Vec<&PriceBar> = bars.iter().collect();
    sorted.sort_by_key(|bar| bar.date);
    let first = *sorted.first()?;
    let last = *sorted.last()?;

    let percent_change = percent(first.close, last.close).unwrap_or(0.0);
    let daily_changes: Vec<f64> = sorted
        .windows(2)
        .filter_map(|pair| percent(pair[0].close, pair[1].close))
        .collect();

    let count = sorted.len() as f64;
    let average_volume = sorted.iter().map(|bar| bar.volume as f64).sum::<f64>() / count;
    let recent = last.volume as f64;
    let volume_trend = if recent > average_volume * ABOVE_AVERAGE_RATIO {
        VolumeTrend::AboveAverage
    } else if recent < average_volume * BELOW_AVERAGE_RATIO {
        VolumeTrend::BelowAverage
    } else {
        VolumeTrend::Normal
    };

    let direction = if percent_change > f64::EPSILON {
        TrendDirection::Up
    } else if percent_change < -f64::EPSILON {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    };

    Some(PriceTrendSummary {
        symbol: symbol.to_string(),
        period_start: first.date,
        period_end: last.date,
        current_price: last.close,
        percent_change,
        volatility: std_dev(&daily_changes),
        high: sorted.iter().map(|bar| bar.high).fold(f64::MIN, f64::max),
        low: sorted.iter().map(|bar| bar.low).fold(f64::MAX, f64::min),
        average_volume,
        recent_volume: last.volume,
        volume_trend,
        direction,
        trading_day_count: sorted.len(),
    })
}

fn percent(from: f64, to: f64) -> Option<f64> {
    (from > 0.0).then(|| (to - from) / from * 100.0)
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Price trend as text for a consolidation prompt
pub fn render_price_context(trend: &PriceTrend) -> String {
    let summary = match trend {
        PriceTrend::Available(summary) => summary,
        PriceTrend::Unavailable { reason, .. } => return format!("Price Data: unavailable ({reason})"),
    };
    let mut text = String::new();
    let _ = writeln!(text, "Period: {} to {}", summary.period_start, summary.period_end);
    let _ = writeln!(text, "Price Change: {:+.2}%", summary.percent_change);
    let _ = writeln!(text, "Volatility: {:.2}%", summary.volatility);
    let _ = writeln!(text, "Current Price: {:.2}", summary.current_price);
    let _ = writeln!(text, "Range: {:.2} - {:.2}", summary.low, summary.high);
    let _ = writeln!(text, "Volume Trend: {}", volume_label(summary.volume_trend));
    let _ = writeln!(text, "Trading Days: {}", summary.trading_day_count);
    text
}

fn volume_label(trend: VolumeTrend) -> &'static str {
    match trend {
        VolumeTrend::AboveAverage => "above_average",
        VolumeTrend::BelowAverage => "below_average",
        VolumeTrend::Normal => "normal",
    }
}

/// Provider call bounded by `timeout` per attempt and retried by `retry`
pub(crate) async fn fetch_history(
    provider: &dyn MarketDataProvider,
    symbol: &str,
    (start, end): (NaiveDate, NaiveDate),
    timeout: Duration,
    retry: &RetryPolicy,
) -> Result<Vec<PriceBar>> {
    retry
        .execute(&format!("price history {symbol}"), || async move {
            match tokio::time::timeout(timeout, provider.history(symbol, start, end)).await {
                Ok(result) => result,
                Err(_) => Err(InsightError::Timeout {
                    operation: format!("price history {symbol}"),
                    after: timeout,
                }),
            }
        })
        .await
}

/// Fetches bars and summarizes them, never failing
///
/// Provider errors, timeouts and empty windows all become
/// [`PriceTrend::Unavailable`].
pub struct PriceTrendAnalyzer {
    provider: Arc<dyn MarketDataProvider>,
    lookback_days: u32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl PriceTrendAnalyzer {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: &PipelineConfig) -> Self {
        Self {
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

    /// Trend for `symbol` over the lookback window ending at `today`
    pub async fn trend(&self, symbol: &str, today: NaiveDate) -> PriceTrend {
        let start = today
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(today);

        let fetched = fetch_history(
            self.provider.as_ref(),
            symbol,
            (start, today),
            self.timeout,
            &self.retry,
        )
        .await;

        match fetched {
            Ok(bars) => match summarize_bars(symbol, &bars) {
                Some(summary) => {
                    info!(
                        "{symbol}: {:+.2}% change, {:.2}% volatility over {} days",
                        summary.percent_change, summary.volatility, summary.trading_day_count
                    );
                    PriceTrend::Available(summary)
                }
                None => {
                    warn!("{symbol}: no price data between {start} and {today}");
                    PriceTrend::unavailable(symbol, "no price data in lookback window")
                }
            },
            Err(e) => {
                warn!("{symbol}: price data error: {e}");
                PriceTrend::unavailable(symbol, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockMarketDataProvider;
    use crate::store::memory::bar;

    #[test]
    fn test_summary_statistics() {
        // deliberately unordered
        let bars = vec![bar(5, 110.0, 300), bar(3, 100.0, 100), bar(4, 99.0, 100)];
        let summary = summarize_bars("HPG", &bars).unwrap();

        assert_eq!(summary.period_start, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(summary.period_end, NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
        assert!((summary.percent_change - 10.0).abs() < 1e-9);
        assert_eq!(summary.current_price, 110.0);
        assert_eq!(summary.trading_day_count, 3);
        assert_eq!(summary.direction, TrendDirection::Up);
        // 300 > 1.2 * (500 / 3)
        assert_eq!(summary.volume_trend, VolumeTrend::AboveAverage);
        assert_eq!(summary.recent_volume, 300);
        assert!((summary.high - 111.1).abs() < 1e-9);
        assert!((summary.low - 98.01).abs() < 1e-9);

        // daily changes -1% and +11.1111..%, population deviation is half the spread
        let expected = (11.0 / 99.0 * 100.0 + 1.0) / 2.0;
        assert!((summary.volatility - expected).abs() < 1e-9);
    }

    #[test]
    fn test_single_bar_and_empty() {
        let summary = summarize_bars("ACB", &[bar(3, 25.0, 100)]).unwrap();
        assert_eq!(summary.volatility, 0.0);
        assert_eq!(summary.direction, TrendDirection::Flat);
        assert_eq!(summary.volume_trend, VolumeTrend::Normal);
        assert!(summarize_bars("ACB", &[]).is_none());
    }

    #[test]
    fn test_below_average_volume() {
        let summary = summarize_bars("VCB", &[bar(3, 90.0, 1000), bar(4, 88.0, 100)]).unwrap();
        assert_eq!(summary.volume_trend, VolumeTrend::BelowAverage);
        assert_eq!(summary.direction, TrendDirection::Down);
    }

    #[tokio::test]
    async fn test_no_rows_is_unavailable() {
        let mut provider = MockMarketDataProvider::new();
        provider.expect_history().times(1).returning(|_, _, _| Ok(vec![]));
        let analyzer = PriceTrendAnalyzer::new(Arc::new(provider), &PipelineConfig::default());

        let trend = analyzer
            .trend("ACB", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .await;
        assert!(!trend.is_available());
        assert!(render_price_context(&trend).contains("unavailable"));
    }

    #[tokio::test]
    async fn test_window_bounds_and_provider_error() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_history()
            .withf(|symbol, start, end| {
                symbol == "HPG"
                    && *start == NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
                    && *end == NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
            })
            .returning(|_, _, _| Err(InsightError::MarketData("HTTP 404".into())));
        let analyzer = PriceTrendAnalyzer::new(Arc::new(provider), &PipelineConfig::default())
            .with_retry_policy(RetryPolicy::no_retry());

        let trend = analyzer
            .trend("HPG", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .await;
        match trend {
            PriceTrend::Unavailable { symbol, reason } => {
                assert_eq!(symbol, "HPG");
                assert!(reason.contains("HTTP 404"));
            }
            PriceTrend::Available(_) => panic!("expected unavailable"),
        }
    }

    #[tokio::test]
    async fn test_throttled_provider_is_retried() {
        let mut seq = mockall::Sequence::new();
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_history()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(InsightError::MarketData("HTTP 429 Too Many Requests".into())));
        provider
            .expect_history()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(vec![bar(6, 20.0, 100), bar(7, 20.4, 100)]));
        let analyzer = PriceTrendAnalyzer::new(Arc::new(provider), &PipelineConfig::default())
            .with_retry_policy(RetryPolicy::fast());

        let trend = analyzer
            .trend("HPG", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .await;
        assert!(trend.is_available());
        assert!(render_price_context(&trend).contains("Price Change: +2.00%"));
    }

    #[tokio::test]
    async fn test_available_trend_renders() {
        let mut provider = MockMarketDataProvider::new();
        provider
            .expect_history()
            .returning(|_, _, _| Ok(vec![bar(6, 20.0, 100), bar(7, 21.0, 100)]));
        let analyzer = PriceTrendAnalyzer::new(Arc::new(provider), &PipelineConfig::default());

        let trend = analyzer
            .trend("HPG", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap())
            .await;
        let text = render_price_context(&trend);
        assert!(text.contains("Price Change: +5.00%"));
        assert!(text.contains("Trading Days: 2"));
    }
}
