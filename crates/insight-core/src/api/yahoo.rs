//! Yahoo Finance daily history

use super::{MarketDataProvider, PriceBar};
use crate::error::{InsightError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate};
use time::OffsetDateTime;
use yahoo_finance_api as yahoo;

/// [`MarketDataProvider`] backed by the Yahoo Finance chart API
///
/// Vietnamese listings trade under an exchange suffix on Yahoo (`HPG.VN`),
/// so a suffix can be appended to every requested symbol.
#[derive(Debug, Clone, Default)]
pub struct YahooMarketData {
    suffix: Option<String>,
}

impl YahooMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `suffix` (e.g. ".VN") to symbols that do not already carry one
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    fn ticker(&self, symbol: &str) -> String {
        match &self.suffix {
            Some(suffix) if !symbol.contains('.') => format!("{symbol}{suffix}"),
            _ => symbol.to_string(),
        }
    }
}

fn to_offset(date: NaiveDate) -> Result<OffsetDateTime> {
    let timestamp = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| InsightError::MarketData(format!("invalid date {date}")))?;
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|e| InsightError::MarketData(format!("invalid timestamp for {date}: {e}")))
}

#[async_trait]
impl MarketDataProvider for YahooMarketData {
    async fn history(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>> {
        let ticker = self.ticker(symbol);
        let provider = yahoo::YahooConnector::new().map_err(|e| InsightError::MarketData(e.to_string()))?;

        // the chart API treats the end bound as exclusive
        let end_exclusive = end.checked_add_days(Days::new(1)).unwrap_or(end);
        let response = provider
            .get_quote_history(&ticker, to_offset(start)?, to_offset(end_exclusive)?)
            .await
            .map_err(|e| InsightError::MarketData(format!("{ticker}: {e}")))?;

        let quotes = response
            .quotes()
            .map_err(|e| InsightError::MarketData(format!("{ticker}: {e}")))?;

        let mut bars: Vec<PriceBar> = quotes
            .iter()
            .filter_map(|q| {
                let date = DateTime::from_timestamp(q.timestamp as i64, 0)?.date_naive();
                Some(PriceBar {
                    date,
                    open: q.open,
                    high: q.high,
                    low: q.low,
                    close: q.close,
                    volume: q.volume,
                })
            })
            .filter(|bar| bar.date >= start && bar.date <= end)
            .collect();
        bars.sort_by_key(|bar| bar.date);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_is_applied_once() {
        let provider = YahooMarketData::new().with_suffix(".VN");
        assert_eq!(provider.ticker("HPG"), "HPG.VN");
        assert_eq!(provider.ticker("HPG.VN"), "HPG.VN");
        assert_eq!(YahooMarketData::new().ticker("AAPL"), "AAPL");
    }

    #[test]
    fn test_date_conversion_is_midnight_utc() {
        let odt = to_offset(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()).unwrap();
        assert_eq!(odt.unix_timestamp(), 1_735_776_000);
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_history_for_listed_symbol() {
        let provider = YahooMarketData::new().with_suffix(".VN");
        let end = chrono::Utc::now().date_naive();
        let start = end - chrono::Duration::days(14);
        let bars = provider.history("HPG", start, end).await.unwrap();
        assert!(!bars.is_empty());
    }
}
