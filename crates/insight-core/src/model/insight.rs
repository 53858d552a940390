//! Consolidated per-symbol insights and price-trend statistics

use super::analysis::{AnalysisStatus, ConfidenceLevel, Sentiment, StockMention, TimeHorizon};
use super::{Label, lenient_string, string_or_list};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Volume of the latest session relative to the window average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTrend {
    AboveAverage,
    BelowAverage,
    Normal,
}

/// Sign of the price change over the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

/// Price statistics over the lookback window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTrendSummary {
    pub symbol: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub current_price: f64,
    /// Percent change from the first to the last close
    pub percent_change: f64,
    /// Population standard deviation of daily percent changes
    pub volatility: f64,
    pub high: f64,
    pub low: f64,
    pub average_volume: f64,
    pub recent_volume: u64,
    pub volume_trend: VolumeTrend,
    pub direction: TrendDirection,
    pub trading_day_count: usize,
}

/// Price summary, or an explicit marker that none could be computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PriceTrend {
    Available(PriceTrendSummary),
    Unavailable { symbol: String, reason: String },
}

impl PriceTrend {
    pub fn unavailable(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub fn summary(&self) -> Option<&PriceTrendSummary> {
        match self {
            Self::Available(summary) => Some(summary),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

/// Synthesized recommendation, strongest buy to strongest sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "Label")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    #[default]
    Hold,
    Sell,
    StrongSell,
}

impl From<Label> for Recommendation {
    fn from(label: Label) -> Self {
        Self::from(label.0)
    }
}

impl From<Option<String>> for Recommendation {
    fn from(label: Option<String>) -> Self {
        let normalized = label
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_");
        match normalized.as_str() {
            "strong_buy" => Self::StrongBuy,
            "buy" | "accumulate" => Self::Buy,
            "sell" | "reduce" => Self::Sell,
            "strong_sell" => Self::StrongSell,
            _ => Self::Hold,
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StrongBuy => "strong_buy",
            Self::Buy => "buy",
            Self::Hold => "hold",
            Self::Sell => "sell",
            Self::StrongSell => "strong_sell",
        })
    }
}

/// Counted mention sentiments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl SentimentDistribution {
    pub fn from_mentions<'a>(mentions: impl IntoIterator<Item = &'a StockMention>) -> Self {
        let mut dist = Self::default();
        for mention in mentions {
            dist.record(mention.sentiment);
        }
        dist
    }

    pub fn record(&mut self, sentiment: Sentiment) {
        match sentiment {
            Sentiment::Positive => self.positive += 1,
            Sentiment::Negative => self.negative += 1,
            Sentiment::Neutral => self.neutral += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral
    }

    /// Most frequent sentiment; ties resolve to neutral
    pub fn majority(&self) -> Sentiment {
        if self.positive > self.negative && self.positive > self.neutral {
            Sentiment::Positive
        } else if self.negative > self.positive && self.negative > self.neutral {
            Sentiment::Negative
        } else {
            Sentiment::Neutral
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetScenarios {
    #[serde(alias = "bull_case", deserialize_with = "lenient_string")]
    pub bull: String,
    #[serde(alias = "base_case", deserialize_with = "lenient_string")]
    pub base: String,
    #[serde(alias = "bear_case", deserialize_with = "lenient_string")]
    pub bear: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalysts {
    #[serde(deserialize_with = "string_or_list")]
    pub positive: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub negative: Vec<String>,
}

/// One piece of evidence behind an insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMention {
    pub source_name: String,
    pub url: String,
    pub published_date: NaiveDate,
    pub sentiment: Sentiment,
    pub confidence: ConfidenceLevel,
    pub narrative: String,
    pub key_points: Vec<String>,
    pub risks: Vec<String>,
    pub item_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightMetadata {
    pub sources_count: usize,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
    pub consolidated_at: DateTime<Utc>,
}

/// Terminal per-symbol record of a pipeline run
///
/// `sentiment_distribution` and `mention_count` are counted from the
/// evidence. `overall_sentiment` is the service's synthesized judgement and
/// may disagree with `majority_sentiment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedStockInsight {
    pub symbol: String,
    pub company_name: String,
    pub classification_codes: Vec<String>,
    pub status: AnalysisStatus,
    pub overall_sentiment: Sentiment,
    pub majority_sentiment: Sentiment,
    pub confidence_score: f64,
    pub mention_count: usize,
    pub sentiment_distribution: SentimentDistribution,
    pub recommendation: Recommendation,
    pub narrative: String,
    pub investment_thesis: String,
    pub industry_context: String,
    pub macro_context: String,
    pub price_context: String,
    pub drivers: Vec<String>,
    pub risks: Vec<String>,
    pub opportunities: Vec<String>,
    pub time_horizon: TimeHorizon,
    pub target_scenarios: TargetScenarios,
    pub catalysts: Catalysts,
    pub research_quality: String,
    pub data_freshness: String,
    pub price_trend: PriceTrend,
    pub source_mentions: Vec<SourceMention>,
    pub metadata: InsightMetadata,
    pub error: Option<String>,
}

/// Clamp a service-reported confidence into `[0, 1]`; NaN becomes 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention(sentiment: &str) -> StockMention {
        StockMention {
            symbol: "ACB".to_string(),
            sentiment: Sentiment::parse(sentiment),
            ..StockMention::default()
        }
    }

    #[test]
    fn test_distribution_counts_case_insensitively() {
        let mentions = vec![mention("Positive"), mention("NEUTRAL"), mention("positive")];
        let dist = SentimentDistribution::from_mentions(&mentions);
        assert_eq!(dist.positive, 2);
        assert_eq!(dist.neutral, 1);
        assert_eq!(dist.negative, 0);
        assert_eq!(dist.total(), 3);
        assert_eq!(dist.majority(), Sentiment::Positive);
    }

    #[test]
    fn test_majority_tie_is_neutral() {
        let mentions = vec![mention("positive"), mention("negative")];
        assert_eq!(
            SentimentDistribution::from_mentions(&mentions).majority(),
            Sentiment::Neutral
        );
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.4), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(0.65), 0.65);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_recommendation_labels() {
        let r: Recommendation = serde_json::from_str("\"Strong Buy\"").unwrap();
        assert_eq!(r, Recommendation::StrongBuy);
        let r: Recommendation = serde_json::from_str("\"strong-sell\"").unwrap();
        assert_eq!(r, Recommendation::StrongSell);
        let r: Recommendation = serde_json::from_str("null").unwrap();
        assert_eq!(r, Recommendation::Hold);
        assert_eq!(Recommendation::Sell.to_string(), "sell");
    }

    #[test]
    fn test_price_trend_tagging() {
        let trend = PriceTrend::unavailable("ACB", "no bars");
        let json = serde_json::to_value(&trend).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert!(!trend.is_available());
        assert!(trend.summary().is_none());
    }
}
