//! Per-item analysis records and the shared vocabulary enums
//!
//! The enums deserialize leniently from free-form service output: matching is
//! case-insensitive and unknown labels map to the neutral variant, so one odd
//! label never invalidates a whole response.

use super::content::ContentItem;
use super::{Label, lenient_string, string_or_list};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an opinion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Label")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl From<Label> for Sentiment {
    fn from(label: Label) -> Self {
        Self::from(label.0)
    }
}

impl From<Option<String>> for Sentiment {
    fn from(label: Option<String>) -> Self {
        label.map_or_else(Self::default, |l| Self::parse(&l))
    }
}

impl Sentiment {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "positive" | "bullish" | "tích cực" => Self::Positive,
            "negative" | "bearish" | "tiêu cực" => Self::Negative,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative confidence attached to a mention or sector view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Label")]
pub enum ConfidenceLevel {
    High,
    #[default]
    Medium,
    Low,
}

impl From<Label> for ConfidenceLevel {
    fn from(label: Label) -> Self {
        Self::from(label.0)
    }
}

impl From<Option<String>> for ConfidenceLevel {
    fn from(label: Option<String>) -> Self {
        match label.unwrap_or_default().trim().to_lowercase().as_str() {
            "high" | "cao" => Self::High,
            "low" | "thấp" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Investment horizon for a thesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "Label")]
pub enum TimeHorizon {
    ShortTerm,
    #[default]
    MediumTerm,
    LongTerm,
}

impl From<Label> for TimeHorizon {
    fn from(label: Label) -> Self {
        Self::from(label.0)
    }
}

impl From<Option<String>> for TimeHorizon {
    fn from(label: Option<String>) -> Self {
        let normalized = label.unwrap_or_default().trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "short_term" | "short" => Self::ShortTerm,
            "long_term" | "long" => Self::LongTerm,
            _ => Self::MediumTerm,
        }
    }
}

impl TimeHorizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::MediumTerm => "medium_term",
            Self::LongTerm => "long_term",
        }
    }
}

/// Outcome tag carried by every degradable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Success,
    NoData,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoData => "no_data",
            Self::Error => "error",
        }
    }
}

/// One company's analysis extracted from one content item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockMention {
    #[serde(alias = "stock_symbol")]
    #[serde(deserialize_with = "lenient_string")]
    pub symbol: String,
    #[serde(deserialize_with = "lenient_string")]
    pub company_name: String,
    #[serde(alias = "icb_codes")]
    #[serde(deserialize_with = "string_or_list")]
    pub classification_codes: Vec<String>,
    #[serde(alias = "icb_names")]
    #[serde(deserialize_with = "string_or_list")]
    pub classification_names: Vec<String>,
    pub sentiment: Sentiment,
    pub confidence: ConfidenceLevel,
    #[serde(alias = "summary")]
    #[serde(deserialize_with = "lenient_string")]
    pub narrative: String,
    #[serde(deserialize_with = "lenient_string")]
    pub industry_context: String,
    #[serde(deserialize_with = "lenient_string")]
    pub macro_context: String,
    #[serde(alias = "key_factors")]
    #[serde(deserialize_with = "string_or_list")]
    pub drivers: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub risks: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub opportunities: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub price_catalyst: String,
    pub time_horizon: TimeHorizon,
}

/// Identity of the content item an analysis is anchored to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub url: String,
    pub published_date: NaiveDate,
    pub source_name: String,
}

impl From<&ContentItem> for ItemRef {
    fn from(item: &ContentItem) -> Self {
        Self {
            url: item.url.clone(),
            published_date: item.published_date,
            source_name: item.source_name.clone(),
        }
    }
}

/// Result of analyzing one company content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerItemAnalysis {
    pub item: ItemRef,
    pub status: AnalysisStatus,
    pub item_summary: String,
    pub market_implications: String,
    pub cross_references: Vec<String>,
    pub analyst_notes: String,
    pub mentions: Vec<StockMention>,
    /// Symbols the service reported that are not in the mapping
    pub dropped_symbols: Vec<String>,
    pub error: Option<String>,
}

impl PerItemAnalysis {
    /// Degraded record for an item whose analysis failed
    pub fn failed(item: &ContentItem, error: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            status: AnalysisStatus::Error,
            item_summary: String::new(),
            market_implications: String::new(),
            cross_references: Vec::new(),
            analyst_notes: String::new(),
            mentions: Vec::new(),
            dropped_symbols: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == AnalysisStatus::Error
    }
}
