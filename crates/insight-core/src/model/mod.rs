//! Data model shared by every pipeline stage

pub mod analysis;
pub mod content;
pub mod context;
pub mod insight;
pub mod report;
pub mod taxonomy;

pub use analysis::{
    AnalysisStatus, ConfidenceLevel, ItemRef, PerItemAnalysis, Sentiment, StockMention,
    TimeHorizon,
};
pub use content::{ContentCategory, ContentItem, SourceDescriptor};
pub use context::{CrossSectorTheme, MacroFactor, MarketContext, SectorSentiment};
pub use insight::{
    Catalysts, ConsolidatedStockInsight, InsightMetadata, PriceTrend, PriceTrendSummary,
    Recommendation, SentimentDistribution, SourceMention, TargetScenarios, TrendDirection,
    VolumeTrend, clamp_confidence,
};
pub use report::{
    CategoryCounts, FailureRecord, PipelineReport, RefreshSummary, SourceOutcome, Stage,
};
pub use taxonomy::{
    ClassificationNode, ClassificationTaxonomy, SymbolClassification, TaxonomySnapshot,
    normalize_symbol,
};

#[cfg(test)]
pub(crate) use taxonomy::sample_taxonomy;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Text field that also takes numbers and booleans; anything else is empty
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Accept a single scalar, a list of scalars, or null
///
/// Numbers become their decimal text. Blank and non-scalar elements are
/// skipped.
pub(crate) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = match Value::deserialize(deserializer)? {
        Value::Array(values) => values,
        other => vec![other],
    };
    Ok(values
        .into_iter()
        .filter_map(scalar_text)
        .filter(|s| !s.trim().is_empty())
        .collect())
}

/// Decode list entries one at a time, dropping the ones that do not fit
///
/// A lone object counts as a one-entry list.
pub(crate) fn lenient_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let values = match Value::deserialize(deserializer)? {
        Value::Array(values) => values,
        Value::Null => Vec::new(),
        single @ Value::Object(_) => vec![single],
        other => {
            warn!("Expected a list of entries, got {other}");
            Vec::new()
        }
    };
    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping malformed entry: {e}");
                None
            }
        })
        .collect())
}

/// Decode a nested record, falling back to its default when it does not fit
pub(crate) fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("Replacing malformed field with its default: {e}");
        T::default()
    }))
}

/// Free-form label as the vocabulary enums receive it
///
/// Numbers and booleans arrive as text; other shapes as `None`.
pub struct Label(pub Option<String>);

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(scalar_text(Value::deserialize(deserializer)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Fields {
        #[serde(default, deserialize_with = "string_or_list")]
        list: Vec<String>,
        #[serde(default, deserialize_with = "lenient_string")]
        code: String,
    }

    #[test]
    fn test_scalars_are_accepted_as_text() {
        let p: Fields = serde_json::from_str(r#"{"list": "Nợ xấu tăng", "code": 8355}"#).unwrap();
        assert_eq!(p.list, vec!["Nợ xấu tăng"]);
        assert_eq!(p.code, "8355");

        let p: Fields = serde_json::from_str(r#"{"list": ["a", 8300, null, "", {"x": 1}], "code": null}"#).unwrap();
        assert_eq!(p.list, vec!["a", "8300"]);
        assert!(p.code.is_empty());
    }
}
