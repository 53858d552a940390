//! Shared market context derived from sector and macro content

use super::analysis::{AnalysisStatus, ConfidenceLevel, Sentiment};
use super::{lenient_entries, lenient_string, string_or_list};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sentiment view for one classification code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorSentiment {
    #[serde(alias = "icb_code", deserialize_with = "lenient_string")]
    pub classification_code: String,
    pub sentiment: Sentiment,
    pub confidence: ConfidenceLevel,
    #[serde(alias = "key_drivers", deserialize_with = "string_or_list")]
    pub drivers: Vec<String>,
    #[serde(alias = "risk_factors", deserialize_with = "string_or_list")]
    pub risks: Vec<String>,
    #[serde(alias = "related_stocks_mentioned", deserialize_with = "string_or_list")]
    pub related_symbols: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub outlook: String,
    #[serde(deserialize_with = "lenient_string")]
    pub timeline: String,
}

/// A macroeconomic factor and where it bites
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroFactor {
    #[serde(alias = "factor", deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub trend: String,
    #[serde(deserialize_with = "lenient_string")]
    pub market_impact: String,
    #[serde(alias = "affected_icb_codes", deserialize_with = "string_or_list")]
    pub affected_classification_codes: Vec<String>,
    #[serde(alias = "impact_description", deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub timeline: String,
    pub confidence: ConfidenceLevel,
}

/// A theme spanning several sectors
///
/// Accepts either a bare label or a full object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ThemeRepr")]
pub struct CrossSectorTheme {
    pub theme: String,
    pub description: String,
    pub affected_codes: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThemeRepr {
    Label(String),
    Full(ThemeFields),
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ThemeFields {
    #[serde(alias = "name", deserialize_with = "lenient_string")]
    theme: String,
    #[serde(deserialize_with = "lenient_string")]
    description: String,
    #[serde(alias = "affected_icb_codes", alias = "affected_classification_codes", deserialize_with = "string_or_list")]
    affected_codes: Vec<String>,
}

impl From<ThemeRepr> for CrossSectorTheme {
    fn from(repr: ThemeRepr) -> Self {
        match repr {
            ThemeRepr::Label(theme) => Self {
                theme,
                ..Self::default()
            },
            ThemeRepr::Full(fields) => Self {
                theme: fields.theme,
                description: fields.description,
                affected_codes: fields.affected_codes,
            },
        }
    }
}

/// Market-wide background used by company analysis and consolidation
///
/// Deserializing fills every absent field with its default, so a partial
/// service response still yields a usable context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketContext {
    #[serde(alias = "icb_analysis", deserialize_with = "lenient_entries")]
    pub sector_sentiments: Vec<SectorSentiment>,
    #[serde(deserialize_with = "lenient_entries")]
    pub macro_factors: Vec<MacroFactor>,
    #[serde(deserialize_with = "lenient_entries")]
    pub cross_sector_themes: Vec<CrossSectorTheme>,
    #[serde(alias = "market_sentiment")]
    pub overall_sentiment: Sentiment,
    #[serde(deserialize_with = "volatility_label")]
    pub volatility_outlook: String,
    #[serde(deserialize_with = "investor_label")]
    pub investor_sentiment: String,
    #[serde(deserialize_with = "lenient_string")]
    pub market_outlook: String,
    #[serde(deserialize_with = "string_or_list")]
    pub key_risks: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub opportunities: Vec<String>,
    // bookkeeping fields are set locally, never taken from service output
    #[serde(skip_deserializing)]
    pub analysis_date: Option<NaiveDate>,
    #[serde(skip_deserializing)]
    pub items_analyzed: usize,
    #[serde(skip_deserializing)]
    pub generated_at: DateTime<Utc>,
    #[serde(skip_deserializing)]
    pub status: AnalysisStatus,
}

pub const DEFAULT_VOLATILITY_OUTLOOK: &str = "moderate";
pub const DEFAULT_INVESTOR_SENTIMENT: &str = "cautious";

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            sector_sentiments: Vec::new(),
            macro_factors: Vec::new(),
            cross_sector_themes: Vec::new(),
            overall_sentiment: Sentiment::Neutral,
            volatility_outlook: DEFAULT_VOLATILITY_OUTLOOK.to_string(),
            investor_sentiment: DEFAULT_INVESTOR_SENTIMENT.to_string(),
            market_outlook: String::new(),
            key_risks: Vec::new(),
            opportunities: Vec::new(),
            analysis_date: None,
            items_analyzed: 0,
            generated_at: Utc::now(),
            status: AnalysisStatus::Success,
        }
    }
}

impl MarketContext {
    /// The documented empty context: neutral, every list empty
    pub fn empty(status: AnalysisStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// True when the context carries no sector, macro or theme content
    pub fn has_no_findings(&self) -> bool {
        self.sector_sentiments.is_empty()
            && self.macro_factors.is_empty()
            && self.cross_sector_themes.is_empty()
            && self.key_risks.is_empty()
            && self.opportunities.is_empty()
    }

    /// Sector view for a classification code, if present
    pub fn sector(&self, code: &str) -> Option<&SectorSentiment> {
        self.sector_sentiments
            .iter()
            .find(|s| s.classification_code == code)
    }

    /// Restore defaults for blank top-level labels
    pub(crate) fn fill_defaults(&mut self) {
        if self.volatility_outlook.trim().is_empty() {
            self.volatility_outlook = DEFAULT_VOLATILITY_OUTLOOK.to_string();
        }
        if self.investor_sentiment.trim().is_empty() {
            self.investor_sentiment = DEFAULT_INVESTOR_SENTIMENT.to_string();
        }
    }
}

fn volatility_label<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let label = lenient_string(deserializer)?;
    Ok(if label.trim().is_empty() {
        DEFAULT_VOLATILITY_OUTLOOK.to_string()
    } else {
        label
    })
}

fn investor_label<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let label = lenient_string(deserializer)?;
    Ok(if label.trim().is_empty() {
        DEFAULT_INVESTOR_SENTIMENT.to_string()
    } else {
        label
    })
}
