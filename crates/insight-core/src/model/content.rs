//! Collected content items and the sources they come from

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared category of a content source
///
/// Unrecognized labels fall back to [`ContentCategory::Company`], which is
/// the category that gets per-item analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ContentCategory {
    #[default]
    Company,
    Sector,
    Macro,
}

impl ContentCategory {
    pub const ALL: [Self; 3] = [Self::Company, Self::Sector, Self::Macro];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Sector => "sector",
            Self::Macro => "macro",
        }
    }

    /// Whether items of this category feed the shared market context
    pub fn is_contextual(&self) -> bool {
        matches!(self, Self::Sector | Self::Macro)
    }
}

impl From<String> for ContentCategory {
    fn from(label: String) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "sector" | "industry" => Self::Sector,
            "macro" | "macroeconomic" | "economy" => Self::Macro,
            _ => Self::Company,
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One crawled unit of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub url: String,
    pub published_date: NaiveDate,
    pub raw_text: String,
    pub source_name: String,
    pub category: ContentCategory,
}

impl ContentItem {
    pub fn new(
        url: impl Into<String>,
        published_date: NaiveDate,
        raw_text: impl Into<String>,
        source_name: impl Into<String>,
        category: ContentCategory,
    ) -> Self {
        Self {
            url: url.into(),
            published_date,
            raw_text: raw_text.into(),
            source_name: source_name.into(),
            category,
        }
    }

    /// Text cut to `max_chars` characters, with "..." appended when cut
    pub fn truncated_text(&self, max_chars: usize) -> String {
        truncate_chars(&self.raw_text, max_chars)
    }
}

/// A configured content source handed to the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: ContentCategory,
    /// Collector-specific source kind (e.g. "telegram", "web")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, category: ContentCategory) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            category,
            kind: None,
        }
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
