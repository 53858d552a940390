//! File-backed collaborators for offline runs and fixtures

use super::{CollectionOutcome, ContentCollector, TaxonomySource};
use crate::error::Result;
use crate::model::{ContentItem, SourceDescriptor, TaxonomySnapshot};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Reads a [`TaxonomySnapshot`] from a JSON file
#[derive(Debug, Clone)]
pub struct JsonTaxonomySource {
    path: PathBuf,
}

impl JsonTaxonomySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TaxonomySource for JsonTaxonomySource {
    async fn fetch(&self) -> Result<TaxonomySnapshot> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading taxonomy file {}", self.path.display()))?;
        let snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parsing taxonomy file {}", self.path.display()))?;
        Ok(snapshot)
    }
}

#[derive(Debug, Deserialize)]
struct DumpedItem {
    url: String,
    #[serde(alias = "date")]
    published_date: NaiveDate,
    #[serde(alias = "raw_text", alias = "content")]
    text: String,
}

/// Replays per-source JSON dumps written by an external crawler
///
/// Each source maps to `<root>/<source name>.json`, an array of
/// `{url, published_date, text}` objects.
#[derive(Debug, Clone)]
pub struct JsonFileCollector {
    root: PathBuf,
    reference_date: Option<NaiveDate>,
}

impl JsonFileCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reference_date: None,
        }
    }

    /// Measure the day window from a fixed date instead of today
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    fn dump_path(&self, source: &SourceDescriptor) -> PathBuf {
        let file_stem: String = source
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{file_stem}.json"))
    }
}

#[async_trait]
impl ContentCollector for JsonFileCollector {
    async fn collect(&self, source: &SourceDescriptor, day_window: u32) -> Result<CollectionOutcome> {
        let path = self.dump_path(source);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading dump {}", path.display()))?;
        let dumped: Vec<DumpedItem> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing dump {}", path.display()))?;

        let today = self.reference_date.unwrap_or_else(|| Utc::now().date_naive());
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(day_window)))
            .unwrap_or(NaiveDate::MIN);

        let total_seen = dumped.len();
        let items: Vec<ContentItem> = dumped
            .into_iter()
            .filter(|d| d.published_date >= cutoff && d.published_date <= today)
            .filter(|d| !d.text.trim().is_empty())
            .map(|d| ContentItem::new(d.url, d.published_date, d.text, &source.name, source.category))
            .collect();

        debug!(
            "Source '{}': {} of {} dumped items inside the {}-day window",
            source.name,
            items.len(),
            total_seen,
            day_window
        );

        Ok(CollectionOutcome { items, total_seen })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentCategory, sample_taxonomy};
    use std::io::Write;

    #[tokio::test]
    async fn test_collector_filters_by_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("vn_macro.json")).unwrap();
        write!(
            file,
            r#"[
                {{"url": "https://t.me/vnmacro/10", "published_date": "2025-03-10", "text": "CPI tăng 0.3%"}},
                {{"url": "https://t.me/vnmacro/11", "date": "2025-03-01", "text": "old news"}},
                {{"url": "https://t.me/vnmacro/12", "published_date": "2025-03-09", "content": "  "}}
            ]"#
        )
        .unwrap();

        let collector = JsonFileCollector::new(dir.path())
            .with_reference_date(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        let source = SourceDescriptor::new("vn macro", "https://t.me/vnmacro", ContentCategory::Macro);

        let outcome = collector.collect(&source, 3).await.unwrap();
        assert_eq!(outcome.total_seen, 3);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].category, ContentCategory::Macro);
        assert_eq!(outcome.items[0].source_name, "vn macro");
    }

    #[tokio::test]
    async fn test_missing_dump_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let collector = JsonFileCollector::new(dir.path());
        let source = SourceDescriptor::new("absent", "u", ContentCategory::Company);
        let err = collector.collect(&source, 3).await.unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }

    #[tokio::test]
    async fn test_taxonomy_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icb.json");
        std::fs::write(&path, serde_json::to_string(&sample_taxonomy().to_snapshot()).unwrap()).unwrap();

        let snapshot = JsonTaxonomySource::new(&path).fetch().await.unwrap();
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.symbols.len(), 3);
    }
}
