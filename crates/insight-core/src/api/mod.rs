//! Contracts for the external collaborators the pipeline consumes
//!
//! The pipeline only depends on these traits. File-backed and Yahoo Finance
//! implementations live in the submodules; the persistent store is in
//! [`crate::store`].

pub mod files;
pub mod yahoo;

use crate::error::Result;
use crate::model::{ContentItem, SourceDescriptor, TaxonomySnapshot};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use files::{JsonFileCollector, JsonTaxonomySource};
pub use yahoo::YahooMarketData;

/// Items a collector returned plus how many it looked at
#[derive(Debug, Clone, Default)]
pub struct CollectionOutcome {
    pub items: Vec<ContentItem>,
    pub total_seen: usize,
}

/// Fetches raw content items from one source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentCollector: Send + Sync {
    /// Collect items published within the last `day_window` days
    async fn collect(&self, source: &SourceDescriptor, day_window: u32) -> Result<CollectionOutcome>;
}

/// One daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Supplies historical daily bars
///
/// An empty vector means no data for the window and is not an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Bars for `symbol` with `start <= date <= end`, oldest first
    async fn history(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>>;
}

/// Supplies the classification taxonomy and symbol mapping
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaxonomySource: Send + Sync {
    async fn fetch(&self) -> Result<TaxonomySnapshot>;
}
