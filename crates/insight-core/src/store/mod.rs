//! Persistent store for collected content, taxonomy snapshots, insights
//! and price history

pub mod memory;
pub mod sqlite;

use crate::api::PriceBar;
use crate::error::Result;
use crate::model::{ConsolidatedStockInsight, ContentItem, SymbolClassification, TaxonomySnapshot};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Storage operations the pipeline performs
///
/// Bulk inserts skip rows that already exist and return how many were new.
#[async_trait]
pub trait InsightStore: Send + Sync {
    async fn content_exists(&self, url: &str) -> Result<bool>;

    async fn insert_content_items(&self, items: &[ContentItem]) -> Result<usize>;

    /// Last saved taxonomy, if any
    async fn load_taxonomy_snapshot(&self) -> Result<Option<TaxonomySnapshot>>;

    /// Replace the saved taxonomy
    async fn save_taxonomy_snapshot(&self, snapshot: &TaxonomySnapshot) -> Result<()>;

    async fn insert_insights(&self, run_id: Uuid, insights: &[ConsolidatedStockInsight]) -> Result<usize>;

    /// Date of the newest stored bar for `symbol`
    async fn latest_price_date(&self, symbol: &str) -> Result<Option<NaiveDate>>;

    async fn insert_price_bars(&self, symbol: &str, bars: &[PriceBar]) -> Result<usize>;

    /// Insert or update company metadata, keyed by symbol
    async fn upsert_companies(&self, companies: &[SymbolClassification]) -> Result<usize>;
}
