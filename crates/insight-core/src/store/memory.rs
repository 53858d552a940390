//! In-memory store, used for tests and ephemeral runs

use super::InsightStore;
use crate::api::{MarketDataProvider, PriceBar};
use crate::error::Result;
use crate::model::{
    ConsolidatedStockInsight, ContentItem, SymbolClassification, TaxonomySnapshot, normalize_symbol,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    content: BTreeMap<String, ContentItem>,
    taxonomy: Option<TaxonomySnapshot>,
    insights: Vec<(Uuid, ConsolidatedStockInsight)>,
    bars: HashMap<String, BTreeMap<NaiveDate, PriceBar>>,
    companies: BTreeMap<String, SymbolClassification>,
}

/// [`InsightStore`] over `tokio::sync::RwLock`-guarded maps
///
/// Clones share state. It also serves stored bars as a
/// [`MarketDataProvider`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn content_count(&self) -> usize {
        self.state.read().await.content.len()
    }

    pub async fn insights_for(&self, run_id: Uuid) -> Vec<ConsolidatedStockInsight> {
        self.state
            .read()
            .await
            .insights
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, insight)| insight.clone())
            .collect()
    }

    pub async fn company(&self, symbol: &str) -> Option<SymbolClassification> {
        self.state.read().await.companies.get(&normalize_symbol(symbol)).cloned()
    }

    pub async fn bar_count(&self, symbol: &str) -> usize {
        self.state
            .read()
            .await
            .bars
            .get(&normalize_symbol(symbol))
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl InsightStore for InMemoryStore {
    async fn content_exists(&self, url: &str) -> Result<bool> {
        Ok(self.state.read().await.content.contains_key(url))
    }

    async fn insert_content_items(&self, items: &[ContentItem]) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for item in items {
            if !state.content.contains_key(&item.url) {
                state.content.insert(item.url.clone(), item.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn load_taxonomy_snapshot(&self) -> Result<Option<TaxonomySnapshot>> {
        Ok(self.state.read().await.taxonomy.clone())
    }

    async fn save_taxonomy_snapshot(&self, snapshot: &TaxonomySnapshot) -> Result<()> {
        self.state.write().await.taxonomy = Some(snapshot.clone());
        Ok(())
    }

    async fn insert_insights(&self, run_id: Uuid, insights: &[ConsolidatedStockInsight]) -> Result<usize> {
        let mut state = self.state.write().await;
        state
            .insights
            .extend(insights.iter().map(|insight| (run_id, insight.clone())));
        Ok(insights.len())
    }

    async fn latest_price_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        Ok(self
            .state
            .read()
            .await
            .bars
            .get(&normalize_symbol(symbol))
            .and_then(|bars| bars.keys().next_back().copied()))
    }

    async fn insert_price_bars(&self, symbol: &str, bars: &[PriceBar]) -> Result<usize> {
        let mut state = self.state.write().await;
        let stored = state.bars.entry(normalize_symbol(symbol)).or_default();
        let mut inserted = 0;
        for bar in bars {
            if !stored.contains_key(&bar.date) {
                stored.insert(bar.date, bar.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_companies(&self, companies: &[SymbolClassification]) -> Result<usize> {
        let mut state = self.state.write().await;
        for company in companies {
            state
                .companies
                .insert(normalize_symbol(&company.symbol), company.clone());
        }
        Ok(companies.len())
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryStore {
    async fn history(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PriceBar>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .state
            .read()
            .await
            .bars
            .get(&normalize_symbol(symbol))
            .map(|bars| bars.range(start..=end).map(|(_, bar)| bar.clone()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) fn bar(day: u32, close: f64, volume: u64) -> PriceBar {
    PriceBar {
        date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume,
    }
}
