//! Taxonomy loading and prompt excerpts

use crate::api::TaxonomySource;
use crate::error::{InsightError, Result};
use crate::model::{ClassificationNode, ClassificationTaxonomy, SymbolClassification, TaxonomySnapshot};
use crate::store::InsightStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

const COMPANY_NAME_MAX_CHARS: usize = 50;

/// Loads the classification taxonomy once and serves it for the run
///
/// A successful provider load is written through to the store. When the
/// provider fails or returns nothing, the last stored snapshot is used.
pub struct TaxonomyManager {
    source: Arc<dyn TaxonomySource>,
    store: Option<Arc<dyn InsightStore>>,
    loaded: RwLock<Option<Arc<ClassificationTaxonomy>>>,
}

impl TaxonomyManager {
    pub fn new(source: Arc<dyn TaxonomySource>) -> Self {
        Self {
            source,
            store: None,
            loaded: RwLock::new(None),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn InsightStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Taxonomy for this run, loading it on first use
    ///
    /// Fails with [`InsightError::TaxonomyUnavailable`] when neither the
    /// provider nor the store has a non-empty taxonomy.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Arc<ClassificationTaxonomy>> {
        if let Some(taxonomy) = self.loaded.read().await.as_ref() {
            return Ok(Arc::clone(taxonomy));
        }

        let mut loaded = self.loaded.write().await;
        if let Some(taxonomy) = loaded.as_ref() {
            return Ok(Arc::clone(taxonomy));
        }

        let snapshot = self.fetch_snapshot().await?;
        let taxonomy = Arc::new(ClassificationTaxonomy::from_snapshot(snapshot));
        let [l1, l2, l3, l4] = taxonomy.level_counts();
        info!(
            "Taxonomy loaded: {} nodes (L1={l1}, L2={l2}, L3={l3}, L4={l4}), {} mapped symbols",
            taxonomy.nodes().len(),
            taxonomy.symbol_count()
        );
        *loaded = Some(Arc::clone(&taxonomy));
        Ok(taxonomy)
    }

    /// Drop the loaded taxonomy so the next [`load`](Self::load) refetches
    pub async fn invalidate(&self) {
        *self.loaded.write().await = None;
    }

    async fn fetch_snapshot(&self) -> Result<TaxonomySnapshot> {
        let reason = match self.source.fetch().await {
            Ok(snapshot) if !snapshot.is_empty() => {
                self.write_through(&snapshot).await;
                return Ok(snapshot);
            }
            Ok(_) => "provider returned an empty taxonomy".to_string(),
            Err(e) => format!("provider failed: {e}"),
        };
        warn!("Taxonomy {reason}");

        if let Some(store) = &self.store {
            match store.load_taxonomy_snapshot().await {
                Ok(Some(snapshot)) if !snapshot.is_empty() => {
                    warn!("Using stored taxonomy snapshot ({} nodes)", snapshot.nodes.len());
                    return Ok(snapshot);
                }
                Ok(_) => {}
                Err(e) => warn!("Stored taxonomy unreadable: {e}"),
            }
        }

        Err(InsightError::TaxonomyUnavailable(reason))
    }

    async fn write_through(&self, snapshot: &TaxonomySnapshot) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_taxonomy_snapshot(snapshot).await {
                warn!("Failed to persist taxonomy snapshot: {e}");
            }
        }
    }
}

/// Level-grouped excerpt of the taxonomy for a prompt
///
/// Lists at most `max_per_level` nodes per level and states how many were
/// left out.
pub fn format_for_prompt(nodes: &[ClassificationNode], max_per_level: usize) -> String {
    let mut by_level: BTreeMap<u8, Vec<&ClassificationNode>> = BTreeMap::new();
    for node in nodes {
        by_level.entry(node.level).or_default().push(node);
    }

    let mut text = String::from("Available Industry Classifications:\n");
    for (level, level_nodes) in by_level {
        let _ = writeln!(text, "\nLevel {level} Industries:");
        for node in level_nodes.iter().take(max_per_level) {
            let _ = writeln!(text, "- {}: {} ({})", node.code, node.local_name, node.english_name);
        }
        if level_nodes.len() > max_per_level {
            let _ = writeln!(
                text,
                "... and {} more Level {level} industries",
                level_nodes.len() - max_per_level
            );
        }
    }
    text
}

/// Symbol-to-classification reference for a prompt
///
/// With a `filter`, only those symbols are listed; otherwise the first
/// `max_count` entries are. Entries without classification codes are never
/// listed.
pub fn format_symbol_mapping<'a>(
    symbols: impl IntoIterator<Item = &'a SymbolClassification>,
    filter: Option<&BTreeSet<String>>,
    max_count: usize,
) -> String {
    let mapped: Vec<&SymbolClassification> = symbols
        .into_iter()
        .filter(|s| !s.classification_codes.is_empty())
        .collect();
    let selected: Vec<&SymbolClassification> = match filter {
        Some(wanted) if !wanted.is_empty() => mapped
            .iter()
            .copied()
            .filter(|s| wanted.contains(&s.symbol))
            .take(max_count)
            .collect(),
        _ => mapped.iter().copied().take(max_count).collect(),
    };

    let mut text = String::from("Stock to Classification Mapping:\n");
    text.push_str("(Format: SYMBOL: Company Name, codes and names broad to narrow)\n\n");
    for entry in &selected {
        let _ = writeln!(
            text,
            "- {}: {}",
            entry.symbol,
            crate::model::content::truncate_chars(&entry.company_name, COMPANY_NAME_MAX_CHARS)
        );
        let _ = writeln!(text, "  ICB: {}", entry.classification_codes.join(" -> "));
        let _ = writeln!(text, "  Industries: {}\n", entry.classification_names.join(" -> "));
    }
    if mapped.len() > selected.len() {
        let _ = writeln!(
            text,
            "... and {} more stocks available in mapping",
            mapped.len() - selected.len()
        );
    }
    text
}

/// Mapped symbols that appear as standalone tokens in `text`
pub fn mentioned_symbols(taxonomy: &ClassificationTaxonomy, text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| (2..=5).contains(&token.len()))
        .filter(|token| token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()))
        .filter_map(|token| taxonomy.lookup_symbol(token).map(|s| s.symbol.clone()))
        .collect()
}
