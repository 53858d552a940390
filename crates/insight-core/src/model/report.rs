//! Final run report

use super::analysis::{AnalysisStatus, PerItemAnalysis};
use super::content::ContentCategory;
use super::context::MarketContext;
use super::insight::ConsolidatedStockInsight;
use crate::session::{PhaseRecord, SessionSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Pipeline stage a failure was contained in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Taxonomy,
    Collection,
    MarketContext,
    CompanyAnalysis,
    Consolidation,
    Persistence,
    Refresh,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Taxonomy => "taxonomy",
            Self::Collection => "collection",
            Self::MarketContext => "market_context",
            Self::CompanyAnalysis => "company_analysis",
            Self::Consolidation => "consolidation",
            Self::Persistence => "persistence",
            Self::Refresh => "refresh",
        })
    }
}

/// A contained failure surfaced to the report reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: Stage,
    /// Source name, item URL or symbol
    pub subject: String,
    pub reason: String,
}

impl FailureRecord {
    pub fn new(stage: Stage, subject: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            stage,
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }
}

/// Per-source collection outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source_name: String,
    pub category: ContentCategory,
    pub succeeded: bool,
    pub items_seen: usize,
    pub items_collected: usize,
    pub items_new: usize,
}

/// Item counts for one content category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub collected: usize,
    pub after_dedup: usize,
}

/// Post-analysis metadata refresh results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub symbols_attempted: usize,
    pub symbols_updated: usize,
    pub bars_inserted: usize,
    pub companies_upserted: usize,
    pub failures: usize,
}

/// Everything a run produced, including partial results and failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub status: AnalysisStatus,
    pub message: String,
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub sources: Vec<SourceOutcome>,
    pub items_seen: usize,
    pub categories: BTreeMap<ContentCategory, CategoryCounts>,
    pub items_analyzed: usize,
    pub items_failed: usize,
    pub unique_symbols: usize,
    pub market_context: Option<MarketContext>,
    pub analyses: Vec<PerItemAnalysis>,
    pub insights: Vec<ConsolidatedStockInsight>,
    pub refresh: Option<RefreshSummary>,
    pub failures: Vec<FailureRecord>,
    pub phases: Vec<PhaseRecord>,
    pub session: Option<SessionSummary>,
    pub duration_ms: u64,
}

impl PipelineReport {
    pub(crate) fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: AnalysisStatus::Success,
            message: String::new(),
            sources_attempted: 0,
            sources_succeeded: 0,
            sources: Vec::new(),
            items_seen: 0,
            categories: BTreeMap::new(),
            items_analyzed: 0,
            items_failed: 0,
            unique_symbols: 0,
            market_context: None,
            analyses: Vec::new(),
            insights: Vec::new(),
            refresh: None,
            failures: Vec::new(),
            phases: Vec::new(),
            session: None,
            duration_ms: 0,
        }
    }

    pub fn counts(&self, category: ContentCategory) -> CategoryCounts {
        self.categories.get(&category).copied().unwrap_or_default()
    }

    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_report_is_empty_success() {
        let report = PipelineReport::new(Uuid::new_v4());
        assert_eq!(report.status, AnalysisStatus::Success);
        assert_eq!(report.counts(ContentCategory::Macro), CategoryCounts::default());
        assert_eq!(report.failures_in(Stage::Collection).count(), 0);
    }

    #[test]
    fn test_failure_record_serialization() {
        let failure = FailureRecord::new(Stage::Consolidation, "ACB", "HTTP 503");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["stage"], "consolidation");
        assert_eq!(json["reason"], "HTTP 503");
    }
}
