//! Sequences the pipeline phases and assembles the run report

use super::company::CompanyAnalyzer;
use super::consolidator::StockConsolidator;
use super::dedup::ContentDeduplicator;
use super::market_context::MarketContextGenerator;
use super::price_trend::PriceTrendAnalyzer;
use super::refresh::MetadataRefresher;
use super::taxonomy::TaxonomyManager;
use crate::api::{ContentCollector, MarketDataProvider, TaxonomySource};
use crate::cache::MarketContextCache;
use crate::config::PipelineConfig;
use crate::error::{InsightError, Result};
use crate::model::{
    AnalysisStatus, ContentCategory, ContentItem, FailureRecord, PipelineReport,
    SourceDescriptor, SourceOutcome, Stage,
};
use crate::prompts::PromptRegistry;
use crate::session::AnalysisSession;
use crate::store::InsightStore;
use chrono::{NaiveDate, Utc};
use insight_llm::AnalysisService;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

pub const NO_CONTENT_MESSAGE: &str = "No company content to analyze";

/// The external systems a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub taxonomy_source: Arc<dyn TaxonomySource>,
    pub collector: Arc<dyn ContentCollector>,
    pub market_data: Arc<dyn MarketDataProvider>,
    pub store: Arc<dyn InsightStore>,
    pub service: Arc<dyn AnalysisService>,
}

/// Runs the analysis pipeline end to end
///
/// Phases run strictly in order: taxonomy, collection and deduplication,
/// market context, company analysis, consolidation, then the optional
/// refresh. Only a taxonomy failure aborts a run; every other failure is
/// contained and listed in the report.
///
/// The orchestrator is reusable. The taxonomy and the market-context cache
/// live across runs, while each run gets a fresh [`AnalysisSession`].
pub struct Orchestrator {
    config: PipelineConfig,
    collaborators: Collaborators,
    prompts: Arc<PromptRegistry>,
    taxonomy: TaxonomyManager,
    cache: MarketContextCache,
    dedup: ContentDeduplicator,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let prompts = Arc::new(PromptRegistry::new(config.response_language.clone())?);
        let taxonomy = TaxonomyManager::new(Arc::clone(&collaborators.taxonomy_source))
            .with_store(Arc::clone(&collaborators.store));
        let cache = MarketContextCache::new(config.context_cache_capacity);
        Ok(Self {
            config,
            collaborators,
            prompts,
            taxonomy,
            cache,
            dedup: ContentDeduplicator::new(),
        })
    }

    /// Use a custom prompt registry
    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn taxonomy(&self) -> &TaxonomyManager {
        &self.taxonomy
    }

    pub fn cache(&self) -> &MarketContextCache {
        &self.cache
    }

    /// Run the pipeline for today's date
    pub async fn run(&self, sources: &[SourceDescriptor]) -> Result<PipelineReport> {
        self.run_on(sources, Utc::now().date_naive()).await
    }

    /// Run the pipeline as of `today`
    ///
    /// Returns `Err` only for a fatal failure; every contained failure is in
    /// the report.
    #[instrument(skip_all, fields(sources = sources.len(), %today))]
    pub async fn run_on(&self, sources: &[SourceDescriptor], today: NaiveDate) -> Result<PipelineReport> {
        let started = Instant::now();
        let session = Arc::new(AnalysisSession::new());
        let mut report = PipelineReport::new(session.run_id());
        info!(run_id = %session.run_id(), "Pipeline run started with {} sources", sources.len());

        // Phase 1: taxonomy, fatal on failure
        let phase = session.begin_phase("taxonomy");
        let taxonomy = match self.taxonomy.load().await {
            Ok(taxonomy) => {
                session.end_phase(
                    phase,
                    true,
                    json!({ "nodes": taxonomy.nodes().len(), "symbols": taxonomy.symbol_count() }),
                );
                taxonomy
            }
            Err(e) => {
                error!("Aborting run: {e}");
                session.end_phase(phase, false, json!({ "error": e.to_string() }));
                session.record_error("taxonomy", &e);
                session.finalize();
                return Err(match e {
                    InsightError::TaxonomyUnavailable(_) => e,
                    other => InsightError::TaxonomyUnavailable(other.to_string()),
                });
            }
        };

        // Phase 2: collection and deduplication
        let phase = session.begin_phase("collection");
        let collected = self.collect(sources, &mut report).await;
        for item in &collected {
            report.categories.entry(item.category).or_default().collected += 1;
        }
        let partitioned = self.dedup.deduplicate(collected);
        for category in ContentCategory::ALL {
            let after_dedup = partitioned.items(category).len();
            if after_dedup > 0 || report.categories.contains_key(&category) {
                report.categories.entry(category).or_default().after_dedup = after_dedup;
            }
        }
        session.end_phase(
            phase,
            report.sources_succeeded > 0 || sources.is_empty(),
            json!({
                "sources_attempted": report.sources_attempted,
                "sources_succeeded": report.sources_succeeded,
                "items_seen": report.items_seen,
                "company": partitioned.company().len(),
                "sector": partitioned.items(ContentCategory::Sector).len(),
                "macro": partitioned.items(ContentCategory::Macro).len(),
            }),
        );

        if partitioned.company().is_empty() {
            warn!("{NO_CONTENT_MESSAGE}, skipping analysis");
            report.status = AnalysisStatus::NoData;
            report.message = NO_CONTENT_MESSAGE.to_string();
            return Ok(self.finish(report, &session, started));
        }

        // Phase 3: market context
        let phase = session.begin_phase("market_context");
        let generator = MarketContextGenerator::new(
            Arc::clone(&self.collaborators.service),
            Arc::clone(&self.prompts),
            Arc::clone(&session),
            &self.config,
        )
        .with_cache(self.cache.clone());
        let context = generator.generate(&partitioned.contextual(), &taxonomy).await;
        if context.status == AnalysisStatus::Error {
            report.failures.push(FailureRecord::new(
                Stage::MarketContext,
                "market_context",
                "analysis failed, continuing with empty context",
            ));
        }
        session.end_phase(
            phase,
            context.status != AnalysisStatus::Error,
            json!({
                "status": context.status.as_str(),
                "sectors": context.sector_sentiments.len(),
                "macro_factors": context.macro_factors.len(),
                "overall_sentiment": context.overall_sentiment.as_str(),
            }),
        );

        // Phase 4: per-item company analysis
        let phase = session.begin_phase("company_analysis");
        let analyzer = CompanyAnalyzer::new(
            Arc::clone(&self.collaborators.service),
            Arc::clone(&self.prompts),
            Arc::clone(&session),
            &self.config,
        );
        let analyses = analyzer
            .analyze_all(partitioned.company(), &context, &taxonomy)
            .await;
        for analysis in analyses.iter().filter(|a| a.is_error()) {
            report.failures.push(FailureRecord::new(
                Stage::CompanyAnalysis,
                analysis.item.url.clone(),
                analysis.error.as_deref().unwrap_or("unknown error"),
            ));
        }
        report.items_failed = analyses.iter().filter(|a| a.is_error()).count();
        report.items_analyzed = analyses.len() - report.items_failed;
        let mentions: usize = analyses.iter().map(|a| a.mentions.len()).sum();
        session.end_phase(
            phase,
            report.items_analyzed > 0,
            json!({
                "items": analyses.len(),
                "failed": report.items_failed,
                "mentions": mentions,
            }),
        );

        // Phase 5: consolidation
        let phase = session.begin_phase("consolidation");
        let consolidator = StockConsolidator::new(
            Arc::clone(&self.collaborators.service),
            Arc::clone(&self.prompts),
            Arc::clone(&session),
            PriceTrendAnalyzer::new(Arc::clone(&self.collaborators.market_data), &self.config),
            &self.config,
        );
        let insights = consolidator
            .consolidate(&analyses, &context, &taxonomy, today)
            .await;
        for insight in insights.iter().filter(|i| i.status == AnalysisStatus::Error) {
            report.failures.push(FailureRecord::new(
                Stage::Consolidation,
                insight.symbol.clone(),
                insight.error.as_deref().unwrap_or("unknown error"),
            ));
        }
        report.unique_symbols = insights.len();
        session.end_phase(
            phase,
            true,
            json!({
                "symbols": insights.len(),
                "with_price_data": insights.iter().filter(|i| i.price_trend.is_available()).count(),
            }),
        );

        if !insights.is_empty() {
            if let Err(e) = self
                .collaborators
                .store
                .insert_insights(report.run_id, &insights)
                .await
            {
                warn!("Could not persist insights: {e}");
                session.record_error("persist_insights", &e);
                report
                    .failures
                    .push(FailureRecord::new(Stage::Persistence, "insights", &e));
            }
        }

        // Phase 6: optional metadata refresh
        if self.config.refresh_after_run && !insights.is_empty() {
            let phase = session.begin_phase("refresh");
            let refresher = MetadataRefresher::new(
                Arc::clone(&self.collaborators.store),
                Arc::clone(&self.collaborators.market_data),
                &self.config,
            );
            let symbols: Vec<String> = insights.iter().map(|i| i.symbol.clone()).collect();
            let summary = refresher.refresh(&symbols, &taxonomy, today).await;
            if summary.failures > 0 {
                report.failures.push(FailureRecord::new(
                    Stage::Refresh,
                    "metadata",
                    format!("{} refresh failures", summary.failures),
                ));
            }
            session.end_phase(phase, summary.failures == 0, json!(summary));
            report.refresh = Some(summary);
        }

        (report.status, report.message) = if report.items_analyzed == 0 {
            (
                AnalysisStatus::Error,
                format!("All {} company items failed analysis", report.items_failed),
            )
        } else if insights.is_empty() {
            (
                AnalysisStatus::NoData,
                "No known symbols were mentioned in the analyzed content".to_string(),
            )
        } else {
            (
                AnalysisStatus::Success,
                format!(
                    "Analyzed {} items into {} stock insights",
                    report.items_analyzed,
                    insights.len()
                ),
            )
        };

        report.market_context = Some(context);
        report.analyses = analyses;
        report.insights = insights;
        Ok(self.finish(report, &session, started))
    }

    /// Collect every source, persisting new items as they arrive
    async fn collect(&self, sources: &[SourceDescriptor], report: &mut PipelineReport) -> Vec<ContentItem> {
        let mut collected = Vec::new();

        for source in sources {
            report.sources_attempted += 1;
            let outcome = tokio::time::timeout(
                self.config.collector_timeout,
                self.collaborators
                    .collector
                    .collect(source, self.config.day_window),
            )
            .await
            .unwrap_or_else(|_| {
                Err(InsightError::Timeout {
                    operation: format!("collecting {}", source.name),
                    after: self.config.collector_timeout,
                })
            });

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Source '{}' failed: {e}", source.name);
                    let failure = InsightError::SourceCollection {
                        source_name: source.name.clone(),
                        reason: e.to_string(),
                    };
                    report
                        .failures
                        .push(FailureRecord::new(Stage::Collection, source.name.clone(), &failure));
                    report.sources.push(SourceOutcome {
                        source_name: source.name.clone(),
                        category: source.category,
                        succeeded: false,
                        items_seen: 0,
                        items_collected: 0,
                        items_new: 0,
                    });
                    continue;
                }
            };

            let items_new = match self
                .collaborators
                .store
                .insert_content_items(&outcome.items)
                .await
            {
                Ok(count) => count,
                Err(e) => {
                    warn!("Could not persist items from '{}': {e}", source.name);
                    report
                        .failures
                        .push(FailureRecord::new(Stage::Persistence, source.name.clone(), &e));
                    0
                }
            };
            info!(
                "Source '{}': {} seen, {} collected, {} new",
                source.name,
                outcome.total_seen,
                outcome.items.len(),
                items_new
            );

            report.sources_succeeded += 1;
            report.items_seen += outcome.total_seen;
            report.sources.push(SourceOutcome {
                source_name: source.name.clone(),
                category: source.category,
                succeeded: true,
                items_seen: outcome.total_seen,
                items_collected: outcome.items.len(),
                items_new,
            });
            collected.extend(outcome.items);

            if self.config.debug_single_source {
                info!("Single-source debug mode, stopping after '{}'", source.name);
                break;
            }
        }
        collected
    }

    fn finish(&self, mut report: PipelineReport, session: &AnalysisSession, started: Instant) -> PipelineReport {
        report.phases = session.phases();
        report.session = Some(session.finalize());
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            run_id = %report.run_id,
            status = report.status.as_str(),
            insights = report.insights.len(),
            failures = report.failures.len(),
            duration_ms = report.duration_ms,
            "Pipeline run finished: {}",
            report.message
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CollectionOutcome, MockContentCollector, MockTaxonomySource};
    use crate::model::sample_taxonomy;
    use crate::pipeline::testing::ScriptedService;
    use crate::store::memory::{InMemoryStore, bar};

    const CONTEXT: &str = r#"{"icb_analysis":[{"icb_code":"8300","sentiment":"positive"}],"market_sentiment":"positive"}"#;
    const COMPANY_ACB: &str = r#"{"post_summary":"ACB lãi lớn","mentioned_stocks":[{"symbol":"ACB","sentiment":"positive"},{"symbol":"ZZZ","sentiment":"negative"}]}"#;
    const COMPANY_ACB_NEUTRAL: &str = r#"{"post_summary":"Ngân hàng","mentioned_stocks":[{"symbol":"acb","sentiment":"neutral"}]}"#;
    const CONSOLIDATION: &str = r#"{"overall_sentiment":"positive","confidence_score":0.8,"recommendation":"buy"}"#;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn item(url: &str, text: &str, category: ContentCategory) -> ContentItem {
        ContentItem::new(url, NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(), text, "src", category)
    }

    fn taxonomy_source() -> MockTaxonomySource {
        let mut source = MockTaxonomySource::new();
        source
            .expect_fetch()
            .returning(|| Ok(sample_taxonomy().to_snapshot()));
        source
    }

    fn sources() -> Vec<SourceDescriptor> {
        vec![
            SourceDescriptor::new("cafef", "https://cafef.vn", ContentCategory::Company),
            SourceDescriptor::new("macro", "https://t.me/macro", ContentCategory::Macro),
            SourceDescriptor::new("broken", "https://broken.vn", ContentCategory::Company),
        ]
    }

    fn collector() -> MockContentCollector {
        let mut collector = MockContentCollector::new();
        collector.expect_collect().returning(|source, _| match source.name.as_str() {
            "cafef" => Ok(CollectionOutcome {
                items: vec![
                    item("https://cafef.vn/acb-1", "ACB báo lãi kỷ lục", ContentCategory::Company),
                    item("https://cafef.vn/acb-2", "ACB và ngành ngân hàng", ContentCategory::Company),
                    item("https://cafef.vn/acb-2/", "ACB và ngành ngân hàng", ContentCategory::Company),
                    item("https://cafef.vn/bad", "Tin không rõ ràng", ContentCategory::Company),
                ],
                total_seen: 10,
            }),
            "macro" => Ok(CollectionOutcome {
                items: vec![item("https://t.me/macro/1", "Lãi suất giảm", ContentCategory::Macro)],
                total_seen: 1,
            }),
            _ => Err(InsightError::Other("HTTP 503".to_string())),
        });
        collector
    }

    fn collaborators(
        service: Arc<ScriptedService>,
        collector: MockContentCollector,
        taxonomy: MockTaxonomySource,
        store: InMemoryStore,
    ) -> Collaborators {
        Collaborators {
            taxonomy_source: Arc::new(taxonomy),
            collector: Arc::new(collector),
            market_data: Arc::new(store.clone()),
            store: Arc::new(store),
            service,
        }
    }

    fn scripted() -> ScriptedService {
        ScriptedService::new()
            .on("Vietnamese stock ACB", CONSOLIDATION)
            .on("ACB báo lãi kỷ lục", COMPANY_ACB)
            .on("ACB và ngành ngân hàng", COMPANY_ACB_NEUTRAL)
            .on("Tin không rõ ràng", "Xin lỗi, tôi không thể phân tích.")
            .on("Lãi suất giảm", CONTEXT)
    }

    #[tokio::test]
    async fn test_full_run_with_partial_failures() {
        let store = InMemoryStore::new();
        store
            .insert_price_bars("ACB", &[bar(5, 25.0, 100), bar(7, 26.0, 100)])
            .await
            .unwrap();
        let service = Arc::new(scripted());
        let orchestrator = Orchestrator::new(
            PipelineConfig::default(),
            collaborators(service.clone(), collector(), taxonomy_source(), store.clone()),
        )
        .unwrap();

        let report = tokio_test::assert_ok!(orchestrator.run_on(&sources(), today()).await);

        assert_eq!(report.status, AnalysisStatus::Success);
        assert_eq!(report.sources_attempted, 3);
        assert_eq!(report.sources_succeeded, 2);
        assert_eq!(report.items_seen, 11);
        assert_eq!(report.counts(ContentCategory::Company).collected, 4);
        assert_eq!(report.counts(ContentCategory::Company).after_dedup, 3);
        assert_eq!(report.failures_in(Stage::Collection).count(), 1);

        assert_eq!(report.items_analyzed, 2);
        assert_eq!(report.items_failed, 1);
        assert_eq!(report.failures_in(Stage::CompanyAnalysis).count(), 1);
        assert!(report.analyses[0].dropped_symbols.contains(&"ZZZ".to_string()));

        assert_eq!(report.insights.len(), 1);
        let acb = &report.insights[0];
        assert_eq!(acb.symbol, "ACB");
        assert_eq!(acb.mention_count, 2);
        assert_eq!(acb.sentiment_distribution.positive, 1);
        assert_eq!(acb.sentiment_distribution.neutral, 1);
        assert_eq!(acb.confidence_score, 0.8);
        assert!(acb.price_trend.is_available());

        let context = report.market_context.as_ref().unwrap();
        assert_eq!(context.sector_sentiments.len(), 1);
        assert_eq!(store.content_count().await, 5);
        assert_eq!(store.insights_for(report.run_id).await.len(), 1);

        let refresh = report.refresh.as_ref().unwrap();
        assert_eq!(refresh.symbols_attempted, 1);
        assert!(store.company("ACB").await.is_some());

        let phases: Vec<&str> = report.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            phases,
            vec!["taxonomy", "collection", "market_context", "company_analysis", "consolidation", "refresh"]
        );
        let session = report.session.as_ref().unwrap();
        assert_eq!(session.total_calls, 5);
        assert_eq!(session.failed_calls, 1);
    }

    #[tokio::test]
    async fn test_market_context_is_reused_across_runs() {
        let service = Arc::new(scripted());
        let orchestrator = Orchestrator::new(
            PipelineConfig::builder().refresh_after_run(false).build().unwrap(),
            collaborators(service.clone(), collector(), taxonomy_source(), InMemoryStore::new()),
        )
        .unwrap();

        orchestrator.run_on(&sources(), today()).await.unwrap();
        let second = orchestrator.run_on(&sources(), today()).await.unwrap();

        let context_prompts = service
            .prompts()
            .iter()
            .filter(|p| p.contains("Lãi suất giảm"))
            .count();
        assert_eq!(context_prompts, 1);
        assert!(second.refresh.is_none());
        assert_eq!(orchestrator.cache().len().await, 1);
    }

    #[tokio::test]
    async fn test_no_company_content_short_circuits() {
        let mut collector = MockContentCollector::new();
        collector.expect_collect().returning(|_, _| {
            Ok(CollectionOutcome {
                items: vec![item("https://t.me/macro/1", "Lãi suất giảm", ContentCategory::Macro)],
                total_seen: 1,
            })
        });
        let service = Arc::new(scripted());
        let orchestrator = Orchestrator::new(
            PipelineConfig::default(),
            collaborators(service.clone(), collector, taxonomy_source(), InMemoryStore::new()),
        )
        .unwrap();

        let report = orchestrator.run_on(&sources()[1..2], today()).await.unwrap();

        assert_eq!(report.status, AnalysisStatus::NoData);
        assert_eq!(report.message, NO_CONTENT_MESSAGE);
        assert!(report.insights.is_empty());
        assert_eq!(service.call_count(), 0);
        assert_eq!(report.phases.len(), 2);
    }

    #[tokio::test]
    async fn test_taxonomy_failure_is_fatal() {
        let mut taxonomy = MockTaxonomySource::new();
        taxonomy
            .expect_fetch()
            .returning(|| Err(InsightError::Other("connection refused".to_string())));
        let mut collector = MockContentCollector::new();
        collector.expect_collect().never();
        let service = Arc::new(scripted());
        let orchestrator = Orchestrator::new(
            PipelineConfig::default(),
            collaborators(service.clone(), collector, taxonomy, InMemoryStore::new()),
        )
        .unwrap();

        let err = tokio_test::assert_err!(orchestrator.run_on(&sources(), today()).await);
        assert!(err.is_fatal());
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_debug_single_source_stops_after_first_success() {
        let service = Arc::new(scripted());
        let orchestrator = Orchestrator::new(
            PipelineConfig::builder()
                .debug_single_source(true)
                .refresh_after_run(false)
                .build()
                .unwrap(),
            collaborators(service.clone(), collector(), taxonomy_source(), InMemoryStore::new()),
        )
        .unwrap();

        let report = orchestrator.run_on(&sources(), today()).await.unwrap();
        assert_eq!(report.sources_attempted, 1);
        assert_eq!(report.counts(ContentCategory::Macro).collected, 0);
        // empty market context, but company analysis still runs
        assert_eq!(
            report.market_context.as_ref().unwrap().status,
            AnalysisStatus::NoData
        );
        assert_eq!(
            report
                .session
                .as_ref()
                .map(|s| s.total_calls)
                .unwrap_or_default(),
            4
        );
    }

    #[tokio::test]
    async fn test_all_items_failing_is_error_status() {
        let mut collector = MockContentCollector::new();
        collector.expect_collect().returning(|_, _| {
            Ok(CollectionOutcome {
                items: vec![item("https://cafef.vn/bad", "Tin không rõ ràng", ContentCategory::Company)],
                total_seen: 1,
            })
        });
        let orchestrator = Orchestrator::new(
            PipelineConfig::default(),
            collaborators(Arc::new(scripted()), collector, taxonomy_source(), InMemoryStore::new()),
        )
        .unwrap();

        let report = orchestrator.run_on(&sources()[..1], today()).await.unwrap();
        assert_eq!(report.status, AnalysisStatus::Error);
        assert_eq!(report.items_failed, 1);
        assert!(report.insights.is_empty());
    }
}
