//! Shared market context from sector and macro content

use super::call_and_decode;
use super::taxonomy::format_for_prompt;
use crate::cache::{MarketContextCache, batch_key};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::{AnalysisStatus, ClassificationTaxonomy, ContentItem, MarketContext};
use crate::prompts::{self, PromptRegistry};
use crate::session::{AnalysisSession, CallKind};
use chrono::Utc;
use insight_llm::{AnalysisRequest, AnalysisService};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Serialize)]
struct PromptItem<'a> {
    source_name: &'a str,
    category: &'static str,
    published_date: String,
    url: &'a str,
    text: String,
}

#[derive(Serialize)]
struct PromptVars<'a> {
    taxonomy: String,
    analysis_date: String,
    item_count: usize,
    items: Vec<PromptItem<'a>>,
}

/// Produces one [`MarketContext`] per distinct content batch
pub struct MarketContextGenerator {
    service: Arc<dyn AnalysisService>,
    prompts: Arc<PromptRegistry>,
    session: Arc<AnalysisSession>,
    cache: MarketContextCache,
    text_limit: usize,
    max_per_level: usize,
    temperature: f32,
}

impl MarketContextGenerator {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        prompts: Arc<PromptRegistry>,
        session: Arc<AnalysisSession>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            service,
            prompts,
            session,
            cache: MarketContextCache::new(config.context_cache_capacity),
            text_limit: config.context_text_limit,
            max_per_level: config.taxonomy_max_per_level,
            temperature: config.context_temperature,
        }
    }

    /// Share a cache that outlives this generator
    pub fn with_cache(mut self, cache: MarketContextCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &MarketContextCache {
        &self.cache
    }

    /// Context for a batch of sector and macro items
    ///
    /// An empty batch yields the neutral empty context without calling the
    /// service. Service and parse failures also degrade to the empty context,
    /// tagged `error`, and are not cached.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn generate(&self, items: &[ContentItem], taxonomy: &ClassificationTaxonomy) -> MarketContext {
        if items.is_empty() {
            info!("No sector or macro content, using empty market context");
            return MarketContext::empty(AnalysisStatus::NoData);
        }

        let key = batch_key(items);
        if let Some(cached) = self.cache.get(&key).await {
            info!("Market context cache hit for batch {}", &key[..12]);
            return cached;
        }

        match self.request_context(items, taxonomy).await {
            Ok(mut context) => {
                validate_context(&mut context, taxonomy);
                context.analysis_date = Some(Utc::now().date_naive());
                context.items_analyzed = items.len();
                context.generated_at = Utc::now();
                context.status = AnalysisStatus::Success;
                info!(
                    "Market context: {} sectors, {} macro factors, overall {}",
                    context.sector_sentiments.len(),
                    context.macro_factors.len(),
                    context.overall_sentiment
                );
                self.cache.insert(key, context.clone()).await;
                context
            }
            Err(e) => {
                warn!("Market context generation failed, using empty context: {e}");
                self.session.record_error("market_context", &e);
                let mut context = MarketContext::empty(AnalysisStatus::Error);
                context.items_analyzed = items.len();
                context
            }
        }
    }

    async fn request_context(
        &self,
        items: &[ContentItem],
        taxonomy: &ClassificationTaxonomy,
    ) -> Result<MarketContext> {
        let vars = PromptVars {
            taxonomy: format_for_prompt(taxonomy.nodes(), self.max_per_level),
            analysis_date: Utc::now().format("%Y-%m-%d").to_string(),
            item_count: items.len(),
            items: items
                .iter()
                .map(|item| PromptItem {
                    source_name: &item.source_name,
                    category: item.category.as_str(),
                    published_date: item.published_date.to_string(),
                    url: &item.url,
                    text: item.truncated_text(self.text_limit),
                })
                .collect(),
        };
        let prompt = self.prompts.render(prompts::MARKET_CONTEXT, &vars)?;
        let urls = items.iter().map(|i| i.url.clone()).collect();

        call_and_decode(
            self.service.as_ref(),
            &self.session,
            CallKind::MarketContext,
            None,
            urls,
            AnalysisRequest::new(prompt).with_temperature(self.temperature),
        )
        .await
    }
}

/// Drop sector views for codes outside the taxonomy and fill blank labels
fn validate_context(context: &mut MarketContext, taxonomy: &ClassificationTaxonomy) {
    context.sector_sentiments.retain(|sector| {
        let known = taxonomy.contains_code(sector.classification_code.trim());
        if !known {
            warn!(
                "Dropping sector sentiment for unknown classification code '{}'",
                sector.classification_code
            );
        }
        known
    });
    for sector in &mut context.sector_sentiments {
        sector.classification_code = sector.classification_code.trim().to_string();
    }
    context.fill_defaults();
}

/// Market context as background for a company-analysis prompt
pub fn render_for_prompt(context: &MarketContext, taxonomy: &ClassificationTaxonomy) -> String {
    let mut text = String::new();
    let date = context
        .analysis_date
        .map_or_else(|| "Unknown".to_string(), |d| d.to_string());
    let _ = writeln!(text, "Market Analysis Date: {date}");
    let _ = writeln!(text, "Overall Market Sentiment: {}", context.overall_sentiment);
    let _ = writeln!(text, "Volatility Outlook: {}", context.volatility_outlook);
    let _ = writeln!(text, "Investor Sentiment: {}\n", context.investor_sentiment);

    if !context.sector_sentiments.is_empty() {
        text.push_str("INDUSTRY SENTIMENT BY SECTOR:\n");
        for sector in &context.sector_sentiments {
            let name = taxonomy
                .node(&sector.classification_code)
                .map_or("", |n| n.local_name.as_str());
            let _ = writeln!(
                text,
                "- {} ({}): {} [{} confidence]",
                sector.classification_code,
                name,
                sector.sentiment,
                sector.confidence.as_str()
            );
            let _ = writeln!(text, "  Key Drivers: {}", sector.drivers.join(", "));
            if !sector.risks.is_empty() {
                let _ = writeln!(text, "  Risks: {}", sector.risks.join(", "));
            }
            if !sector.outlook.is_empty() {
                let _ = writeln!(text, "  Outlook: {}", sector.outlook);
            }
        }
        text.push('\n');
    }

    if !context.macro_factors.is_empty() {
        text.push_str("MACRO ECONOMIC FACTORS:\n");
        for factor in &context.macro_factors {
            let _ = writeln!(text, "- {}: {} trend", factor.name, factor.trend);
            let _ = writeln!(text, "  Market Impact: {}", factor.market_impact);
            let _ = writeln!(
                text,
                "  Affected Codes: {}",
                factor.affected_classification_codes.join(", ")
            );
            if !factor.description.is_empty() {
                let _ = writeln!(text, "  Description: {}", factor.description);
            }
        }
        text.push('\n');
    }

    push_lists(&mut text, context);
    if !context.market_outlook.is_empty() {
        let _ = writeln!(text, "\nMarket Outlook: {}", context.market_outlook);
    }
    text
}

/// Condensed market context for a consolidation prompt
pub fn render_summary(context: &MarketContext) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Market Sentiment: {}", context.overall_sentiment);
    let _ = writeln!(text, "Volatility Outlook: {}", context.volatility_outlook);
    let outlook = if context.market_outlook.is_empty() {
        "No outlook available"
    } else {
        context.market_outlook.as_str()
    };
    let _ = writeln!(text, "Market Outlook: {outlook}\n");
    push_lists(&mut text, context);
    text
}

fn push_lists(text: &mut String, context: &MarketContext) {
    if !context.cross_sector_themes.is_empty() {
        let themes: Vec<&str> = context
            .cross_sector_themes
            .iter()
            .map(|t| t.theme.as_str())
            .collect();
        let _ = writeln!(text, "Cross-Sector Themes: {}", themes.join(", "));
    }
    if !context.key_risks.is_empty() {
        let _ = writeln!(text, "Key Market Risks: {}", context.key_risks.join(", "));
    }
    if !context.opportunities.is_empty() {
        let _ = writeln!(text, "Market Opportunities: {}", context.opportunities.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentCategory, Sentiment, sample_taxonomy};
    use crate::pipeline::testing::ScriptedService;
    use chrono::NaiveDate;

    const RESPONSE: &str = r#"Sure, here is the analysis:
{
    "icb_analysis": [
        {"icb_code": "8300", "sentiment": "positive", "key_drivers": ["Tín dụng tăng"]},
        {"icb_code": "9999", "sentiment": "negative"}
    ],
    "macro_factors": [{"factor": "interest_rates", "trend": "falling", "market_impact": "positive"}],
    "cross_sector_themes": ["Đầu tư công"],
    "market_sentiment": "bullish",
    "volatility_outlook": null
}
Let me know if you need more."#;

    fn items() -> Vec<ContentItem> {
        vec![
            ContentItem::new(
                "https://t.me/vnmacro/1",
                NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                "Lãi suất điều hành giảm",
                "vn macro",
                ContentCategory::Macro,
            ),
            ContentItem::new(
                "https://t.me/banks/2",
                NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(),
                "x".repeat(2000),
                "bank sector",
                ContentCategory::Sector,
            ),
        ]
    }

    fn generator(service: Arc<ScriptedService>, session: Arc<AnalysisSession>) -> MarketContextGenerator {
        MarketContextGenerator::new(
            service,
            Arc::new(PromptRegistry::new("Vietnamese").unwrap()),
            session,
            &PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_batch_skips_the_service() {
        let service = Arc::new(ScriptedService::new().otherwise(RESPONSE));
        let generator = generator(service.clone(), Arc::new(AnalysisSession::new()));

        let context = generator.generate(&[], &sample_taxonomy()).await;
        assert_eq!(context.overall_sentiment, Sentiment::Neutral);
        assert!(context.has_no_findings());
        assert_eq!(context.status, AnalysisStatus::NoData);
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_codes_are_dropped_and_result_cached() {
        let service = Arc::new(ScriptedService::new().otherwise(RESPONSE));
        let session = Arc::new(AnalysisSession::new());
        let generator = generator(service.clone(), session.clone());
        let taxonomy = sample_taxonomy();

        let context = generator.generate(&items(), &taxonomy).await;
        assert_eq!(context.status, AnalysisStatus::Success);
        assert_eq!(context.sector_sentiments.len(), 1);
        assert!(context.sector_sentiments.iter().all(|s| taxonomy.contains_code(&s.classification_code)));
        assert_eq!(context.overall_sentiment, Sentiment::Positive);
        assert_eq!(context.volatility_outlook, "moderate");
        assert_eq!(context.items_analyzed, 2);
        assert_eq!(context.cross_sector_themes[0].theme, "Đầu tư công");

        // same batch in a different order hits the cache
        let mut reversed = items();
        reversed.reverse();
        let again = generator.generate(&reversed, &taxonomy).await;
        assert_eq!(again, context);
        assert_eq!(service.call_count(), 1);
        assert_eq!(session.call_count(CallKind::MarketContext), 1);
    }

    #[tokio::test]
    async fn test_numeric_codes_and_bad_entries_do_not_sink_the_context() {
        let service = Arc::new(ScriptedService::new().otherwise(
            r#"{
                "icb_analysis": [
                    {"icb_code": "8300", "sentiment": "positive"},
                    {"icb_code": 8355, "sentiment": "negative", "key_drivers": "Nợ xấu"},
                    {"icb_code": 9999, "sentiment": "negative"},
                    ["garbage"]
                ],
                "macro_factors": [{"factor": "Tỷ giá", "trend": "rising"}],
                "market_sentiment": "positive"
            }"#,
        ));
        let generator = generator(service, Arc::new(AnalysisSession::new()));

        let context = generator.generate(&items(), &sample_taxonomy()).await;
        assert_eq!(context.status, AnalysisStatus::Success);
        let codes: Vec<&str> = context
            .sector_sentiments
            .iter()
            .map(|s| s.classification_code.as_str())
            .collect();
        assert_eq!(codes, vec!["8300", "8355"]);
        assert_eq!(context.sector_sentiments[1].drivers, vec!["Nợ xấu"]);
        assert_eq!(context.macro_factors.len(), 1);
        assert_eq!(context.overall_sentiment, Sentiment::Positive);
    }

    #[tokio::test]
    async fn test_prompt_truncates_item_text() {
        let service = Arc::new(ScriptedService::new().otherwise(RESPONSE));
        let generator = generator(service.clone(), Arc::new(AnalysisSession::new()));
        generator.generate(&items(), &sample_taxonomy()).await;

        let prompt = &service.prompts()[0];
        assert!(prompt.contains(&format!("{}...", "x".repeat(1500))));
        assert!(!prompt.contains(&"x".repeat(1501)));
        assert!(prompt.contains("Available Industry Classifications:"));
    }

    #[tokio::test]
    async fn test_unparseable_response_degrades_to_error_context() {
        let service = Arc::new(ScriptedService::new().otherwise("The market looks calm today."));
        let session = Arc::new(AnalysisSession::new());
        let generator = generator(service.clone(), session.clone());

        let context = generator.generate(&items(), &sample_taxonomy()).await;
        assert_eq!(context.status, AnalysisStatus::Error);
        assert!(context.has_no_findings());
        assert!(generator.cache().is_empty().await);
        assert_eq!(session.errors().len(), 1);
    }

    #[test]
    fn test_render_for_prompt_names_sectors() {
        let taxonomy = sample_taxonomy();
        let context: MarketContext = serde_json::from_str(
            r#"{"icb_analysis": [{"icb_code": "8300", "sentiment": "negative", "key_drivers": ["NPL"]}],
                "key_risks": ["Tỷ giá"], "market_outlook": "Thận trọng"}"#,
        )
        .unwrap();
        let text = render_for_prompt(&context, &taxonomy);
        assert!(text.contains("- 8300 (Ngân hàng): negative"));
        assert!(text.contains("Key Drivers: NPL"));
        assert!(text.contains("Key Market Risks: Tỷ giá"));
        assert!(text.contains("Market Outlook: Thận trọng"));

        let summary = render_summary(&MarketContext::default());
        assert!(summary.contains("No outlook available"));
    }
}
