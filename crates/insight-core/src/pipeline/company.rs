//! Per-item company analysis against the shared market context

use super::call_and_decode;
use super::market_context::render_for_prompt;
use super::taxonomy::{format_symbol_mapping, mentioned_symbols};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::{
    AnalysisStatus, ClassificationTaxonomy, ContentItem, MarketContext, PerItemAnalysis, StockMention,
    lenient_entries, lenient_string, normalize_symbol, string_or_list,
};
use crate::prompts::{self, PromptRegistry};
use crate::session::{AnalysisSession, CallKind};
use futures::StreamExt;
use futures::stream;
use insight_llm::{AnalysisRequest, AnalysisService};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Raw company-analysis payload; mentions are decoded one by one
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CompanyResponse {
    #[serde(alias = "post_summary", deserialize_with = "lenient_string")]
    item_summary: String,
    #[serde(alias = "mentioned_stocks", deserialize_with = "lenient_entries")]
    mentions: Vec<serde_json::Value>,
    #[serde(alias = "overall_market_implications", deserialize_with = "lenient_string")]
    market_implications: String,
    #[serde(deserialize_with = "string_or_list")]
    cross_references: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    analyst_notes: String,
}

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
    symbol_mapping: String,
    market_context: &'a str,
    item: PromptItem<'a>,
}

/// Analyzes company items one service call per item
///
/// A failed item yields an error-tagged record and never stops the batch.
/// Results keep input order whatever the concurrency.
pub struct CompanyAnalyzer {
    service: Arc<dyn AnalysisService>,
    prompts: Arc<PromptRegistry>,
    session: Arc<AnalysisSession>,
    text_limit: usize,
    mapping_max: usize,
    temperature: f32,
    concurrency: usize,
}

impl CompanyAnalyzer {
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
            text_limit: config.company_text_limit,
            mapping_max: config.symbol_mapping_max,
            temperature: config.company_temperature,
            concurrency: config.company_concurrency.max(1),
        }
    }

    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn analyze_all(
        &self,
        items: &[ContentItem],
        context: &MarketContext,
        taxonomy: &ClassificationTaxonomy,
    ) -> Vec<PerItemAnalysis> {
        let context_text = render_for_prompt(context, taxonomy);
        let total = items.len();

        let analyses: Vec<PerItemAnalysis> = stream::iter(items.iter().enumerate())
            .map(|(index, item)| {
                let context_text = context_text.as_str();
                async move {
                    debug!("Analyzing company item {}/{}: {}", index + 1, total, item.url);
                    self.analyze_item(item, context_text, taxonomy).await
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let failed = analyses.iter().filter(|a| a.is_error()).count();
        let mentions: usize = analyses.iter().map(|a| a.mentions.len()).sum();
        info!(
            "Company analysis: {} items, {} failed, {} validated mentions",
            total, failed, mentions
        );
        analyses
    }

    /// Analyze one item; failures come back as an error-tagged record
    pub async fn analyze_item(
        &self,
        item: &ContentItem,
        context_text: &str,
        taxonomy: &ClassificationTaxonomy,
    ) -> PerItemAnalysis {
        match self.request_analysis(item, context_text, taxonomy).await {
            Ok(response) => validate_response(item, response, taxonomy),
            Err(e) => {
                warn!("Company analysis failed for {}: {e}", item.url);
                self.session.record_error(format!("company_analysis:{}", item.url), &e);
                PerItemAnalysis::failed(item, e.to_string())
            }
        }
    }

    async fn request_analysis(
        &self,
        item: &ContentItem,
        context_text: &str,
        taxonomy: &ClassificationTaxonomy,
    ) -> Result<CompanyResponse> {
        let candidates = mentioned_symbols(taxonomy, &item.raw_text);
        let vars = PromptVars {
            symbol_mapping: format_symbol_mapping(taxonomy.symbols(), Some(&candidates), self.mapping_max),
            market_context: context_text,
            item: PromptItem {
                source_name: &item.source_name,
                category: item.category.as_str(),
                published_date: item.published_date.to_string(),
                url: &item.url,
                text: item.truncated_text(self.text_limit),
            },
        };
        let prompt = self.prompts.render(prompts::COMPANY_ANALYSIS, &vars)?;

        call_and_decode(
            self.service.as_ref(),
            &self.session,
            CallKind::CompanyAnalysis,
            Some(&item.url),
            vec![item.url.clone()],
            AnalysisRequest::new(prompt).with_temperature(self.temperature),
        )
        .await
    }
}

/// Keep only mentions whose symbol resolves in the mapping
///
/// Resolved mentions get the mapping's company name and classification
/// when the service left them out. A symbol reported twice for one item
/// counts once.
fn validate_response(
    item: &ContentItem,
    response: CompanyResponse,
    taxonomy: &ClassificationTaxonomy,
) -> PerItemAnalysis {
    let mut mentions = Vec::new();
    let mut dropped = Vec::new();
    let mut seen = HashSet::new();

    for raw in response.mentions {
        let mut mention: StockMention = match serde_json::from_value(raw) {
            Ok(mention) => mention,
            Err(e) => {
                warn!("Skipping malformed mention in {}: {e}", item.url);
                continue;
            }
        };

        let symbol = normalize_symbol(&mention.symbol);
        if symbol.is_empty() {
            continue;
        }
        let Some(entry) = taxonomy.lookup_symbol(&symbol) else {
            warn!("Unknown symbol '{symbol}' in {}, dropping mention", item.url);
            dropped.push(symbol);
            continue;
        };
        if !seen.insert(symbol.clone()) {
            continue;
        }

        mention.symbol = symbol;
        if mention.company_name.trim().is_empty() {
            mention.company_name.clone_from(&entry.company_name);
        }
        if mention.classification_codes.is_empty() {
            mention.classification_codes.clone_from(&entry.classification_codes);
        }
        if mention.classification_names.is_empty() {
            mention.classification_names.clone_from(&entry.classification_names);
        }
        mentions.push(mention);
    }

    let status = if mentions.is_empty() {
        AnalysisStatus::NoData
    } else {
        AnalysisStatus::Success
    };
    debug!("{}: {} valid mentions, {} dropped", item.url, mentions.len(), dropped.len());

    PerItemAnalysis {
        item: item.into(),
        status,
        item_summary: response.item_summary,
        market_implications: response.market_implications,
        cross_references: response.cross_references,
        analyst_notes: response.analyst_notes,
        mentions,
        dropped_symbols: dropped,
        error: None,
    }
}
