//! Per-symbol consolidation of every validated mention

use super::call_and_decode;
use super::market_context::render_summary;
use super::price_trend::{PriceTrendAnalyzer, render_price_context};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::model::{
    AnalysisStatus, Catalysts, ClassificationTaxonomy, ConsolidatedStockInsight, InsightMetadata,
    ItemRef, MarketContext, PerItemAnalysis, PriceTrend, Recommendation, Sentiment,
    SentimentDistribution, SourceMention, StockMention, TargetScenarios, TimeHorizon,
    clamp_confidence, lenient_or_default, lenient_string, string_or_list,
};
use crate::prompts::{self, PromptRegistry};
use crate::session::{AnalysisSession, CallKind};
use chrono::{NaiveDate, Utc};
use insight_llm::{AnalysisRequest, AnalysisService};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One mention together with the item it was extracted from
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub item: &'a ItemRef,
    pub item_summary: &'a str,
    pub mention: &'a StockMention,
}

/// Group the mentions of successful analyses by symbol
///
/// Error-tagged analyses contribute nothing. Each group is ordered by
/// publication date then URL, so the grouping does not depend on the
/// order analyses finished in.
pub fn group_mentions(analyses: &[PerItemAnalysis]) -> BTreeMap<String, Vec<Evidence<'_>>> {
    let mut groups: BTreeMap<String, Vec<Evidence<'_>>> = BTreeMap::new();
    for analysis in analyses.iter().filter(|a| a.status == AnalysisStatus::Success) {
        for mention in &analysis.mentions {
            groups.entry(mention.symbol.clone()).or_default().push(Evidence {
                item: &analysis.item,
                item_summary: &analysis.item_summary,
                mention,
            });
        }
    }
    for evidence in groups.values_mut() {
        evidence.sort_by(|a, b| {
            (a.item.published_date, &a.item.url).cmp(&(b.item.published_date, &b.item.url))
        });
    }
    groups
}

/// Default presentation order: confidence desc, mention count desc, symbol asc
pub fn sort_insights(insights: &mut [ConsolidatedStockInsight]) {
    insights.sort_by(|a, b| {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then_with(|| b.mention_count.cmp(&a.mention_count))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

/// Accept a number, a numeric string or null
fn lenient_score<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConsolidationResponse {
    #[serde(deserialize_with = "lenient_string")]
    company_name: String,
    overall_sentiment: Sentiment,
    #[serde(alias = "confidence", deserialize_with = "lenient_score")]
    confidence_score: f64,
    #[serde(alias = "consolidated_summary", deserialize_with = "lenient_string")]
    narrative: String,
    #[serde(alias = "key_drivers", deserialize_with = "string_or_list")]
    drivers: Vec<String>,
    #[serde(alias = "risk_factors", deserialize_with = "string_or_list")]
    risks: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    opportunities: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    industry_context: String,
    #[serde(deserialize_with = "lenient_string")]
    macro_context: String,
    #[serde(deserialize_with = "lenient_string")]
    price_context: String,
    #[serde(deserialize_with = "lenient_string")]
    investment_thesis: String,
    time_horizon: TimeHorizon,
    recommendation: Recommendation,
    #[serde(deserialize_with = "lenient_or_default")]
    target_scenarios: TargetScenarios,
    #[serde(deserialize_with = "lenient_or_default")]
    catalysts: Catalysts,
    #[serde(deserialize_with = "lenient_string")]
    research_quality: String,
    #[serde(deserialize_with = "lenient_string")]
    data_freshness: String,
}

#[derive(Serialize)]
struct PromptMention<'a> {
    source_name: &'a str,
    published_date: String,
    url: &'a str,
    sentiment: &'static str,
    confidence: &'static str,
    narrative: &'a str,
    drivers: &'a [String],
    risks: &'a [String],
    opportunities: &'a [String],
    industry_context: &'a str,
    macro_context: &'a str,
}

#[derive(Serialize)]
struct PromptVars<'a> {
    symbol: &'a str,
    market_context: &'a str,
    price_context: &'a str,
    mention_count: usize,
    mentions: Vec<PromptMention<'a>>,
}

/// Turns grouped mentions into one ranked insight per symbol
///
/// Every symbol with at least one mention yields an insight. When the
/// service call fails the insight is built from the counted evidence alone
/// and tagged `error`.
pub struct StockConsolidator {
    service: Arc<dyn AnalysisService>,
    prompts: Arc<PromptRegistry>,
    session: Arc<AnalysisSession>,
    prices: PriceTrendAnalyzer,
    temperature: f32,
}

impl StockConsolidator {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        prompts: Arc<PromptRegistry>,
        session: Arc<AnalysisSession>,
        prices: PriceTrendAnalyzer,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            service,
            prompts,
            session,
            prices,
            temperature: config.consolidation_temperature,
        }
    }

    #[instrument(skip_all, fields(analyses = analyses.len()))]
    pub async fn consolidate(
        &self,
        analyses: &[PerItemAnalysis],
        context: &MarketContext,
        taxonomy: &ClassificationTaxonomy,
        today: NaiveDate,
    ) -> Vec<ConsolidatedStockInsight> {
        let groups = group_mentions(analyses);
        info!("Consolidating {} symbols", groups.len());

        let context_text = render_summary(context);
        let mut insights = Vec::with_capacity(groups.len());
        for (symbol, evidence) in &groups {
            insights.push(
                self.consolidate_symbol(symbol, evidence, &context_text, taxonomy, today)
                    .await,
            );
        }

        sort_insights(&mut insights);
        let failed = insights
            .iter()
            .filter(|i| i.status == AnalysisStatus::Error)
            .count();
        info!("Consolidation: {} insights, {} degraded", insights.len(), failed);
        insights
    }

    /// Insight for one symbol; never fails
    pub async fn consolidate_symbol(
        &self,
        symbol: &str,
        evidence: &[Evidence<'_>],
        context_text: &str,
        taxonomy: &ClassificationTaxonomy,
        today: NaiveDate,
    ) -> ConsolidatedStockInsight {
        let trend = self.prices.trend(symbol, today).await;
        let price_text = render_price_context(&trend);
        let insight = base_insight(symbol, evidence, taxonomy, trend);

        match self
            .request_consolidation(symbol, evidence, context_text, &price_text)
            .await
        {
            Ok(response) => merge_response(insight, response),
            Err(e) => {
                warn!("Consolidation failed for {symbol}: {e}");
                self.session
                    .record_error(format!("stock_consolidation:{symbol}"), &e);
                degrade(insight, &e.to_string())
            }
        }
    }

    async fn request_consolidation(
        &self,
        symbol: &str,
        evidence: &[Evidence<'_>],
        context_text: &str,
        price_text: &str,
    ) -> Result<ConsolidationResponse> {
        let vars = PromptVars {
            symbol,
            market_context: context_text,
            price_context: price_text,
            mention_count: evidence.len(),
            mentions: evidence
                .iter()
                .map(|e| PromptMention {
                    source_name: &e.item.source_name,
                    published_date: e.item.published_date.to_string(),
                    url: &e.item.url,
                    sentiment: e.mention.sentiment.as_str(),
                    confidence: e.mention.confidence.as_str(),
                    narrative: &e.mention.narrative,
                    drivers: &e.mention.drivers,
                    risks: &e.mention.risks,
                    opportunities: &e.mention.opportunities,
                    industry_context: &e.mention.industry_context,
                    macro_context: &e.mention.macro_context,
                })
                .collect(),
        };
        let prompt = self.prompts.render(prompts::STOCK_CONSOLIDATION, &vars)?;
        let urls = evidence.iter().map(|e| e.item.url.clone()).collect();

        call_and_decode(
            self.service.as_ref(),
            &self.session,
            CallKind::StockConsolidation,
            Some(symbol),
            urls,
            AnalysisRequest::new(prompt).with_temperature(self.temperature),
        )
        .await
    }
}

/// Counted fields, evidence links and metadata; independent of the service
fn base_insight(
    symbol: &str,
    evidence: &[Evidence<'_>],
    taxonomy: &ClassificationTaxonomy,
    trend: PriceTrend,
) -> ConsolidatedStockInsight {
    let mapping = taxonomy.lookup_symbol(symbol);
    let distribution = SentimentDistribution::from_mentions(evidence.iter().map(|e| e.mention));
    let company_name = mapping
        .map(|m| m.company_name.clone())
        .or_else(|| {
            evidence
                .iter()
                .map(|e| e.mention.company_name.trim())
                .find(|name| !name.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let sources: BTreeSet<&str> = evidence.iter().map(|e| e.item.source_name.as_str()).collect();
    let dates = evidence.iter().map(|e| e.item.published_date);

    ConsolidatedStockInsight {
        symbol: symbol.to_string(),
        company_name,
        classification_codes: mapping.map(|m| m.classification_codes.clone()).unwrap_or_default(),
        status: AnalysisStatus::Success,
        overall_sentiment: distribution.majority(),
        majority_sentiment: distribution.majority(),
        confidence_score: 0.0,
        mention_count: evidence.len(),
        sentiment_distribution: distribution,
        recommendation: Recommendation::Hold,
        narrative: String::new(),
        investment_thesis: String::new(),
        industry_context: String::new(),
        macro_context: String::new(),
        price_context: String::new(),
        drivers: Vec::new(),
        risks: Vec::new(),
        opportunities: Vec::new(),
        time_horizon: TimeHorizon::default(),
        target_scenarios: TargetScenarios::default(),
        catalysts: Catalysts::default(),
        research_quality: String::new(),
        data_freshness: String::new(),
        price_trend: trend,
        source_mentions: evidence.iter().map(source_mention).collect(),
        metadata: InsightMetadata {
            sources_count: sources.len(),
            earliest_date: dates.clone().min(),
            latest_date: dates.max(),
            consolidated_at: Utc::now(),
        },
        error: None,
    }
}

fn source_mention(evidence: &Evidence<'_>) -> SourceMention {
    SourceMention {
        source_name: evidence.item.source_name.clone(),
        url: evidence.item.url.clone(),
        published_date: evidence.item.published_date,
        sentiment: evidence.mention.sentiment,
        confidence: evidence.mention.confidence,
        narrative: evidence.mention.narrative.clone(),
        key_points: evidence.mention.drivers.clone(),
        risks: evidence.mention.risks.clone(),
        item_summary: evidence.item_summary.to_string(),
    }
}

/// Overlay the synthesized fields; counted fields stay as counted
fn merge_response(
    mut insight: ConsolidatedStockInsight,
    response: ConsolidationResponse,
) -> ConsolidatedStockInsight {
    if insight.company_name.is_empty() && !response.company_name.trim().is_empty() {
        insight.company_name = response.company_name.trim().to_string();
    }
    let confidence = clamp_confidence(response.confidence_score);
    if !(0.0..=1.0).contains(&response.confidence_score) {
        warn!(
            "{}: confidence {} clamped to {confidence}",
            insight.symbol, response.confidence_score
        );
    }
    insight.confidence_score = confidence;
    insight.overall_sentiment = response.overall_sentiment;
    if insight.overall_sentiment != insight.majority_sentiment {
        info!(
            "{}: synthesized sentiment {} differs from counted majority {}",
            insight.symbol, insight.overall_sentiment, insight.majority_sentiment
        );
    }
    insight.narrative = response.narrative;
    insight.drivers = response.drivers;
    insight.risks = response.risks;
    insight.opportunities = response.opportunities;
    insight.industry_context = response.industry_context;
    insight.macro_context = response.macro_context;
    insight.price_context = response.price_context;
    insight.investment_thesis = response.investment_thesis;
    insight.time_horizon = response.time_horizon;
    insight.recommendation = response.recommendation;
    insight.target_scenarios = response.target_scenarios;
    insight.catalysts = response.catalysts;
    insight.research_quality = response.research_quality;
    insight.data_freshness = response.data_freshness;
    insight
}

/// Minimal insight from the raw mentions alone
fn degrade(mut insight: ConsolidatedStockInsight, reason: &str) -> ConsolidatedStockInsight {
    insight.status = AnalysisStatus::Error;
    insight.overall_sentiment = Sentiment::Neutral;
    insight.confidence_score = 0.0;
    insight.narrative = format!("Consolidation failed: {reason}");
    insight.error = Some(reason.to_string());
    insight
}
