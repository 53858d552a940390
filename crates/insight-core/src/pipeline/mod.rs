//! The analysis pipeline stages and their orchestration

pub mod company;
pub mod consolidator;
pub mod dedup;
pub mod market_context;
pub mod orchestrator;
pub mod price_trend;
pub mod refresh;
pub mod taxonomy;

pub use company::CompanyAnalyzer;
pub use consolidator::{Evidence, StockConsolidator, group_mentions, sort_insights};
pub use dedup::{ContentDeduplicator, PartitionedContent, canonical_url};
pub use market_context::MarketContextGenerator;
pub use orchestrator::{Collaborators, Orchestrator};
pub use price_trend::{PriceTrendAnalyzer, render_price_context, summarize_bars};
pub use refresh::MetadataRefresher;
pub use taxonomy::{TaxonomyManager, format_for_prompt, format_symbol_mapping, mentioned_symbols};

use crate::error::{InsightError, Result};
use crate::session::{AnalysisSession, CallKind};
use insight_llm::{AnalysisRequest, AnalysisService, DecodeStage, decode_json};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Invoke the analysis service once and decode the JSON payload into `T`
///
/// The call is recorded in the session ledger. A response that cannot be
/// decoded counts as a failed call.
pub(crate) async fn call_and_decode<T: DeserializeOwned>(
    service: &dyn AnalysisService,
    session: &AnalysisSession,
    kind: CallKind,
    subject: Option<&str>,
    urls: Vec<String>,
    request: AnalysisRequest,
) -> Result<T> {
    let timer = session.begin_call(kind, subject, urls, &request.prompt);

    let text = match service.analyze(request).await {
        Ok(text) => text,
        Err(e) => {
            session.end_call(timer, Err(&e));
            return Err(InsightError::AnalysisService(e));
        }
    };

    match decode_json::<T>(&text) {
        Ok(decoded) => {
            if decoded.stage != DecodeStage::Strict {
                debug!("{kind} response decoded via {:?} extraction", decoded.stage);
            }
            session.end_call(timer, Ok(&text));
            Ok(decoded.value)
        }
        Err(e) => {
            session.end_call(timer, Err(&e));
            Err(InsightError::AnalysisParse {
                call: kind.to_string(),
                source: e,
            })
        }
    }
}
