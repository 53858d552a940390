//! Holistic financial-news analysis pipeline
//!
//! The pipeline turns collected news items into ranked, evidence-linked
//! per-symbol insights:
//!
//! - [`pipeline::TaxonomyManager`] loads the sector classification and symbol mapping
//! - [`pipeline::ContentDeduplicator`] merges sources and drops duplicate URLs
//! - [`pipeline::MarketContextGenerator`] derives shared sector and macro context
//! - [`pipeline::CompanyAnalyzer`] analyzes each company item against that context
//! - [`pipeline::StockConsolidator`] merges every mention of a symbol with its price trend
//! - [`pipeline::Orchestrator`] runs the phases and assembles the [`PipelineReport`]
//!
//! External systems are reached only through the traits in [`api`] and
//! [`store`], plus [`insight_llm::AnalysisService`].

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod session;
pub mod store;
pub mod telemetry;

pub use api::{CollectionOutcome, ContentCollector, MarketDataProvider, PriceBar, TaxonomySource};
pub use cache::{MarketContextCache, batch_key};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{InsightError, Result};
pub use model::{
    AnalysisStatus, ConsolidatedStockInsight, ContentCategory, ContentItem, MarketContext,
    PerItemAnalysis, PipelineReport, SourceDescriptor,
};
pub use pipeline::{Collaborators, Orchestrator};
pub use prompts::PromptRegistry;
pub use session::{AnalysisSession, SessionSummary};
pub use store::{InMemoryStore, InsightStore, SqliteStore};
pub use telemetry::{init_tracing, init_tracing_json, try_init_tracing};
