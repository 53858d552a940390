//! Error types for the analysis pipeline

use insight_llm::{DecodeError, LLMError, Retryable, looks_rate_limited};
use std::time::Duration;
use thiserror::Error;

/// Pipeline errors
///
/// Only [`InsightError::TaxonomyUnavailable`] aborts a run. Every other kind
/// is contained at the source, item or symbol that produced it and surfaces
/// as a tagged record in the report.
#[derive(Debug, Error)]
pub enum InsightError {
    /// The classification taxonomy could not be loaded
    #[error("Taxonomy unavailable: {0}")]
    TaxonomyUnavailable(String),

    /// The analysis service failed after its retry budget
    #[error("Analysis service error: {0}")]
    AnalysisService(#[from] LLMError),

    /// The analysis service answered but the payload could not be decoded
    #[error("Could not parse {call} response: {source}")]
    AnalysisParse {
        call: String,
        #[source]
        source: DecodeError,
    },

    /// A mentioned symbol is not in the classification mapping
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// No price bars exist for the requested window
    #[error("Price data unavailable for {symbol}: {reason}")]
    PriceDataUnavailable { symbol: String, reason: String },

    /// A content source failed to collect
    #[error("Collection from source '{source_name}' failed: {reason}")]
    SourceCollection { source_name: String, reason: String },

    /// Market-data provider failure
    #[error("Market data error: {0}")]
    MarketData(String),

    /// An external call exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Persistent store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Prompt template failure
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl InsightError {
    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TaxonomyUnavailable(_))
    }
}

impl Retryable for InsightError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::AnalysisService(e) => e.is_retryable(),
            Self::MarketData(message) | Self::Other(message) => looks_rate_limited(message),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for InsightError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Convert anyhow::Error from collaborator implementations
impl From<anyhow::Error> for InsightError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, InsightError>;
