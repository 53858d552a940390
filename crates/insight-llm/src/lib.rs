//! Content-analysis service boundary for the insight pipeline
//!
//! This crate wraps generative text-analysis backends behind a narrow
//! `prompt -> text` contract. It includes:
//!
//! - Message and completion types for provider communication
//! - The [`LLMProvider`] trait and an OpenAI-compatible implementation
//! - A [`RetryPolicy`] applied uniformly at the external-call boundary
//! - [`AnalysisService`], the contract the pipeline consumes, with pacing and timeouts
//! - Structured decoding of JSON embedded in free-form responses

pub mod completion;
pub mod decode;
pub mod error;
pub mod messages;
pub mod provider;
pub mod retry;
pub mod service;

// Re-export main types
pub use completion::{CompletionRequest, CompletionResponse, StopReason, TokenUsage};
pub use decode::{DecodeError, DecodeStage, Decoded, decode_json, extract_json_candidate};
pub use error::{LLMError, Result, looks_rate_limited};
pub use messages::{Message, Role};
pub use provider::LLMProvider;
pub use retry::{RetryPolicy, Retryable};
pub use service::{AnalysisRequest, AnalysisService, LlmAnalysisService};

// Provider implementations (feature-gated)
#[cfg(feature = "openai")]
pub mod providers;
