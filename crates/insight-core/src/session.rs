//! Run-scoped analysis session
//!
//! An [`AnalysisSession`] is created per pipeline run and handed to every
//! component. It carries the run id and keeps a ledger of analysis-service
//! calls, phase timings and contained errors. Each entry is also emitted as a
//! structured `tracing` event so the ledger and the log stream agree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Which prompt a service call carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    MarketContext,
    CompanyAnalysis,
    StockConsolidation,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MarketContext => "market_context",
            Self::CompanyAnalysis => "company_analysis",
            Self::StockConsolidation => "stock_consolidation",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCallRecord {
    pub call_id: Uuid,
    pub kind: CallKind,
    /// Symbol or other subject of the call, when there is one
    pub subject: Option<String>,
    pub urls: Vec<String>,
    pub prompt_chars: usize,
    pub estimated_prompt_tokens: usize,
    pub success: bool,
    pub response_chars: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub summary: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub context: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Rollup produced when the session is finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub run_id: Uuid,
    pub total_calls: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub errors: usize,
    pub phases_completed: usize,
    pub phases_failed: usize,
    pub duration_ms: u64,
    pub overall_success: bool,
}

/// Handle returned by [`AnalysisSession::begin_phase`]
#[derive(Debug)]
pub struct PhaseTimer {
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Handle returned by [`AnalysisSession::begin_call`]
#[derive(Debug)]
pub struct CallTimer {
    kind: CallKind,
    subject: Option<String>,
    urls: Vec<String>,
    prompt_chars: usize,
    estimated_prompt_tokens: usize,
    started: Instant,
}

#[derive(Debug, Default)]
struct Ledger {
    calls: Vec<ServiceCallRecord>,
    phases: Vec<PhaseRecord>,
    errors: Vec<SessionError>,
}

#[derive(Debug)]
pub struct AnalysisSession {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    ledger: Mutex<Ledger>,
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    pub fn with_run_id(run_id: Uuid) -> Self {
        info!(run_id = %run_id, "Analysis session started");
        Self {
            run_id,
            started_at: Utc::now(),
            started: Instant::now(),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin_phase(&self, name: impl Into<String>) -> PhaseTimer {
        let name = name.into();
        info!(run_id = %self.run_id, phase = %name, "Phase started");
        PhaseTimer {
            name,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Close a phase with its outcome and a result-shape summary
    pub fn end_phase(&self, timer: PhaseTimer, success: bool, summary: serde_json::Value) {
        let duration_ms = elapsed_ms(timer.started);
        if success {
            info!(
                run_id = %self.run_id,
                phase = %timer.name,
                duration_ms,
                summary = %summary,
                "Phase completed"
            );
        } else {
            warn!(
                run_id = %self.run_id,
                phase = %timer.name,
                duration_ms,
                summary = %summary,
                "Phase failed"
            );
        }
        self.ledger().phases.push(PhaseRecord {
            name: timer.name,
            started_at: timer.started_at,
            duration_ms,
            success,
            summary,
        });
    }

    pub fn begin_call(
        &self,
        kind: CallKind,
        subject: Option<&str>,
        urls: Vec<String>,
        prompt: &str,
    ) -> CallTimer {
        CallTimer {
            kind,
            subject: subject.map(str::to_owned),
            urls,
            prompt_chars: prompt.chars().count(),
            estimated_prompt_tokens: estimate_tokens(prompt),
            started: Instant::now(),
        }
    }

    /// Record the outcome of a service call: the response text or the error
    pub fn end_call(&self, timer: CallTimer, outcome: Result<&str, &dyn fmt::Display>) {
        let duration_ms = elapsed_ms(timer.started);
        let (success, response_chars, error) = match outcome {
            Ok(text) => (true, text.chars().count(), None),
            Err(e) => (false, 0, Some(e.to_string())),
        };

        let record = ServiceCallRecord {
            call_id: Uuid::new_v4(),
            kind: timer.kind,
            subject: timer.subject,
            urls: timer.urls,
            prompt_chars: timer.prompt_chars,
            estimated_prompt_tokens: timer.estimated_prompt_tokens,
            success,
            response_chars,
            error,
            duration_ms,
            at: Utc::now(),
        };

        if record.success {
            info!(
                run_id = %self.run_id,
                call_id = %record.call_id,
                kind = %record.kind,
                subject = record.subject.as_deref().unwrap_or("-"),
                prompt_chars = record.prompt_chars,
                estimated_tokens = record.estimated_prompt_tokens,
                response_chars = record.response_chars,
                duration_ms,
                "Analysis call succeeded"
            );
        } else {
            warn!(
                run_id = %self.run_id,
                call_id = %record.call_id,
                kind = %record.kind,
                subject = record.subject.as_deref().unwrap_or("-"),
                error = record.error.as_deref().unwrap_or("-"),
                duration_ms,
                "Analysis call failed"
            );
        }
        self.ledger().calls.push(record);
    }

    pub fn record_error(&self, context: impl Into<String>, message: impl fmt::Display) {
        let context = context.into();
        let message = message.to_string();
        error!(run_id = %self.run_id, context = %context, "{message}");
        self.ledger().errors.push(SessionError {
            context,
            message,
            at: Utc::now(),
        });
    }

    pub fn calls(&self) -> Vec<ServiceCallRecord> {
        self.ledger().calls.clone()
    }

    pub fn phases(&self) -> Vec<PhaseRecord> {
        self.ledger().phases.clone()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        self.ledger().errors.clone()
    }

    /// Number of service calls of one kind recorded so far
    pub fn call_count(&self, kind: CallKind) -> usize {
        self.ledger().calls.iter().filter(|c| c.kind == kind).count()
    }

    pub fn finalize(&self) -> SessionSummary {
        let ledger = self.ledger();
        let successful_calls = ledger.calls.iter().filter(|c| c.success).count();
        let phases_completed = ledger.phases.iter().filter(|p| p.success).count();
        let phases_failed = ledger.phases.len() - phases_completed;

        let summary = SessionSummary {
            run_id: self.run_id,
            total_calls: ledger.calls.len(),
            successful_calls,
            failed_calls: ledger.calls.len() - successful_calls,
            errors: ledger.errors.len(),
            phases_completed,
            phases_failed,
            duration_ms: elapsed_ms(self.started),
            overall_success: phases_failed == 0 && ledger.errors.is_empty(),
        };
        drop(ledger);

        info!(
            run_id = %self.run_id,
            total_calls = summary.total_calls,
            failed_calls = summary.failed_calls,
            errors = summary.errors,
            phases_completed = summary.phases_completed,
            phases_failed = summary.phases_failed,
            duration_ms = summary.duration_ms,
            "Analysis session finalized"
        );
        summary
    }
}

/// Rough prompt-size estimate: 1.3 tokens per whitespace-separated word
pub fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3).round() as usize
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
