//! Error taxonomy for the pipeline.
//!
//! `CartoError` covers only the two fatal cases from the design (preflight
//! storage-health failure, unresolvable input): everything else — a failed
//! LLM call, a chunk that failed to parse, a skipped history extraction — is
//! "skippable" and recorded as an [`IndexError`] in `PipelineResult::errors`
//! instead of surfacing as a typed error up the call stack.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CartoError {
    #[error("storage service unreachable at preflight: {0}")]
    Preflight(String),

    #[error("root path does not resolve: {0}")]
    UnresolvedPath(String),

    #[error("requested modules not found: {requested}; available modules: {available}")]
    ModuleFilterEmpty { requested: String, available: String },

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A single non-fatal failure recorded during a phase. Never aborts the
/// pipeline; accumulated in `PipelineResult::errors`.
#[derive(Debug, Clone)]
pub struct IndexError {
    pub phase: &'static str,
    pub context: String,
    pub message: String,
}

impl IndexError {
    pub fn new(phase: &'static str, context: impl Into<String>, message: impl Into<String>) -> Self {
        IndexError {
            phase,
            context: context.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.phase, self.context, self.message)
    }
}

/// Summarizes a partial batch: how many items in a fan-out succeeded vs.
/// were skipped due to a recoverable failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.attempted.saturating_sub(self.skipped)
    }

    pub fn is_partial(&self) -> bool {
        self.skipped > 0
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} succeeded ({} skipped)",
            self.succeeded(),
            self.attempted,
            self.skipped
        )
    }
}
