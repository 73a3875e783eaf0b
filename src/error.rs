//! Failure taxonomy for the improvement pipeline.
//!
//! Every variant is recoverable at the file (or batch) boundary: the pipeline
//! turns them into omissions from the result set, never into an aborted run.

use std::time::Duration;

/// Errors raised by a single unit of pipeline work.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network/API failure talking to the repository store or completion service
    #[error("transport failure: {0}")]
    Transport(String),

    /// The per-call deadline elapsed before the collaborator answered
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The model response could not be turned into directives
    #[error(transparent)]
    Parse(#[from] ParseFailure),

    /// Write, commit or pull-request creation failed
    #[error("publication failed for {path}: {reason}")]
    Publication { path: String, reason: String },

    /// Sandbox tests exited non-zero
    #[error("tests failed: {0}")]
    TestFailure(String),

    /// Invalid run configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Wrap an adapter error (usually an `anyhow::Error` chain) as a transport failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(format!("{:#}", err))
    }

    /// Short machine-friendly label used in logs and the run report.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Transport(_) => "transport",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Parse(_) => "parse",
            PipelineError::Publication { .. } => "publication",
            PipelineError::TestFailure(_) => "test",
            PipelineError::Config(_) => "config",
        }
    }
}

/// Every extraction strategy was tried and none produced a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no parsable analysis in model response ({attempts} strategies tried): {preview}")]
pub struct ParseFailure {
    pub attempts: usize,
    /// Leading slice of the raw response, for the log line
    pub preview: String,
}
