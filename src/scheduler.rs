//! Analysis scheduler.
//!
//! One completion request per file, at most `effective_workers()` in flight.
//! Every worker yields a tagged [`FileAnalysis`]; a single loop collects them
//! in completion order. A failing file never cancels its siblings.

use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::extract::{extract, Strategy};
use crate::model::{AnalysisResult, SourceFile};
use crate::prompt;
use crate::store::CompletionService;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

/// Result of analyzing one file.
#[derive(Debug)]
pub enum FileAnalysis {
    Analyzed(AnalyzedFile),
    Failed { path: String, error: PipelineError },
}

/// A file with its parsed analysis.
#[derive(Debug, Clone)]
pub struct AnalyzedFile {
    pub source: SourceFile,
    pub result: AnalysisResult,
    /// Extraction strategy that produced the payload
    pub strategy: Strategy,
}

/// A file dropped from the run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub kind: String,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: impl Into<String>, error: &PipelineError) -> Self {
        Self {
            path: path.into(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

/// Everything the scheduler produced for one run.
#[derive(Debug, Default)]
pub struct ScheduleReport {
    pub analyzed: Vec<AnalyzedFile>,
    pub failures: Vec<FileFailure>,
}

/// Analyze a single file: prompt, call with deadline, extract.
pub async fn analyze_file(completion: &dyn CompletionService, config: &RunConfig, file: SourceFile) -> FileAnalysis {
    let user = prompt::analyze_user(&file, config.focus.as_deref());
    tracing::debug!(file = %file.path, bytes = file.size, "requesting analysis");

    let call = completion.complete(prompt::ANALYZE_SYSTEM, &user, config.max_tokens);
    let raw = match tokio::time::timeout(config.request_timeout, call).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(err)) => {
            return FileAnalysis::Failed {
                path: file.path,
                error: PipelineError::transport(err),
            }
        }
        Err(_) => {
            return FileAnalysis::Failed {
                path: file.path,
                error: PipelineError::Timeout(config.request_timeout),
            }
        }
    };

    match extract(&raw) {
        Ok(extraction) => {
            tracing::debug!(
                file = %file.path,
                strategy = extraction.strategy.label(),
                "extracted analysis"
            );
            let result = AnalysisResult::from_payload(file.path.clone(), extraction.payload);
            FileAnalysis::Analyzed(AnalyzedFile {
                source: file,
                result,
                strategy: extraction.strategy,
            })
        }
        Err(failure) => FileAnalysis::Failed {
            path: file.path,
            error: failure.into(),
        },
    }
}

/// Analyze every file and collect the results.
///
/// Sequential mode keeps input order; otherwise results arrive in completion order.
pub async fn analyze_all(
    completion: &dyn CompletionService,
    config: &RunConfig,
    files: Vec<SourceFile>,
) -> ScheduleReport {
    let workers = config.effective_workers();
    tracing::info!(files = files.len(), workers, "analyzing files");

    let mut results = if config.sequential {
        stream::iter(files)
            .then(|file| analyze_file(completion, config, file))
            .boxed()
    } else {
        stream::iter(files)
            .map(|file| analyze_file(completion, config, file))
            .buffer_unordered(workers)
            .boxed()
    };

    let mut report = ScheduleReport::default();
    while let Some(outcome) = results.next().await {
        match outcome {
            FileAnalysis::Analyzed(analyzed) => {
                tracing::info!(
                    file = %analyzed.source.path,
                    changes = analyzed.result.suggested_changes.len(),
                    "analysis complete"
                );
                report.analyzed.push(analyzed);
            }
            FileAnalysis::Failed { path, error } => {
                tracing::warn!(file = %path, kind = error.kind(), error = %error, "analysis failed; skipping file");
                report.failures.push(FileFailure::new(path, &error));
            }
        }
    }
    report
}
