//! Data model shared by every pipeline stage.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Language hint derived from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Go,
    Rust,
    Html,
    Css,
    Markdown,
    Yaml,
    Other,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "py" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "java" => Language::Java,
            "go" => Language::Go,
            "rs" => Language::Rust,
            "html" | "htm" => Language::Html,
            "css" => Language::Css,
            "md" => Language::Markdown,
            "yml" | "yaml" => Language::Yaml,
            _ => Language::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Java => "Java",
            Language::Go => "Go",
            Language::Rust => "Rust",
            Language::Html => "HTML",
            Language::Css => "CSS",
            Language::Markdown => "Markdown",
            Language::Yaml => "YAML",
            Language::Other => "text",
        }
    }
}

/// Immutable snapshot of a repository file taken at analysis time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    pub size: u64,
    pub language: Language,
    /// Store revision token (blob sha) of the snapshot
    pub revision: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>, revision: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        Self {
            language: Language::from_path(&path),
            size: content.len() as u64,
            path,
            content,
            revision: revision.into(),
        }
    }
}

/// Free-text review sections returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Analysis {
    pub code_quality: String,
    pub best_practices: String,
    pub potential_bugs: String,
    pub performance: String,
    /// Some models nest the change list inside `analysis`; lifted by `AnalysisPayload::normalize`.
    #[serde(rename = "suggested_changes", skip_serializing)]
    pub(crate) nested_changes: Vec<EditDirective>,
    #[serde(rename = "summary", skip_serializing)]
    pub(crate) nested_summary: Option<String>,
}

/// A single proposed text substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDirective {
    #[serde(default, alias = "original_code")]
    pub original_snippet: String,
    #[serde(default, alias = "improved_code")]
    pub improved_snippet: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, alias = "test_code", skip_serializing_if = "Option::is_none")]
    pub test_snippet: Option<String>,
}

impl EditDirective {
    pub fn new(
        original: impl Into<String>,
        improved: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            original_snippet: original.into(),
            improved_snippet: improved.into(),
            explanation: explanation.into(),
            test_snippet: None,
        }
    }

    pub fn with_test(mut self, test: impl Into<String>) -> Self {
        self.test_snippet = Some(test.into());
        self
    }

    /// Test body, if the model attached a non-blank one.
    pub fn test_body(&self) -> Option<&str> {
        self.test_snippet
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Structured body of a model response, before it is tied to a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPayload {
    pub analysis: Analysis,
    pub suggested_changes: Vec<EditDirective>,
    pub summary: String,
}

impl AnalysisPayload {
    /// Lift a change list or summary the model nested under `analysis`.
    pub fn normalize(mut self) -> Self {
        if self.suggested_changes.is_empty() {
            self.suggested_changes = std::mem::take(&mut self.analysis.nested_changes);
        } else {
            self.analysis.nested_changes.clear();
        }
        if self.summary.trim().is_empty() {
            if let Some(summary) = self.analysis.nested_summary.take() {
                self.summary = summary;
            }
        }
        self.analysis.nested_summary = None;
        self
    }
}

/// Analysis of one file, produced once per file per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub file_path: String,
    pub analysis: Analysis,
    pub suggested_changes: Vec<EditDirective>,
    pub summary: String,
}

impl AnalysisResult {
    pub fn from_payload(file_path: impl Into<String>, payload: AnalysisPayload) -> Self {
        let payload = payload.normalize();
        Self {
            file_path: file_path.into(),
            analysis: payload.analysis,
            suggested_changes: payload.suggested_changes,
            summary: payload.summary,
        }
    }

    /// Summary with the fallback used in commit messages and PR bodies.
    pub fn summary_or_default(&self) -> &str {
        let summary = self.summary.trim();
        if summary.is_empty() {
            "Code improvements"
        } else {
            summary
        }
    }
}

/// Net result of applying all directives for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeSet {
    pub file_path: String,
    pub original_content: String,
    pub new_content: String,
    pub directives_applied: usize,
    /// Directives that matched, in application order
    pub applied_directives: Vec<EditDirective>,
    /// Revision token of the analyzed snapshot
    pub base_revision: String,
    pub analysis: AnalysisResult,
}

/// A test file to write alongside a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestArtifact {
    pub test_file_path: String,
    pub content: String,
    pub pre_existing: bool,
    /// Revision token required to update a pre-existing test file in place
    pub base_sha: Option<String>,
}
