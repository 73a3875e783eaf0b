//! Exact-match patch application.
//!
//! Directives are chained: each one searches the working copy produced by the
//! directives before it, not the pristine original. A directive whose
//! `original_snippet` is absent is skipped; a present one replaces every
//! non-overlapping occurrence. Everything here is pure string work.

use crate::model::{AnalysisResult, EditDirective, FileChangeSet, SourceFile};

/// Result of running a directive list over one file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub content: String,
    /// Indices (into the input list) of directives that matched, in order
    pub applied: Vec<usize>,
}

impl PatchOutcome {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// True when at least one directive fired and the content actually moved.
    pub fn is_change(&self, original: &str) -> bool {
        !self.applied.is_empty() && self.content != original
    }
}

/// Apply `directives` in order and return the new content with the applied count.
pub fn apply(original: &str, directives: &[EditDirective]) -> (String, usize) {
    let outcome = apply_directives(original, directives);
    let count = outcome.applied_count();
    (outcome.content, count)
}

pub fn apply_directives(original: &str, directives: &[EditDirective]) -> PatchOutcome {
    let mut content = original.to_string();
    let mut applied = Vec::new();

    for (idx, directive) in directives.iter().enumerate() {
        // An empty needle matches everywhere; never treat it as an edit.
        if directive.original_snippet.is_empty() {
            continue;
        }
        if !content.contains(&directive.original_snippet) {
            continue;
        }
        content = content.replace(&directive.original_snippet, &directive.improved_snippet);
        applied.push(idx);
    }

    PatchOutcome { content, applied }
}

/// Build the change set for one analyzed file, or `None` when nothing applies.
pub fn build_change_set(source: &SourceFile, analysis: AnalysisResult) -> Option<FileChangeSet> {
    let outcome = apply_directives(&source.content, &analysis.suggested_changes);
    if !outcome.is_change(&source.content) {
        tracing::debug!(
            file = %source.path,
            directives = analysis.suggested_changes.len(),
            matched = outcome.applied_count(),
            "no applicable directive"
        );
        return None;
    }

    let applied_directives: Vec<EditDirective> = outcome
        .applied
        .iter()
        .filter_map(|&idx| analysis.suggested_changes.get(idx).cloned())
        .collect();

    Some(FileChangeSet {
        file_path: source.path.clone(),
        original_content: source.content.clone(),
        directives_applied: applied_directives.len(),
        new_content: outcome.content,
        applied_directives,
        base_revision: source.revision.clone(),
        analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Analysis, AnalysisPayload};
    use pretty_assertions::assert_eq;

    fn directive(original: &str, improved: &str) -> EditDirective {
        EditDirective::new(original, improved, "test")
    }

    #[test]
    fn test_chained_directives_rename_and_simplify() {
        let content = "def f(x, y):\n    z = x * y\n    return z";
        let directives = vec![
            directive("def f(x, y):", "def multiply(x, y):"),
            directive(
                "    z = x * y\n    return z",
                "    \"\"\"Multiply two numbers.\"\"\"\n    return x * y",
            ),
        ];
        let (new_content, applied) = apply(content, &directives);
        assert_eq!(applied, 2);
        assert!(new_content.contains("def multiply(x, y):"));
        assert!(!new_content.contains("z = x * y"));
    }

    #[test]
    fn test_missing_snippet_is_skipped_without_counting() {
        let content = "fn main() {}\n";
        let (new_content, applied) = apply(content, &[directive("fn helper()", "fn aid()")]);
        assert_eq!(applied, 0);
        assert_eq!(new_content, content);
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let content = "x = old()\ny = old()\n";
        let (new_content, applied) = apply(content, &[directive("old()", "new()")]);
        assert_eq!(applied, 1);
        assert_eq!(new_content, "x = new()\ny = new()\n");
    }

    #[test]
    fn test_later_directive_sees_earlier_output() {
        let content = "a";
        let directives = vec![directive("a", "b"), directive("b", "c")];
        let (new_content, applied) = apply(content, &directives);
        assert_eq!(new_content, "c");
        assert_eq!(applied, 2);
    }

    #[test]
    fn test_identical_snippets_apply_in_order() {
        // The first directive consumes the snippet; the second no longer matches.
        let content = "value = 1";
        let directives = vec![directive("value = 1", "value = 2"), directive("value = 1", "value = 3")];
        let outcome = apply_directives(content, &directives);
        assert_eq!(outcome.content, "value = 2");
        assert_eq!(outcome.applied, vec![0]);
    }

    #[test]
    fn test_reapplying_to_own_output_is_idempotent() {
        let content = "def f(x, y):\n    z = x * y\n    return z";
        let directives = vec![
            directive("def f(x, y):", "def multiply(x, y):"),
            directive("    z = x * y\n", ""),
        ];
        let (once, _) = apply(content, &directives);
        assert!(directives.iter().all(|d| !once.contains(&d.original_snippet)));
        let (twice, applied_again) = apply(&once, &directives);
        assert_eq!(twice, once);
        assert_eq!(applied_again, 0);
    }

    #[test]
    fn test_empty_snippet_never_applies() {
        let (new_content, applied) = apply("abc", &[directive("", "X")]);
        assert_eq!(new_content, "abc");
        assert_eq!(applied, 0);
    }

    #[test]
    fn test_no_op_replacement_produces_no_change_set() {
        let source = SourceFile::new("lib.py", "def add(a, b):\n    return a + b", "sha1");
        let analysis = AnalysisResult::from_payload(
            "lib.py",
            AnalysisPayload {
                analysis: Analysis::default(),
                suggested_changes: vec![directive("return a + b", "return a + b")],
                summary: String::new(),
            },
        );
        assert!(build_change_set(&source, analysis).is_none());
    }

    #[test]
    fn test_empty_change_list_produces_no_change_set() {
        let source = SourceFile::new("README.md", "# Title\n", "sha1");
        let analysis = AnalysisResult::from_payload("README.md", AnalysisPayload::default());
        assert!(build_change_set(&source, analysis).is_none());
    }

    #[test]
    fn test_change_set_keeps_only_applied_directives() {
        let source = SourceFile::new("a.js", "function calc(a, b) {}", "sha-js");
        let analysis = AnalysisResult::from_payload(
            "a.js",
            AnalysisPayload {
                suggested_changes: vec![
                    directive("let result = 0;", "const result = 0;"),
                    directive("function calc(a, b)", "function multiply(a, b)"),
                ],
                ..AnalysisPayload::default()
            },
        );
        let change_set = build_change_set(&source, analysis).unwrap();
        assert_eq!(change_set.directives_applied, 1);
        assert_eq!(change_set.applied_directives[0].improved_snippet, "function multiply(a, b)");
        assert_eq!(change_set.base_revision, "sha-js");
        assert_eq!(change_set.original_content, "function calc(a, b) {}");
    }
}
