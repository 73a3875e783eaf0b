//! Changelog maintenance.
//!
//! Every applied directive becomes one bullet, bucketed by keywords in its
//! explanation. The dated block is spliced in right after `## [Unreleased]`;
//! everything after the insertion point is left untouched.

use crate::model::FileChangeSet;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const UNRELEASED_HEADING: &str = "## [Unreleased]";
const NEW_DOCUMENT_HEADER: &str =
    "# Changelog\n\nAll notable changes to this project will be documented in this file.\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Added,
    Changed,
    Fixed,
}

impl Category {
    pub fn heading(&self) -> &'static str {
        match self {
            Category::Added => "### Added",
            Category::Changed => "### Changed",
            Category::Fixed => "### Fixed",
        }
    }
}

fn fixed_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(fix|bug|error|issue|crash|resolv|correct|prevent|handle)").ok())
        .as_ref()
}

fn added_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(add|new|introduc|implement|creat|support)").ok())
        .as_ref()
}

/// Bucket for one directive explanation. Fixes win over additions.
pub fn categorize(explanation: &str) -> Category {
    if fixed_regex().is_some_and(|re| re.is_match(explanation)) {
        Category::Fixed
    } else if added_regex().is_some_and(|re| re.is_match(explanation)) {
        Category::Added
    } else {
        Category::Changed
    }
}

/// One dated block of changelog bullets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub date: NaiveDate,
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub fixed: Vec<String>,
}

impl ChangelogEntry {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            added: Vec::new(),
            changed: Vec::new(),
            fixed: Vec::new(),
        }
    }

    /// Build the entry from every applied directive of the published files.
    pub fn from_change_sets<'a>(change_sets: impl IntoIterator<Item = &'a FileChangeSet>, date: NaiveDate) -> Self {
        let mut entry = Self::new(date);
        for change_set in change_sets {
            for directive in &change_set.applied_directives {
                entry.push(&change_set.file_path, &directive.explanation);
            }
        }
        entry
    }

    pub fn push(&mut self, file_path: &str, explanation: &str) {
        let line = explanation.lines().next().unwrap_or("").trim();
        let line = if line.is_empty() { "Code improvements" } else { line };
        let bullet = format!("- {}: {}", file_path, line);
        match categorize(explanation) {
            Category::Added => self.added.push(bullet),
            Category::Changed => self.changed.push(bullet),
            Category::Fixed => self.fixed.push(bullet),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.fixed.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = format!("## [{}]\n", self.date.format("%Y-%m-%d"));
        for (category, bullets) in [
            (Category::Added, &self.added),
            (Category::Changed, &self.changed),
            (Category::Fixed, &self.fixed),
        ] {
            if bullets.is_empty() {
                continue;
            }
            out.push('\n');
            out.push_str(category.heading());
            out.push('\n');
            for bullet in bullets {
                out.push_str(bullet);
                out.push('\n');
            }
        }
        out
    }
}

/// Splice `entry` into `existing`, or start a new document when there is none.
pub fn insert(existing: Option<&str>, entry: &ChangelogEntry) -> String {
    let block = entry.render();
    let Some(existing) = existing else {
        return format!("{}{}\n\n{}", NEW_DOCUMENT_HEADER, UNRELEASED_HEADING, block);
    };

    if let Some(split) = unreleased_split(existing) {
        let (head, tail) = existing.split_at(split);
        let mut out = String::with_capacity(existing.len() + block.len() + 2);
        out.push_str(head);
        if !head.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&block);
        if !tail.is_empty() && !tail.starts_with('\n') {
            out.push('\n');
        }
        out.push_str(tail);
        return out;
    }

    // No Unreleased section: add one under the title, or at the top.
    let section = format!("{}\n\n{}\n", UNRELEASED_HEADING, block);
    match title_split(existing) {
        Some(split) => {
            let (head, tail) = existing.split_at(split);
            let mut out = head.to_string();
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
            out.push_str(&section);
            out.push_str(tail.trim_start_matches('\n'));
            out
        }
        None => format!("{}{}{}", NEW_DOCUMENT_HEADER, section, existing),
    }
}

/// Byte offset just past the `## [Unreleased]` heading line.
fn unreleased_split(text: &str) -> Option<usize> {
    line_end_after(text, |line| {
        line.trim_end().eq_ignore_ascii_case(UNRELEASED_HEADING)
    })
}

fn title_split(text: &str) -> Option<usize> {
    line_end_after(text, |line| line.starts_with("# "))
}

fn line_end_after(text: &str, matches: impl Fn(&str) -> bool) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let next = offset + line.len();
        if matches(line.trim_end_matches(['\n', '\r'])) {
            return Some(next);
        }
        offset = next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn entry() -> ChangelogEntry {
        let mut entry = ChangelogEntry::new(date());
        entry.push("calc.py", "Added docstring and simplified the function");
        entry.push("app.js", "Fix off-by-one error in loop bound");
        entry.push("util.py", "Improved function name");
        entry
    }

    #[test]
    fn test_categorize_keywords() {
        assert_eq!(categorize("Added docstring"), Category::Added);
        assert_eq!(categorize("Introduce a cache for lookups"), Category::Added);
        assert_eq!(categorize("Fix null dereference"), Category::Fixed);
        assert_eq!(categorize("Add a guard to fix the crash"), Category::Fixed);
        assert_eq!(categorize("Improved function name"), Category::Changed);
        assert_eq!(categorize("Renamed the padding helper"), Category::Changed);
    }

    #[test]
    fn test_render_skips_empty_buckets() {
        let mut entry = ChangelogEntry::new(date());
        entry.push("a.py", "Rename variable");
        assert_eq!(entry.render(), "## [2025-03-14]\n\n### Changed\n- a.py: Rename variable\n");
    }

    #[test]
    fn test_insert_preserves_tail_byte_for_byte() {
        let tail = "\n## [2025-01-02]\n\n### Fixed\n- old.py: Fix\tsomething  \r\n\n  trailing  ";
        let existing = format!("# Changelog\n\nIntro text.\n\n## [Unreleased]\n{}", tail);
        let updated = insert(Some(&existing), &entry());
        assert!(updated.ends_with(tail));
        assert!(updated.starts_with("# Changelog\n\nIntro text.\n\n## [Unreleased]\n\n## [2025-03-14]\n"));
        let new_idx = updated.find("## [2025-03-14]").unwrap();
        let old_idx = updated.find("## [2025-01-02]").unwrap();
        assert!(new_idx < old_idx);
    }

    #[test]
    fn test_insert_into_empty_unreleased_subsections() {
        let tail = "\n### Added\n\n### Changed\n\n### Fixed\n\n";
        let existing = format!("## [Unreleased]\n{}", tail);
        let updated = insert(Some(&existing), &entry());
        assert_eq!(updated, format!("## [Unreleased]\n\n{}{}", entry().render(), tail));
    }

    #[test]
    fn test_insert_when_unreleased_is_last_line() {
        let updated = insert(Some("# Changelog\n\n## [Unreleased]"), &entry());
        assert!(updated.starts_with("# Changelog\n\n## [Unreleased]\n\n## [2025-03-14]\n"));
        assert!(updated.contains("### Added\n- calc.py: Added docstring and simplified the function\n"));
        assert!(updated.contains("### Fixed\n- app.js: Fix off-by-one error in loop bound\n"));
    }

    #[test]
    fn test_new_document() {
        let created = insert(None, &entry());
        assert!(created.starts_with("# Changelog\n"));
        assert!(created.contains("## [Unreleased]\n\n## [2025-03-14]\n"));
        assert!(created.contains("### Changed\n- util.py: Improved function name\n"));
    }

    #[test]
    fn test_document_without_unreleased_gets_section_under_title() {
        let existing = "# Project History\n\n## [1.0.0]\n- first\n";
        let updated = insert(Some(existing), &entry());
        assert!(updated.starts_with("# Project History\n\n## [Unreleased]\n\n## [2025-03-14]\n"));
        assert!(updated.ends_with("## [1.0.0]\n- first\n"));
    }

    #[test]
    fn test_entry_from_change_sets_uses_applied_directives() {
        use crate::model::{AnalysisPayload, AnalysisResult, EditDirective};
        let change_set = FileChangeSet {
            file_path: "calc.py".to_string(),
            original_content: "a".to_string(),
            new_content: "b".to_string(),
            directives_applied: 1,
            applied_directives: vec![EditDirective::new("a", "b", "Fix rounding bug")],
            base_revision: "sha".to_string(),
            analysis: AnalysisResult::from_payload("calc.py", AnalysisPayload::default()),
        };
        let entry = ChangelogEntry::from_change_sets([&change_set], date());
        assert_eq!(entry.fixed, vec!["- calc.py: Fix rounding bug".to_string()]);
        assert!(entry.added.is_empty());
    }
}
