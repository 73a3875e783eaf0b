//! End-to-end run: discover → analyze → apply → (preview | publish).

use crate::config::RunConfig;
use crate::model::{FileChangeSet, SourceFile};
use crate::patch;
use crate::publish::{Coordinator, PublicationReport};
use crate::sandbox::TestRunner;
use crate::scheduler::{self, FileFailure};
use crate::store::{CompletionService, EntryKind, RepoStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A file left out of the run before or after analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedFile {
    pub path: String,
    pub reason: String,
}

/// Dry-run preview for one change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub diff: String,
}

/// Files selected for analysis plus the ones skipped on the way.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<SourceFile>,
    pub excluded: Vec<ExcludedFile>,
}

/// Aggregate of one run, written to `--output-file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub repository: String,
    pub base_branch: String,
    pub dry_run: bool,
    pub files_discovered: usize,
    pub change_sets: Vec<FileChangeSet>,
    pub failures: Vec<FileFailure>,
    pub excluded: Vec<ExcludedFile>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub diffs: Vec<FileDiff>,
    pub publication: PublicationReport,
    pub success: bool,
}

impl RunOutcome {
    /// One-line human summary for the end of the run.
    pub fn headline(&self) -> String {
        if self.dry_run {
            return format!(
                "Dry run: {} of {} files would change",
                self.change_sets.len(),
                self.files_discovered
            );
        }
        let published = self.publication.published_count();
        match (self.success, self.publication.pull_requests.as_slice()) {
            (true, []) => format!("Committed {} files to {}", published, self.base_branch),
            (true, prs) => format!("Published {} files in {} pull request(s)", published, prs.len()),
            (false, _) => format!(
                "Run failed: {}",
                self.publication
                    .failure_reason
                    .as_deref()
                    .unwrap_or("no files were published")
            ),
        }
    }
}

/// Walk the base branch and snapshot every eligible file.
pub async fn discover(store: &dyn RepoStore, config: &RunConfig) -> Result<Discovery> {
    let git_ref = config.base_branch.as_str();
    let filter = &config.filter;
    let mut discovery = Discovery::default();
    let mut pending = vec![String::new()];
    let mut root = true;

    while let Some(dir) = pending.pop() {
        let entries = match store.list_tree(&dir, git_ref).await {
            Ok(entries) => entries,
            Err(err) if root => {
                return Err(err).with_context(|| format!("Failed to list {} on {}", config.repository, git_ref))
            }
            Err(err) => {
                tracing::warn!(dir = %dir, error = %format!("{:#}", err), "failed to list directory; skipping");
                continue;
            }
        };
        root = false;

        let mut subdirs = Vec::new();
        for entry in entries {
            if filter.is_ignored(&entry.path) {
                continue;
            }
            match entry.kind {
                EntryKind::Dir => subdirs.push(entry.path),
                EntryKind::File if !filter.has_allowed_extension(&entry.path) => {}
                EntryKind::File if !filter.within_size(entry.size) => {
                    tracing::info!(file = %entry.path, size = entry.size, "skipping large file");
                    discovery.excluded.push(ExcludedFile {
                        path: entry.path,
                        reason: format!("larger than {} bytes", filter.max_file_size),
                    });
                }
                EntryKind::File => match store.read_file(&entry.path, git_ref).await {
                    Ok(Some(file)) => {
                        discovery
                            .files
                            .push(SourceFile::new(file.path, file.content, file.revision));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(file = %entry.path, error = %format!("{:#}", err), "failed to read file; skipping");
                        discovery.excluded.push(ExcludedFile {
                            path: entry.path,
                            reason: format!("read failed: {:#}", err),
                        });
                    }
                },
            }
        }
        // Depth-first, in listing order.
        pending.extend(subdirs.into_iter().rev());
    }

    tracing::info!(
        files = discovery.files.len(),
        skipped = discovery.excluded.len(),
        "discovered files"
    );
    Ok(discovery)
}

/// Unified diff of a change set, as shown in dry-run previews.
pub fn render_diff(change_set: &FileChangeSet) -> String {
    similar::TextDiff::from_lines(&change_set.original_content, &change_set.new_content)
        .unified_diff()
        .header(
            &format!("a/{}", change_set.file_path),
            &format!("b/{}", change_set.file_path),
        )
        .to_string()
}

/// Wires the collaborators for one run.
pub struct Pipeline<'a> {
    store: &'a dyn RepoStore,
    completion: &'a dyn CompletionService,
    runner: Option<&'a dyn TestRunner>,
    config: &'a RunConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn RepoStore, completion: &'a dyn CompletionService, config: &'a RunConfig) -> Self {
        Self {
            store,
            completion,
            runner: None,
            config,
        }
    }

    pub fn with_runner(mut self, runner: &'a dyn TestRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Run the whole pipeline. Only discovery of the root listing can fail;
    /// everything after it degrades into per-file omissions.
    pub async fn run(&self) -> Result<RunOutcome> {
        let config = self.config;
        let discovery = discover(self.store, config).await?;
        let files_discovered = discovery.files.len();
        let mut excluded = discovery.excluded;

        let order: HashMap<String, usize> = discovery
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.clone(), i))
            .collect();

        let report = scheduler::analyze_all(self.completion, config, discovery.files).await;

        let mut change_sets = Vec::new();
        for analyzed in report.analyzed {
            match patch::build_change_set(&analyzed.source, analyzed.result) {
                Some(change_set) => change_sets.push(change_set),
                None => excluded.push(ExcludedFile {
                    path: analyzed.source.path,
                    reason: "no applicable changes".to_string(),
                }),
            }
        }
        // Publish in discovery order regardless of completion order.
        change_sets.sort_by_key(|cs| order.get(&cs.file_path).copied().unwrap_or(usize::MAX));
        tracing::info!(
            changed = change_sets.len(),
            failed = report.failures.len(),
            "analysis finished"
        );

        let diffs = if config.dry_run {
            change_sets
                .iter()
                .map(|cs| FileDiff {
                    path: cs.file_path.clone(),
                    diff: render_diff(cs),
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut coordinator = Coordinator::new(self.store, config);
        if let Some(runner) = self.runner {
            coordinator = coordinator.with_runner(runner);
        }
        let publication = coordinator.publish(&change_sets).await;

        let success = if config.dry_run {
            !change_sets.is_empty()
        } else {
            publication.success
        };

        Ok(RunOutcome {
            repository: config.repository.clone(),
            base_branch: config.base_branch.clone(),
            dry_run: config.dry_run,
            files_discovered,
            change_sets,
            failures: report.failures,
            excluded,
            diffs,
            publication,
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{model_answer, MemoryStore, Reply, ScriptedCompletion};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn config() -> RunConfig {
        let mut config = RunConfig::new("octo/widgets");
        config.started_at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        config.max_workers = 4;
        config
    }

    #[tokio::test]
    async fn test_discovery_applies_filter() {
        let big = "x".repeat(200 * 1024);
        let store = MemoryStore::new("main")
            .with_file("main", "app.py", "print('hi')\n")
            .with_file("main", "src/util.js", "let a = 1;\n")
            .with_file("main", "src/big.js", &big)
            .with_file("main", "node_modules/dep/index.js", "x")
            .with_file("main", "build/out.js", "x")
            .with_file("main", "image.png", "x")
            .with_file("main", "docs/builder.md", "# b\n");

        let discovery = discover(&store, &config()).await.unwrap();
        let paths: Vec<_> = discovery.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app.py", "docs/builder.md", "src/util.js"]);
        assert_eq!(discovery.excluded.len(), 1);
        assert_eq!(discovery.excluded[0].path, "src/big.js");
    }

    #[tokio::test]
    async fn test_missing_base_branch_is_an_error() {
        let store = MemoryStore::new("trunk");
        assert!(discover(&store, &config()).await.is_err());
    }

    #[tokio::test]
    async fn test_dry_run_previews_without_writing() {
        let store = MemoryStore::new("main").with_file("main", "calc.py", "def f(x, y):\n    return x * y\n");
        let completion = ScriptedCompletion::new().otherwise(Reply::Text(model_answer(
            &[("def f(x, y):", "def multiply(x, y):", "Improved function name", None)],
            "Renamed f",
        )));
        let mut config = config();
        config.dry_run = true;

        let outcome = Pipeline::new(&store, &completion, &config).run().await.unwrap();
        assert!(outcome.success);
        assert!(store.writes().is_empty());
        assert_eq!(outcome.diffs.len(), 1);
        assert!(outcome.diffs[0].diff.contains("-def f(x, y):\n+def multiply(x, y):\n"));
        assert!(outcome.diffs[0].diff.starts_with("--- a/calc.py\n+++ b/calc.py\n"));
        assert_eq!(outcome.headline(), "Dry run: 1 of 1 files would change");
    }

    #[tokio::test]
    async fn test_outcome_serializes_failures_and_exclusions() {
        let store = MemoryStore::new("main")
            .with_file("main", "a.py", "a = 1\n")
            .with_file("main", "b.py", "b = 2\n")
            .with_file("main", "c.py", "c = 3\n");
        let completion = ScriptedCompletion::new()
            .text("a.py", model_answer(&[("a = 1", "alpha = 1", "Rename a", None)], "Rename"))
            .text("b.py", model_answer(&[("zzz", "yyy", "Nothing", None)], "Noop"))
            .reply("c.py", Reply::Fail("socket closed".to_string()));

        let outcome = Pipeline::new(&store, &completion, &config()).run().await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.change_sets.len(), 1);
        assert_eq!(outcome.excluded[0].path, "b.py");
        assert_eq!(outcome.failures[0].path, "c.py");

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["failures"][0]["kind"], "transport");
        assert_eq!(json["publication"]["files"][0]["status"], "published");
        assert!(json.get("diffs").is_none());
    }
}
