//! Publication coordinator
//!
//! Sequences branch creation, per-file writes, test artifacts, the changelog
//! update and the final pull request or direct commit:
//!
//! START -> (dry-run? DONE) -> BRANCH_READY -> PER_FILE_APPLY* -> CHANGELOG_UPDATE
//!       -> {DIRECT_COMMIT | PR_CREATE} -> DONE
//!
//! Every per-file failure is caught and recorded; the run fails only when no
//! file was published at all.

use crate::changelog::{self, ChangelogEntry};
use crate::config::{PublishMode, RunConfig};
use crate::error::PipelineError;
use crate::model::FileChangeSet;
use crate::sandbox::{TestRun, TestRunner};
use crate::store::RepoStore;
use crate::testgen;
use crate::util::{tail_chars, truncate};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const COMMIT_MESSAGE_MAX: usize = 100;
const TEST_OUTPUT_TAIL: usize = 4000;

/// Where the coordinator is in the publication sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    BranchReady,
    PerFileApply,
    ChangelogUpdate,
    DirectCommit,
    PrCreate,
    Done,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::BranchReady => "branch ready",
            Stage::PerFileApply => "applying files",
            Stage::ChangelogUpdate => "updating changelog",
            Stage::DirectCommit => "direct commit",
            Stage::PrCreate => "creating pull request",
            Stage::Done => "done",
        }
    }
}

/// Outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Published {
        branch: String,
        commit_message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        test_file: Option<String>,
        /// The content landed but its test artifact did not
        #[serde(skip_serializing_if = "Option::is_none")]
        test_error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pr_url: Option<String>,
    },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

impl FileReport {
    pub fn is_published(&self) -> bool {
        matches!(self.status, FileStatus::Published { .. })
    }

    fn fail(&mut self, reason: impl Into<String>) {
        self.status = FileStatus::Failed { reason: reason.into() };
    }
}

/// Aggregate result of publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationReport {
    /// Shared improvement branch, or the base branch for direct commits
    pub branch: Option<String>,
    pub files: Vec<FileReport>,
    pub changelog_updated: bool,
    pub pull_requests: Vec<String>,
    pub test_run: Option<TestRun>,
    pub stages: Vec<Stage>,
    pub success: bool,
    pub failure_reason: Option<String>,
}

impl PublicationReport {
    pub fn published(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.is_published())
    }

    pub fn published_count(&self) -> usize {
        self.published().count()
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(stage = stage.label(), "publication stage");
        self.stages.push(stage);
    }

    fn finish(mut self) -> Self {
        self.success = self.published_count() > 0;
        if !self.success && self.failure_reason.is_none() {
            self.failure_reason = Some("no files were published".to_string());
        }
        self.enter(Stage::Done);
        self
    }
}

/// Drives one publication over a repository store.
pub struct Coordinator<'a> {
    store: &'a dyn RepoStore,
    runner: Option<&'a dyn TestRunner>,
    config: &'a RunConfig,
}

impl<'a> Coordinator<'a> {
    pub fn new(store: &'a dyn RepoStore, config: &'a RunConfig) -> Self {
        Self {
            store,
            runner: None,
            config,
        }
    }

    /// Runner used by the direct-commit test gate.
    pub fn with_runner(mut self, runner: &'a dyn TestRunner) -> Self {
        self.runner = Some(runner);
        self
    }

    pub async fn publish(&self, change_sets: &[FileChangeSet]) -> PublicationReport {
        let mut report = PublicationReport::default();
        report.enter(Stage::Start);

        if self.config.dry_run || change_sets.is_empty() {
            if change_sets.is_empty() {
                report.failure_reason = Some("no change sets to publish".to_string());
            }
            report.enter(Stage::Done);
            return report;
        }

        match self.config.mode {
            PublishMode::PullRequest { per_file: false } => self.shared_pull_request(change_sets, report).await,
            PublishMode::PullRequest { per_file: true } => self.per_file_pull_requests(change_sets, report).await,
            PublishMode::DirectCommit { run_tests: false } => self.direct_commit(change_sets, report).await,
            PublishMode::DirectCommit { run_tests: true } => self.gated_direct_commit(change_sets, report).await,
        }
    }

    async fn shared_pull_request(&self, change_sets: &[FileChangeSet], mut report: PublicationReport) -> PublicationReport {
        let branch = self.config.improvement_branch();
        if let Err(err) = self.store.create_branch(&branch, &self.config.base_branch).await {
            tracing::error!(branch = %branch, error = %format!("{:#}", err), "failed to create branch");
            report.failure_reason = Some(format!("failed to create branch {}: {:#}", branch, err));
            return report.finish();
        }
        tracing::info!(branch = %branch, "created improvement branch");
        report.branch = Some(branch.clone());
        report.enter(Stage::BranchReady);

        report.enter(Stage::PerFileApply);
        report.files = self.apply_all(change_sets, &branch).await;
        if report.published_count() == 0 {
            return report.finish();
        }

        report.enter(Stage::ChangelogUpdate);
        report.changelog_updated = self.update_changelog(&branch, &report, change_sets).await;

        report.enter(Stage::PrCreate);
        let included = published_change_sets(&report, change_sets);
        let title = format!("RepoSage: Code improvements ({} files)", included.len());
        let body = pull_request_body(&included, &report);
        match self
            .store
            .open_pull_request(&title, &body, &branch, &self.config.base_branch)
            .await
        {
            Ok(url) => {
                tracing::info!(url = %url, "opened pull request");
                for file in report.files.iter_mut() {
                    if let FileStatus::Published { pr_url, .. } = &mut file.status {
                        *pr_url = Some(url.clone());
                    }
                }
                report.pull_requests.push(url);
            }
            Err(err) => {
                let reason = format!("failed to open pull request: {:#}", err);
                tracing::error!(error = %reason, "pull request failed");
                for file in report.files.iter_mut().filter(|f| f.is_published()) {
                    file.fail(reason.clone());
                }
                report.failure_reason = Some(reason);
            }
        }
        report.finish()
    }

    async fn per_file_pull_requests(&self, change_sets: &[FileChangeSet], mut report: PublicationReport) -> PublicationReport {
        for change_set in change_sets {
            let path = change_set.file_path.clone();
            let branch = self.config.file_branch(&path);

            if let Err(err) = self.store.create_branch(&branch, &self.config.base_branch).await {
                let reason = format!("failed to create branch {}: {:#}", branch, err);
                tracing::warn!(file = %path, error = %reason, "skipping file");
                report.files.push(FileReport {
                    path,
                    status: FileStatus::Failed { reason },
                });
                continue;
            }
            report.enter(Stage::BranchReady);

            report.enter(Stage::PerFileApply);
            let mut file = self.apply_one(change_set, &branch).await;
            if !file.is_published() {
                report.files.push(file);
                continue;
            }

            report.enter(Stage::ChangelogUpdate);
            let entry = ChangelogEntry::from_change_sets([change_set], self.run_date());
            if self.write_changelog(&branch, &entry).await {
                report.changelog_updated = true;
            }

            report.enter(Stage::PrCreate);
            let title = format!("RepoSage: Improve {}", path);
            let single = FileReport {
                path: path.clone(),
                status: file.status.clone(),
            };
            let body = pull_request_body(
                &[change_set],
                &PublicationReport {
                    files: vec![single],
                    ..PublicationReport::default()
                },
            );
            match self
                .store
                .open_pull_request(&title, &body, &branch, &self.config.base_branch)
                .await
            {
                Ok(url) => {
                    tracing::info!(file = %path, url = %url, "opened pull request");
                    if let FileStatus::Published { pr_url, .. } = &mut file.status {
                        *pr_url = Some(url.clone());
                    }
                    report.pull_requests.push(url);
                }
                Err(err) => {
                    let reason = format!("failed to open pull request: {:#}", err);
                    tracing::warn!(file = %path, error = %reason, "pull request failed");
                    file.fail(reason);
                }
            }
            report.files.push(file);
        }
        report.finish()
    }

    async fn direct_commit(&self, change_sets: &[FileChangeSet], mut report: PublicationReport) -> PublicationReport {
        let base = self.config.base_branch.clone();
        report.branch = Some(base.clone());
        report.enter(Stage::BranchReady);

        report.enter(Stage::PerFileApply);
        report.files = self.apply_all(change_sets, &base).await;
        if report.published_count() > 0 {
            report.enter(Stage::ChangelogUpdate);
            report.changelog_updated = self.update_changelog(&base, &report, change_sets).await;
            report.enter(Stage::DirectCommit);
            tracing::info!(branch = %base, files = report.published_count(), "committed directly");
        }
        report.finish()
    }

    /// Stage everything on a validation branch, test it, and only then replay onto the base.
    async fn gated_direct_commit(&self, change_sets: &[FileChangeSet], mut report: PublicationReport) -> PublicationReport {
        let Some(runner) = self.runner else {
            let err = PipelineError::Config("test gate enabled without a test runner".to_string());
            report.failure_reason = Some(err.to_string());
            report.enter(Stage::Done);
            return report;
        };

        let validation = self.config.validation_branch();
        if let Err(err) = self.store.create_branch(&validation, &self.config.base_branch).await {
            report.failure_reason = Some(format!("failed to create branch {}: {:#}", validation, err));
            return report.finish();
        }
        report.enter(Stage::BranchReady);

        report.enter(Stage::PerFileApply);
        let staged = self.apply_all(change_sets, &validation).await;
        let test_paths: Vec<String> = staged
            .iter()
            .filter_map(|f| match &f.status {
                FileStatus::Published {
                    test_file: Some(path), ..
                } => Some(path.clone()),
                _ => None,
            })
            .collect();
        if staged.iter().all(|f| !f.is_published()) {
            report.files = staged;
            return report.finish();
        }

        tracing::info!(branch = %validation, tests = test_paths.len(), "running tests before direct commit");
        let run = match runner.run_tests(&validation, &test_paths).await {
            Ok(run) => run,
            Err(err) => {
                report.files = staged;
                report.failure_reason = Some(format!("test run failed to start: {:#}", err));
                return self.veto(report);
            }
        };
        let passed = run.passed;
        let output = run.output.clone();
        report.test_run = Some(run);

        if !passed {
            let err = PipelineError::TestFailure(tail_chars(&output, TEST_OUTPUT_TAIL));
            tracing::error!(branch = %validation, "tests failed; nothing committed to base branch");
            report.files = staged;
            report.failure_reason = Some(err.to_string());
            return self.veto(report);
        }

        let base = self.config.base_branch.clone();
        report.branch = Some(base.clone());
        let publishable: Vec<FileChangeSet> = change_sets
            .iter()
            .filter(|cs| staged.iter().any(|f| f.path == cs.file_path && f.is_published()))
            .cloned()
            .collect();
        let mut files: Vec<FileReport> = staged.into_iter().filter(|f| !f.is_published()).collect();
        files.extend(self.apply_all(&publishable, &base).await);
        report.files = files;

        if report.published_count() > 0 {
            report.enter(Stage::ChangelogUpdate);
            report.changelog_updated = self.update_changelog(&base, &report, change_sets).await;
            report.enter(Stage::DirectCommit);
        }
        report.finish()
    }

    /// Test gate vetoed the batch: nothing counts as published.
    fn veto(&self, mut report: PublicationReport) -> PublicationReport {
        let reason = report
            .failure_reason
            .clone()
            .unwrap_or_else(|| "tests failed".to_string());
        for file in report.files.iter_mut().filter(|f| f.is_published()) {
            file.fail(format!("not committed: {}", truncate(&reason, 200)));
        }
        report.success = false;
        report.enter(Stage::Done);
        report
    }

    /// Apply change sets one by one; files sharing a test path must not race.
    async fn apply_all(&self, change_sets: &[FileChangeSet], branch: &str) -> Vec<FileReport> {
        let mut files = Vec::with_capacity(change_sets.len());
        for change_set in change_sets {
            files.push(self.apply_one(change_set, branch).await);
        }
        files
    }

    async fn apply_one(&self, change_set: &FileChangeSet, branch: &str) -> FileReport {
        let path = change_set.file_path.clone();
        match self.write_change_set(change_set, branch).await {
            Ok(status) => {
                tracing::info!(file = %path, branch, "published file");
                FileReport { path, status }
            }
            Err(err) => {
                tracing::warn!(file = %path, branch, error = %err, "publication failed; skipping file");
                FileReport {
                    path,
                    status: FileStatus::Failed {
                        reason: err.to_string(),
                    },
                }
            }
        }
    }

    async fn write_change_set(&self, change_set: &FileChangeSet, branch: &str) -> Result<FileStatus, PipelineError> {
        let path = change_set.file_path.as_str();
        let publication = |reason: String| PipelineError::Publication {
            path: path.to_string(),
            reason,
        };

        let current = self
            .store
            .read_file(path, branch)
            .await
            .map_err(|e| publication(format!("{:#}", e)))?
            .ok_or_else(|| publication(format!("file no longer exists on {}", branch)))?;
        if current.content != change_set.original_content {
            return Err(publication("file changed since it was analyzed".to_string()));
        }

        let commit_message = truncate(
            &format!("Improve {}: {}", path, change_set.analysis.summary_or_default()),
            COMMIT_MESSAGE_MAX,
        );
        self.store
            .write_file(path, &commit_message, &change_set.new_content, &current.revision, branch)
            .await
            .map_err(|e| publication(format!("{:#}", e)))?;

        let (test_file, test_error) = match self.write_tests(change_set, branch).await {
            Ok(test_file) => (test_file, None),
            Err(err) => {
                tracing::warn!(file = %path, error = %format!("{:#}", err), "test artifact not written");
                (None, Some(format!("{:#}", err)))
            }
        };

        Ok(FileStatus::Published {
            branch: branch.to_string(),
            commit_message,
            test_file,
            test_error,
            pr_url: None,
        })
    }

    async fn write_tests(&self, change_set: &FileChangeSet, branch: &str) -> anyhow::Result<Option<String>> {
        let path = change_set.file_path.as_str();
        let Some(artifact) = testgen::synthesize_with_store(
            self.store,
            branch,
            path,
            &change_set.applied_directives,
            self.run_date(),
        )
        .await?
        else {
            return Ok(None);
        };

        match &artifact.base_sha {
            Some(sha) if artifact.pre_existing => {
                let message = format!("Update tests for {}", path);
                self.store
                    .write_file(&artifact.test_file_path, &message, &artifact.content, sha, branch)
                    .await?;
            }
            _ => {
                let message = format!("Add tests for {}", path);
                self.store
                    .create_file(&artifact.test_file_path, &message, &artifact.content, branch)
                    .await?;
            }
        }
        Ok(Some(artifact.test_file_path))
    }

    async fn update_changelog(&self, branch: &str, report: &PublicationReport, change_sets: &[FileChangeSet]) -> bool {
        let included = published_change_sets(report, change_sets);
        let entry = ChangelogEntry::from_change_sets(included, self.run_date());
        self.write_changelog(branch, &entry).await
    }

    async fn write_changelog(&self, branch: &str, entry: &ChangelogEntry) -> bool {
        if entry.is_empty() {
            return false;
        }
        let path = self.config.changelog_path.as_str();
        let result: anyhow::Result<()> = async {
            let existing = self.store.read_file(path, branch).await?;
            let content = changelog::insert(existing.as_ref().map(|f| f.content.as_str()), entry);
            match existing {
                Some(file) => {
                    self.store
                        .write_file(path, "Update changelog", &content, &file.revision, branch)
                        .await
                }
                None => self.store.create_file(path, "Update changelog", &content, branch).await,
            }
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!(branch, path, "updated changelog");
                true
            }
            Err(err) => {
                tracing::warn!(branch, path, error = %format!("{:#}", err), "changelog update failed");
                false
            }
        }
    }

    fn run_date(&self) -> NaiveDate {
        self.config.run_date()
    }
}

fn published_change_sets<'c>(report: &PublicationReport, change_sets: &'c [FileChangeSet]) -> Vec<&'c FileChangeSet> {
    change_sets
        .iter()
        .filter(|cs| report.published().any(|f| f.path == cs.file_path))
        .collect()
}

/// Markdown body listing each included file's summary and changes.
pub fn pull_request_body(change_sets: &[&FileChangeSet], report: &PublicationReport) -> String {
    let mut body = String::from("# RepoSage: AI-Suggested Code Improvements\n\n");
    body.push_str("This PR contains automated code improvements suggested by RepoSage.\n");

    for change_set in change_sets {
        body.push_str(&format!("\n## {}\n\n", change_set.file_path));
        body.push_str("### Summary\n");
        body.push_str(change_set.analysis.summary_or_default());
        body.push_str("\n\n### Changes\n");
        for (i, directive) in change_set.applied_directives.iter().enumerate() {
            body.push_str(&format!("**Change {}**: {}\n", i + 1, directive.explanation.trim()));
        }
        let test_file = report.files.iter().find_map(|f| match &f.status {
            FileStatus::Published {
                test_file: Some(test), ..
            } if f.path == change_set.file_path => Some(test.as_str()),
            _ => None,
        });
        if let Some(test) = test_file {
            body.push_str(&format!("\nTests: `{}`\n", test));
        }
    }
    body
}
