//! In-memory collaborators.
//!
//! `MemoryStore` keeps one file map per branch and records every write;
//! `ScriptedCompletion` answers prompts from a per-file script. Both are used
//! by unit and integration tests to drive the pipeline without a network.
//! Compiled only for tests or with the `testing` feature.

use crate::sandbox::{TestRun, TestRunner};
use crate::store::{CallFuture, CompletionService, RemoteFile, RepoStore, TreeEntry};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredFile {
    content: String,
    revision: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

/// One successful file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub branch: String,
    pub path: String,
    pub message: String,
    pub content: String,
    pub kind: WriteKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRecord {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub url: String,
}

#[derive(Debug, Default)]
struct StoreState {
    branches: BTreeMap<String, BTreeMap<String, StoredFile>>,
    writes: Vec<WriteRecord>,
    pull_requests: Vec<PullRequestRecord>,
    failing_paths: HashSet<String>,
    fail_pull_requests: bool,
    next_revision: usize,
}

impl StoreState {
    fn revision(&mut self) -> String {
        self.next_revision += 1;
        format!("rev-{}", self.next_revision)
    }
}

/// Repository store backed by in-memory branch maps.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    clone_url: String,
}

impl MemoryStore {
    /// Store with one empty branch.
    pub fn new(base_branch: &str) -> Self {
        let mut state = StoreState::default();
        state.branches.insert(base_branch.to_string(), BTreeMap::new());
        Self {
            state: Mutex::new(state),
            clone_url: "memory://repository".to_string(),
        }
    }

    pub fn with_file(self, branch: &str, path: &str, content: &str) -> Self {
        {
            let mut state = self.lock();
            let revision = state.revision();
            state.branches.entry(branch.to_string()).or_default().insert(
                path.to_string(),
                StoredFile {
                    content: content.to_string(),
                    revision,
                },
            );
        }
        self
    }

    pub fn with_clone_url(mut self, url: impl Into<String>) -> Self {
        self.clone_url = url.into();
        self
    }

    /// Make every write to `path` fail.
    pub fn fail_writes_to(&self, path: &str) {
        self.lock().failing_paths.insert(path.to_string());
    }

    pub fn fail_pull_requests(&self) {
        self.lock().fail_pull_requests = true;
    }

    /// Overwrite a file without recording a write (simulates a concurrent push).
    pub fn overwrite(&self, branch: &str, path: &str, content: &str) {
        let mut state = self.lock();
        let revision = state.revision();
        state.branches.entry(branch.to_string()).or_default().insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                revision,
            },
        );
    }

    pub fn content(&self, branch: &str, path: &str) -> Option<String> {
        self.lock()
            .branches
            .get(branch)
            .and_then(|files| files.get(path))
            .map(|f| f.content.clone())
    }

    pub fn revision_of(&self, branch: &str, path: &str) -> Option<String> {
        self.lock()
            .branches
            .get(branch)
            .and_then(|files| files.get(path))
            .map(|f| f.revision.clone())
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.lock().branches.contains_key(branch)
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().writes.clone()
    }

    pub fn writes_to(&self, branch: &str) -> Vec<WriteRecord> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.branch == branch)
            .cloned()
            .collect()
    }

    pub fn pull_requests(&self) -> Vec<PullRequestRecord> {
        self.lock().pull_requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn list_sync(&self, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        let state = self.lock();
        let files = state
            .branches
            .get(git_ref)
            .ok_or_else(|| anyhow::anyhow!("No such ref: {}", git_ref))?;
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };

        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (file_path, file) in files {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(format!("{}{}", prefix, dir));
                }
                None => entries.push(TreeEntry::file(file_path.clone(), file.content.len() as u64)),
            }
        }
        let mut listing: Vec<TreeEntry> = dirs.into_iter().map(TreeEntry::dir).collect();
        listing.extend(entries);
        Ok(listing)
    }

    fn read_sync(&self, path: &str, git_ref: &str) -> Result<Option<RemoteFile>> {
        let state = self.lock();
        let files = state
            .branches
            .get(git_ref)
            .ok_or_else(|| anyhow::anyhow!("No such ref: {}", git_ref))?;
        Ok(files.get(path).map(|f| RemoteFile {
            path: path.to_string(),
            content: f.content.clone(),
            size: f.content.len() as u64,
            revision: f.revision.clone(),
        }))
    }

    fn put_sync(&self, path: &str, message: &str, content: &str, revision: Option<&str>, branch: &str) -> Result<()> {
        let mut state = self.lock();
        if state.failing_paths.contains(path) {
            return Err(anyhow::anyhow!("GitHub API error (500): write to {} rejected", path));
        }
        let current = state
            .branches
            .get(branch)
            .ok_or_else(|| anyhow::anyhow!("No such branch: {}", branch))?
            .get(path)
            .map(|f| f.revision.clone());

        let kind = match (revision, current) {
            (Some(expected), Some(actual)) if expected == actual => WriteKind::Update,
            (Some(expected), Some(actual)) => {
                return Err(anyhow::anyhow!(
                    "GitHub API error (409): {} does not match {}",
                    expected,
                    actual
                ))
            }
            (Some(_), None) => return Err(anyhow::anyhow!("GitHub API error (404): {} not found", path)),
            (None, Some(_)) => {
                return Err(anyhow::anyhow!(
                    "GitHub API error (422): \"sha\" wasn't supplied for existing {}",
                    path
                ))
            }
            (None, None) => WriteKind::Create,
        };

        let new_revision = state.revision();
        if let Some(files) = state.branches.get_mut(branch) {
            files.insert(
                path.to_string(),
                StoredFile {
                    content: content.to_string(),
                    revision: new_revision,
                },
            );
        }
        state.writes.push(WriteRecord {
            branch: branch.to_string(),
            path: path.to_string(),
            message: message.to_string(),
            content: content.to_string(),
            kind,
        });
        Ok(())
    }

    fn branch_sync(&self, name: &str, from_ref: &str) -> Result<()> {
        let mut state = self.lock();
        if state.branches.contains_key(name) {
            return Err(anyhow::anyhow!("GitHub API error (422): Reference already exists"));
        }
        let files = state
            .branches
            .get(from_ref)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("GitHub API error (404): {} not found", from_ref))?;
        state.branches.insert(name.to_string(), files);
        Ok(())
    }

    fn pull_request_sync(&self, title: &str, body: &str, head: &str, base: &str) -> Result<String> {
        let mut state = self.lock();
        if state.fail_pull_requests {
            return Err(anyhow::anyhow!("GitHub API error (422): Validation Failed"));
        }
        if !state.branches.contains_key(head) {
            return Err(anyhow::anyhow!("GitHub API error (422): head {} not found", head));
        }
        let url = format!(
            "https://github.com/example/repo/pull/{}",
            state.pull_requests.len() + 1
        );
        state.pull_requests.push(PullRequestRecord {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
            url: url.clone(),
        });
        Ok(url)
    }
}

impl RepoStore for MemoryStore {
    fn list_tree<'a>(&'a self, path: &'a str, git_ref: &'a str) -> CallFuture<'a, Vec<TreeEntry>> {
        Box::pin(async move { self.list_sync(path, git_ref) })
    }

    fn read_file<'a>(&'a self, path: &'a str, git_ref: &'a str) -> CallFuture<'a, Option<RemoteFile>> {
        Box::pin(async move { self.read_sync(path, git_ref) })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a str,
        message: &'a str,
        content: &'a str,
        revision: &'a str,
        branch: &'a str,
    ) -> CallFuture<'a, ()> {
        Box::pin(async move { self.put_sync(path, message, content, Some(revision), branch) })
    }

    fn create_file<'a>(
        &'a self,
        path: &'a str,
        message: &'a str,
        content: &'a str,
        branch: &'a str,
    ) -> CallFuture<'a, ()> {
        Box::pin(async move { self.put_sync(path, message, content, None, branch) })
    }

    fn create_branch<'a>(&'a self, name: &'a str, from_ref: &'a str) -> CallFuture<'a, ()> {
        Box::pin(async move { self.branch_sync(name, from_ref) })
    }

    fn open_pull_request<'a>(
        &'a self,
        title: &'a str,
        body: &'a str,
        head: &'a str,
        base: &'a str,
    ) -> CallFuture<'a, String> {
        Box::pin(async move { self.pull_request_sync(title, body, head, base) })
    }

    fn clone_url(&self) -> String {
        self.clone_url.clone()
    }
}

/// What the scripted model does for one file.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Transport failure with this message
    Fail(String),
    /// Answer after a delay (drives timeout and concurrency tests)
    Delayed(Duration, String),
}

/// Completion service answering from a script keyed by file path.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: HashMap<String, Reply>,
    fallback: Option<Reply>,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, path: &str, reply: Reply) -> Self {
        self.replies.insert(path.to_string(), reply);
        self
    }

    pub fn text(self, path: &str, text: impl Into<String>) -> Self {
        self.reply(path, Reply::Text(text.into()))
    }

    /// Reply used for files without a scripted answer.
    pub fn otherwise(mut self, reply: Reply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// User prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Highest number of calls that were in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lookup(&self, user_prompt: &str) -> Option<Reply> {
        let path = user_prompt
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("FILE: "))
            .unwrap_or_default();
        self.replies.get(path).cloned().or_else(|| self.fallback.clone())
    }

    async fn answer(&self, user_prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(user_prompt.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match self.lookup(user_prompt) {
            Some(Reply::Text(text)) => {
                // Yield so sibling requests can start.
                tokio::task::yield_now().await;
                Ok(text)
            }
            Some(Reply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(Reply::Fail(message)) => Err(anyhow::anyhow!("{}", message)),
            None => Err(anyhow::anyhow!("no scripted reply")),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete<'a>(&'a self, _system_prompt: &'a str, user_prompt: &'a str, _max_tokens: u32) -> CallFuture<'a, String> {
        Box::pin(self.answer(user_prompt))
    }
}

/// Test runner returning a fixed verdict and recording each request.
#[derive(Debug)]
pub struct ScriptedRunner {
    passed: bool,
    output: String,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    pub fn passing(output: &str) -> Self {
        Self {
            passed: true,
            output: output.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(output: &str) -> Self {
        Self {
            passed: false,
            ..Self::passing(output)
        }
    }

    /// `(branch, test_paths)` for every run, in call order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TestRunner for ScriptedRunner {
    fn run_tests<'a>(&'a self, branch: &'a str, test_paths: &'a [String]) -> CallFuture<'a, TestRun> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((branch.to_string(), test_paths.to_vec()));
        let run = TestRun {
            passed: self.passed,
            output: self.output.clone(),
            command: "scripted".to_string(),
            duration_ms: 0,
        };
        Box::pin(async move { Ok(run) })
    }
}

/// Render a model answer with the given `(original, improved, explanation, test)` directives.
pub fn model_answer(directives: &[(&str, &str, &str, Option<&str>)], summary: &str) -> String {
    let changes: Vec<serde_json::Value> = directives
        .iter()
        .map(|(original, improved, explanation, test)| {
            let mut change = serde_json::json!({
                "original_code": original,
                "improved_code": improved,
                "explanation": explanation,
            });
            if let Some(test) = test {
                change["test_code"] = serde_json::Value::String(test.to_string());
            }
            change
        })
        .collect();
    let payload = serde_json::json!({
        "analysis": {
            "code_quality": "Readable",
            "best_practices": "Mostly followed",
            "potential_bugs": "None found",
            "performance": "Fine"
        },
        "suggested_changes": changes,
        "summary": summary,
    });
    format!("Here is my review.\n\n```json\n{:#}\n```\n", payload)
}
