//! Collaborator contracts: the repository store and the completion service.
//!
//! The pipeline only talks to these traits. `github` and `llm` provide the
//! production adapters; `testing` provides in-memory fakes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by collaborator methods.
pub type CallFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A file as the store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    pub size: u64,
    /// Revision token (blob sha) needed to update the file in place
    pub revision: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl TreeEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Dir,
            size: 0,
        }
    }
}

/// Hosting-repository operations used by discovery and publication.
pub trait RepoStore: Send + Sync {
    /// Entries directly under `path` (`""` for the root) at `git_ref`.
    fn list_tree<'a>(&'a self, path: &'a str, git_ref: &'a str) -> CallFuture<'a, Vec<TreeEntry>>;

    /// The file at `path`, or `None` when it does not exist on `git_ref`.
    fn read_file<'a>(&'a self, path: &'a str, git_ref: &'a str) -> CallFuture<'a, Option<RemoteFile>>;

    /// Update an existing file; `revision` must be the file's current token on `branch`.
    fn write_file<'a>(
        &'a self,
        path: &'a str,
        message: &'a str,
        content: &'a str,
        revision: &'a str,
        branch: &'a str,
    ) -> CallFuture<'a, ()>;

    fn create_file<'a>(
        &'a self,
        path: &'a str,
        message: &'a str,
        content: &'a str,
        branch: &'a str,
    ) -> CallFuture<'a, ()>;

    /// Create branch `name` pointing at the head of `from_ref`.
    fn create_branch<'a>(&'a self, name: &'a str, from_ref: &'a str) -> CallFuture<'a, ()>;

    /// Open a pull request and return its URL.
    fn open_pull_request<'a>(
        &'a self,
        title: &'a str,
        body: &'a str,
        head: &'a str,
        base: &'a str,
    ) -> CallFuture<'a, String>;

    /// URL the sandbox clones from (may embed credentials; never log it).
    fn clone_url(&self) -> String;
}

/// Text completion endpoint.
pub trait CompletionService: Send + Sync {
    fn complete<'a>(&'a self, system_prompt: &'a str, user_prompt: &'a str, max_tokens: u32) -> CallFuture<'a, String>;
}
