//! RepoSage library crate
//!
//! The improvement pipeline (extraction, patching, test synthesis, sandboxed
//! test runs, scheduling and publication) plus the GitHub and OpenRouter
//! adapters it runs against. The `reposage` binary is a thin CLI over
//! [`pipeline::Pipeline`].

pub mod changelog;
pub mod config;
pub mod error;
pub mod extract;
pub mod github;
pub mod llm;
pub mod model;
pub mod patch;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod sandbox;
pub mod scheduler;
pub mod store;
pub mod testgen;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod util;
