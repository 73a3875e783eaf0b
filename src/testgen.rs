//! Test artifact synthesis.
//!
//! Collects the test snippets attached to applied directives and places them
//! in the conventional test file for the source language. The code is only
//! assembled as text; nothing here parses or runs it.

use crate::model::{EditDirective, Language, TestArtifact};
use crate::store::{RemoteFile, RepoStore};
use anyhow::Result;
use chrono::NaiveDate;
use std::path::Path;

/// Conventional test file path for `source_path`.
pub fn test_path_for(source_path: &str) -> String {
    let path = Path::new(source_path);
    let stem = file_stem(source_path);
    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match Language::from_path(source_path) {
        Language::Python => format!("tests/test_{}.py", stem),
        Language::JavaScript | Language::TypeScript => {
            join(&dir, &format!("__tests__/{}.test.{}", stem, ext))
        }
        Language::Java => {
            let dir = if dir == "src/main/java" || dir.starts_with("src/main/java/") {
                dir.replacen("src/main/java", "src/test/java", 1)
            } else {
                dir
            };
            join(&dir, &format!("{}Test.java", stem))
        }
        Language::Go => join(&dir, &format!("{}_test.go", stem)),
        Language::Rust => format!("tests/{}_test.rs", stem),
        _ if ext.is_empty() => format!("tests/{}_test", stem),
        _ => format!("tests/{}_test.{}", stem, ext),
    }
}

/// Build the test artifact for one source file, if any directive carries a test.
///
/// `existing` is the current test file at [`test_path_for`], when the store has one.
pub fn synthesize(
    source_path: &str,
    directives: &[EditDirective],
    existing: Option<&RemoteFile>,
    date: NaiveDate,
) -> Option<TestArtifact> {
    let bodies: Vec<&str> = directives.iter().filter_map(|d| d.test_body()).collect();
    if bodies.is_empty() {
        return None;
    }

    let test_file_path = test_path_for(source_path);
    let language = Language::from_path(source_path);
    let joined = bodies.join("\n\n");

    let artifact = match existing {
        Some(file) => TestArtifact {
            content: append_to_existing(&file.content, &joined, language, date),
            test_file_path,
            pre_existing: true,
            base_sha: Some(file.revision.clone()),
        },
        None => {
            let mut content = scaffold(source_path, language);
            content.push_str(&joined);
            content.push('\n');
            if language == Language::Java {
                content.push_str("}\n");
            }
            TestArtifact {
                content,
                test_file_path,
                pre_existing: false,
                base_sha: None,
            }
        }
    };
    Some(artifact)
}

/// Query the store for an existing test file, then synthesize.
pub async fn synthesize_with_store(
    store: &dyn RepoStore,
    branch: &str,
    source_path: &str,
    directives: &[EditDirective],
    date: NaiveDate,
) -> Result<Option<TestArtifact>> {
    if directives.iter().all(|d| d.test_body().is_none()) {
        return Ok(None);
    }
    let existing = store.read_file(&test_path_for(source_path), branch).await?;
    Ok(synthesize(source_path, directives, existing.as_ref(), date))
}

fn append_to_existing(existing: &str, bodies: &str, language: Language, date: NaiveDate) -> String {
    let separator = format!("{} Tests added by RepoSage on {}", comment_prefix(language), date);
    let block = format!("\n\n{}\n{}\n", separator, bodies);

    // Java bodies belong inside the test class.
    if language == Language::Java {
        if let Some(close) = existing.rfind('}') {
            let mut content = existing[..close].trim_end().to_string();
            content.push_str(&block);
            content.push_str(&existing[close..]);
            return content;
        }
    }

    let mut content = existing.trim_end().to_string();
    content.push_str(&block);
    content
}

fn scaffold(source_path: &str, language: Language) -> String {
    let stem = file_stem(source_path);
    match language {
        Language::Python => {
            let module = source_path
                .trim_end_matches(".py")
                .replace(['/', '\\'], ".");
            format!("import unittest\nimport pytest\n\nfrom {} import *\n\n\n", module)
        }
        Language::JavaScript => format!("const subject = require('../{}');\n\n", stem),
        Language::TypeScript => format!("import * as subject from '../{}';\n\n", stem),
        Language::Java => format!(
            "import org.junit.jupiter.api.Test;\nimport static org.junit.jupiter.api.Assertions.*;\n\nclass {}Test {{\n\n",
            stem
        ),
        Language::Go => {
            let package = Path::new(source_path)
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("main");
            format!("package {}\n\nimport \"testing\"\n\n", package)
        }
        Language::Rust => format!("// Tests for {}\n\n", source_path),
        _ => format!("{} Tests for {}\n\n", comment_prefix(language), source_path),
    }
}

fn comment_prefix(language: Language) -> &'static str {
    match language {
        Language::JavaScript
        | Language::TypeScript
        | Language::Java
        | Language::Go
        | Language::Rust
        | Language::Css => "//",
        _ => "#",
    }
}

fn file_stem(source_path: &str) -> String {
    Path::new(source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string())
}

fn join(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", dir, file)
    }
}
