//! Run configuration for reposage
//!
//! Optional settings live in ~/.config/reposage/config.toml. CLI flags are
//! layered on top in `main`, and the resulting [`RunConfig`] is never mutated
//! once the run starts.

use crate::error::PipelineError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "qwen/qwq-32b:free";
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".java", ".ts", ".jsx", ".tsx", ".html", ".css", ".md", ".yml", ".yaml",
];
pub const DEFAULT_IGNORED_DIRS: &[&str] = &["node_modules", "venv", ".git", "__pycache__", "dist", "build"];
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 600;

/// How publication ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum PublishMode {
    /// Changes go to a review branch; `per_file` opens one PR per file
    PullRequest { per_file: bool },
    /// Changes go straight to the base branch, optionally gated on the sandbox
    DirectCommit { run_tests: bool },
}

impl Default for PublishMode {
    fn default() -> Self {
        PublishMode::PullRequest { per_file: false }
    }
}

/// Which repository files are eligible for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFilter {
    /// Lowercase extensions including the dot
    pub extensions: Vec<String>,
    pub ignored_dirs: Vec<String>,
    pub max_file_size: u64,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl FileFilter {
    /// True if any path component is an ignored directory.
    pub fn is_ignored(&self, path: &str) -> bool {
        path.split('/')
            .any(|part| self.ignored_dirs.iter().any(|dir| dir == part))
    }

    pub fn has_allowed_extension(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn within_size(&self, size: u64) -> bool {
        size <= self.max_file_size
    }
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// `owner/name`
    pub repository: String,
    pub base_branch: String,
    pub model: String,
    /// Extra focus appended to every analysis prompt
    pub focus: Option<String>,
    pub max_workers: usize,
    /// Analyze one file at a time, in discovery order
    pub sequential: bool,
    pub dry_run: bool,
    pub mode: PublishMode,
    pub filter: FileFilter,
    pub changelog_path: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub sandbox_timeout: Duration,
    /// Shell command that replaces test-command detection in the sandbox
    pub test_command: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl RunConfig {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            base_branch: "main".to_string(),
            model: DEFAULT_MODEL.to_string(),
            focus: None,
            max_workers: default_workers(),
            sequential: false,
            dry_run: false,
            mode: PublishMode::default(),
            filter: FileFilter::default(),
            changelog_path: "CHANGELOG.md".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            sandbox_timeout: Duration::from_secs(DEFAULT_SANDBOX_TIMEOUT_SECS),
            test_command: None,
            started_at: Utc::now(),
        }
    }

    /// Layer values from the settings file over the defaults.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(branch) = &settings.base_branch {
            self.base_branch = branch.clone();
        }
        if let Some(model) = &settings.model {
            self.model = model.clone();
        }
        if settings.focus.is_some() {
            self.focus = settings.focus.clone();
        }
        if let Some(workers) = settings.max_workers {
            self.max_workers = workers;
        }
        if let Some(extensions) = &settings.extensions {
            self.filter.extensions = extensions.iter().map(|e| normalize_extension(e)).collect();
        }
        if let Some(dirs) = &settings.ignored_dirs {
            self.filter.ignored_dirs = dirs.clone();
        }
        if let Some(size) = settings.max_file_size {
            self.filter.max_file_size = size;
        }
        if let Some(path) = &settings.changelog_path {
            self.changelog_path = path.clone();
        }
        if let Some(tokens) = settings.max_tokens {
            self.max_tokens = tokens;
        }
        if let Some(secs) = settings.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.sandbox_timeout_secs {
            self.sandbox_timeout = Duration::from_secs(secs);
        }
        if settings.test_command.is_some() {
            self.test_command = settings.test_command.clone();
        }
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        match self.repository.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => {
                return Err(PipelineError::Config(format!(
                    "repository must be 'owner/name', got '{}'",
                    self.repository
                )))
            }
        }
        if self.base_branch.trim().is_empty() {
            return Err(PipelineError::Config("base branch is empty".to_string()));
        }
        if self.max_workers == 0 {
            return Err(PipelineError::Config("max workers must be at least 1".to_string()));
        }
        if self.filter.extensions.is_empty() {
            return Err(PipelineError::Config("no file extensions selected".to_string()));
        }
        Ok(())
    }

    /// Worker count actually used by the scheduler.
    pub fn effective_workers(&self) -> usize {
        if self.sequential {
            1
        } else {
            self.max_workers.max(1)
        }
    }

    /// `YYYYmmddHHMMSS` stamp used in branch names.
    pub fn run_stamp(&self) -> String {
        self.started_at.format("%Y%m%d%H%M%S").to_string()
    }

    pub fn run_date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    pub fn improvement_branch(&self) -> String {
        format!("reposage-improvements-{}", self.run_stamp())
    }

    /// Branch for one file in per-file PR mode; the slug covers the whole path
    /// so files sharing a stem in different directories never collide.
    pub fn file_branch(&self, file_path: &str) -> String {
        let mut slug = String::with_capacity(file_path.len());
        for c in file_path.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                slug.push(c);
            } else if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        }
        let slug = slug.trim_end_matches('-');
        if slug.is_empty() {
            format!("{}-file", self.improvement_branch())
        } else {
            format!("{}-{}", self.improvement_branch(), slug)
        }
    }

    pub fn validation_branch(&self) -> String {
        format!("reposage-validate-{}", self.run_stamp())
    }
}

/// Settings file contents. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_branch: Option<String>,
    pub model: Option<String>,
    pub focus: Option<String>,
    pub max_workers: Option<usize>,
    pub extensions: Option<Vec<String>>,
    pub ignored_dirs: Option<Vec<String>>,
    pub max_file_size: Option<u64>,
    pub changelog_path: Option<String>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub sandbox_timeout_secs: Option<u64>,
    pub test_command: Option<String>,
}

impl Settings {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reposage"))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load settings from the default location, or return defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load settings from `path`. A missing file yields defaults; a corrupt one
    /// is moved aside to `config.toml.corrupt` and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "settings file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Lowercase an extension and give it a leading dot (`PY` becomes `.py`).
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn config() -> RunConfig {
        let mut config = RunConfig::new("octo/widgets");
        config.started_at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        config
    }

    #[test]
    fn test_filter_defaults() {
        let filter = FileFilter::default();
        assert!(filter.has_allowed_extension("src/app.py"));
        assert!(filter.has_allowed_extension("web/App.TSX"));
        assert!(!filter.has_allowed_extension("src/main.rs"));
        assert!(filter.is_ignored("node_modules/left-pad/index.js"));
        assert!(filter.is_ignored("pkg/__pycache__/mod.py"));
        assert!(!filter.is_ignored("src/builder.py"));
        assert!(filter.within_size(100 * 1024));
        assert!(!filter.within_size(100 * 1024 + 1));
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("PY"), ".py");
        assert_eq!(normalize_extension(" .Js "), ".js");
        assert_eq!(normalize_extension(".tsx"), ".tsx");
    }

    #[test]
    fn test_branch_names_use_run_stamp() {
        let config = config();
        assert_eq!(config.improvement_branch(), "reposage-improvements-20250314092653");
        assert_eq!(
            config.file_branch("src/data loader.py"),
            "reposage-improvements-20250314092653-src-data-loader-py"
        );
        assert_ne!(config.file_branch("src/util.js"), config.file_branch("lib/util.js"));
        assert_ne!(config.file_branch("src/util.js"), config.file_branch("src/util.py"));
        assert_eq!(config.validation_branch(), "reposage-validate-20250314092653");
        assert_eq!(config.run_date().to_string(), "2025-03-14");
    }

    #[test]
    fn test_validate_rejects_bad_repository() {
        assert!(config().validate().is_ok());
        let mut bad = config();
        bad.repository = "widgets".to_string();
        assert!(matches!(bad.validate(), Err(PipelineError::Config(_))));
        let mut zero = config();
        zero.max_workers = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_sequential_forces_one_worker() {
        let mut config = config();
        config.max_workers = 8;
        assert_eq!(config.effective_workers(), 8);
        config.sequential = true;
        assert_eq!(config.effective_workers(), 1);
    }

    #[test]
    fn test_settings_layer_over_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "model = \"openai/gpt-4o-mini\"\nextensions = [\"py\", \".RS\"]\nmax_workers = 3\nrequest_timeout_secs = 30\n",
        )
        .unwrap();
        let settings = Settings::load_from(&path);
        let config = config().with_settings(&settings);
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.filter.extensions, vec![".py", ".rs"]);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.changelog_path, "CHANGELOG.md");
    }

    #[test]
    fn test_corrupt_settings_are_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "model = [unterminated").unwrap();
        let settings = Settings::load_from(&path);
        assert_eq!(settings, Settings::default());
        assert!(dir.path().join("config.toml.corrupt").exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_settings_file_is_default() {
        let dir = tempdir().unwrap();
        assert_eq!(Settings::load_from(&dir.path().join("nope.toml")), Settings::default());
    }
}
