use anyhow::{Context, Result};
use clap::Parser;
use reposage::config::{normalize_extension, PublishMode, RunConfig, Settings};
use reposage::github::{get_remote_info, GitHubStore};
use reposage::llm::OpenRouterClient;
use reposage::pipeline::{Pipeline, RunOutcome};
use reposage::sandbox::Sandbox;
use reposage::store::RepoStore;
use reposage::util::mask_secret;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "reposage",
    about = "Analyze a GitHub repository with an LLM and publish the improvements",
    version
)]
struct Args {
    /// Repository as owner/name (defaults to the origin remote of the current directory)
    #[arg(short, long, env = "GITHUB_REPOSITORY")]
    repo: Option<String>,

    /// GitHub token with contents and pull-request write access
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: String,

    /// OpenRouter API key
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    openrouter_key: String,

    /// Base branch to analyze and publish against
    #[arg(short, long)]
    branch: Option<String>,

    /// Model identifier passed to OpenRouter
    #[arg(short, long)]
    model: Option<String>,

    /// What the review should focus on (e.g. "security, error handling")
    #[arg(short, long)]
    focus: Option<String>,

    /// Comma-separated extension allow-list (e.g. ".py,.js")
    #[arg(long, value_delimiter = ',')]
    extensions: Option<Vec<String>>,

    /// Maximum concurrent analysis requests
    #[arg(short = 'w', long)]
    max_workers: Option<usize>,

    /// Analyze one file at a time, in discovery order
    #[arg(long)]
    sequential: bool,

    /// Open one pull request per file instead of a shared one
    #[arg(long, conflicts_with = "direct_commit")]
    per_file: bool,

    /// Commit straight to the base branch instead of opening pull requests
    #[arg(long)]
    direct_commit: bool,

    /// Gate direct commits on a sandboxed test run
    #[arg(long, requires = "direct_commit")]
    run_tests: bool,

    /// Shell command to run in the sandbox instead of the detected one
    #[arg(long, requires = "run_tests")]
    test_command: Option<String>,

    /// Analyze and preview diffs without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write the run outcome as JSON to this path
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(outcome) if outcome.success => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "run aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<RunConfig> {
    let settings = match &args.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };

    let repository = match &args.repo {
        Some(repo) => repo.clone(),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            let (owner, name) = get_remote_info(&cwd)
                .context("No --repo given and the current directory has no GitHub remote")?;
            format!("{}/{}", owner, name)
        }
    };

    let mut config = RunConfig::new(repository).with_settings(&settings);
    if let Some(branch) = &args.branch {
        config.base_branch = branch.clone();
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if args.focus.is_some() {
        config.focus = args.focus.clone();
    }
    if let Some(extensions) = &args.extensions {
        config.filter.extensions = extensions
            .iter()
            .filter(|e| !e.trim().is_empty())
            .map(|e| normalize_extension(e))
            .collect();
    }
    if let Some(workers) = args.max_workers {
        config.max_workers = workers;
    }
    if args.test_command.is_some() {
        config.test_command = args.test_command.clone();
    }
    config.sequential = args.sequential;
    config.dry_run = args.dry_run;
    config.mode = if args.direct_commit {
        PublishMode::DirectCommit {
            run_tests: args.run_tests,
        }
    } else {
        PublishMode::PullRequest {
            per_file: args.per_file,
        }
    };

    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<RunOutcome> {
    let config = build_config(&args)?;
    tracing::info!(
        repository = %config.repository,
        branch = %config.base_branch,
        model = %config.model,
        mode = ?config.mode,
        dry_run = config.dry_run,
        github_token = %mask_secret(&args.github_token),
        openrouter_key = %mask_secret(&args.openrouter_key),
        "starting run"
    );

    let store = GitHubStore::new(args.github_token.clone(), &config.repository)?;
    let completion = OpenRouterClient::new(args.openrouter_key.clone(), config.model.clone(), config.request_timeout)?;
    let sandbox = Sandbox::new(store.clone_url(), config.sandbox_timeout).with_command(config.test_command.clone());

    let mut pipeline = Pipeline::new(&store, &completion, &config);
    if matches!(config.mode, PublishMode::DirectCommit { run_tests: true }) {
        pipeline = pipeline.with_runner(&sandbox);
    }
    let outcome = pipeline.run().await?;

    report(&outcome);
    if let Some(path) = &args.output_file {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize run outcome")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote run outcome");
    }
    Ok(outcome)
}

fn report(outcome: &RunOutcome) {
    for diff in &outcome.diffs {
        println!("{}", diff.diff);
    }
    for failure in &outcome.failures {
        tracing::warn!(file = %failure.path, kind = %failure.kind, "not analyzed: {}", failure.reason);
    }
    for url in &outcome.publication.pull_requests {
        println!("Pull request: {}", url);
    }
    if let Some(run) = &outcome.publication.test_run {
        tracing::info!(command = %run.command, passed = run.passed, duration_ms = run.duration_ms, "sandbox test run");
    }
    if outcome.success {
        tracing::info!("{}", outcome.headline());
    } else {
        tracing::error!("{}", outcome.headline());
    }
}
