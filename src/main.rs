use std::io::Stdout;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shipflow::ci::{CiPoller, PollOptions};
use shipflow::config::{AppConfig, MergeMethod};
use shipflow::error::AppError;
use shipflow::local::ShellCheck;
use shipflow::output::{OutputFormatter, OutputMode};
use shipflow::platform::github::GitHubPlatform;
use shipflow::platform::Platform;
use shipflow::ship::{wait_for_ref, ShipOptions, ShipOrchestrator, ShipReport, WaitReport};
use shipflow::workspace::{GitRepository, LocalRepository};

#[derive(Parser)]
#[command(
    name = "shipflow",
    version,
    about = "Verify, push, open a PR, wait for CI, merge and clean up"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit a single JSON document instead of progress text
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ship the current branch
    Ship(ShipArgs),
    /// Wait for CI checks on a ref
    Wait(WaitArgs),
}

#[derive(Args)]
struct ShipArgs {
    #[arg(long)]
    skip_verify: bool,

    #[arg(long)]
    skip_security: bool,

    #[arg(long)]
    skip_ci: bool,

    /// Stop after CI instead of merging
    #[arg(long)]
    no_merge: bool,

    /// Keep the branch after merging
    #[arg(long)]
    keep_branch: bool,

    #[arg(long)]
    draft: bool,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    body: Option<String>,

    /// Base branch (defaults to the repository's default branch)
    #[arg(long)]
    base: Option<String>,

    /// squash, merge or rebase
    #[arg(long)]
    merge_method: Option<MergeMethod>,

    /// Overall CI wait budget in seconds
    #[arg(long)]
    ci_timeout: Option<u64>,

    #[arg(long, default_value = ".")]
    repo_path: PathBuf,
}

#[derive(Args)]
struct WaitArgs {
    /// Commit SHA or ref (defaults to local HEAD)
    #[arg(long = "ref")]
    git_ref: Option<String>,

    /// Overall CI wait budget in seconds
    #[arg(long)]
    ci_timeout: Option<u64>,

    #[arg(long, default_value = ".")]
    repo_path: PathBuf,
}

impl ShipArgs {
    fn apply(&self, options: &mut ShipOptions) {
        options.skip_verify |= self.skip_verify;
        options.skip_security |= self.skip_security;
        options.skip_ci |= self.skip_ci;
        options.draft |= self.draft;
        if self.no_merge {
            options.merge = false;
        }
        if self.keep_branch {
            options.delete_branch = false;
        }
        if let Some(method) = self.merge_method {
            options.merge_method = method;
        }
        if self.base.is_some() {
            options.base = self.base.clone();
        }
        if self.title.is_some() {
            options.title = self.title.clone();
        }
        if self.body.is_some() {
            options.body = self.body.clone();
        }
    }
}

fn init_tracing(json: bool, verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the result document; logs always go to stderr
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn connect(config: &AppConfig) -> Result<(Arc<dyn Platform>, String), AppError> {
    let token = config.github_token().ok_or_else(|| {
        AppError::Config(
            "No GitHub token found; set GITHUB_TOKEN, GH_TOKEN or github.token".to_string(),
        )
    })?;
    let platform = GitHubPlatform::new(&config.github, token.clone())?;
    Ok((Arc::new(platform), token))
}

async fn ship(
    args: &ShipArgs,
    mut config: AppConfig,
    output: &mut OutputFormatter<Stdout>,
) -> Result<ShipReport, AppError> {
    if let Some(secs) = args.ci_timeout {
        config.ci.timeout_secs = secs;
    }
    let (platform, token) = connect(&config)?;
    let repo: Arc<dyn LocalRepository> = Arc::new(GitRepository::new(&args.repo_path, Some(token)));

    let mut options = ShipOptions::from(&config);
    args.apply(&mut options);

    let poller = CiPoller::new(Arc::clone(&platform), PollOptions::from(&config.ci));
    let mut orchestrator = ShipOrchestrator::new(options, platform, repo, poller);
    if let Some(command) = &config.scripts.verify {
        orchestrator =
            orchestrator.with_verifier(Box::new(ShellCheck::new(command, &args.repo_path)));
    }
    if let Some(command) = &config.scripts.security {
        orchestrator = orchestrator
            .with_security_scanner(Box::new(ShellCheck::new(command, &args.repo_path)));
    }

    Ok(orchestrator.run(output).await)
}

async fn wait(
    args: &WaitArgs,
    mut config: AppConfig,
    output: &mut OutputFormatter<Stdout>,
) -> Result<WaitReport, AppError> {
    if let Some(secs) = args.ci_timeout {
        config.ci.timeout_secs = secs;
    }
    let (platform, token) = connect(&config)?;
    let repo = GitRepository::new(&args.repo_path, Some(token));

    let slug = match &config.github.repository {
        Some(slug) => slug.clone(),
        None => repo.remote_slug().await?,
    };
    let git_ref = match &args.git_ref {
        Some(git_ref) => git_ref.clone(),
        None => repo.head_sha().await?,
    };

    let poller = CiPoller::new(platform, PollOptions::from(&config.ci));
    Ok(wait_for_ref(&poller, &slug, &git_ref, output).await)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref());
    let json = cli.json || config.as_ref().is_ok_and(|config| config.output.json);
    init_tracing(json, cli.verbose);

    let mode = if json { OutputMode::Json } else { OutputMode::Human };
    let mut output = OutputFormatter::new(mode, std::io::stdout());

    let success = match &cli.command {
        Command::Ship(args) => {
            let report = match config {
                Ok(config) => ship(args, config, &mut output).await,
                Err(e) => Err(e),
            }
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Ship could not start");
                ShipReport::failed_before_start(&e)
            });
            output.render_result(&report)?;
            report.success
        }
        Command::Wait(args) => {
            let report = match config {
                Ok(config) => wait(args, config, &mut output).await,
                Err(e) => Err(e),
            }
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Wait could not start");
                WaitReport::failed_before_start(args.git_ref.as_deref(), &e)
            });
            output.render_result(&report)?;
            report.success
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
