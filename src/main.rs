//! Catalyst CLI - run CI/CD workflows locally

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use miette::Diagnostic;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use catalyst::workflows::{self, OutputMode, RunParams};
use catalyst::{CatalystError, ExecutionType, RunCtx};

#[derive(Parser)]
#[command(name = "catalyst")]
#[command(about = "Run CI/CD workflows locally")]
#[command(version)]
struct Cli {
    /// Workflow name to execute (default: the only workflow found)
    workflow: Option<String>,

    /// Reuse containers between executions
    #[arg(short = 'R', long)]
    reuse: bool,

    /// Directory to run the workflow against
    #[arg(short = 'w', long, default_value = ".")]
    working_dir: PathBuf,

    /// Path to the workflow file to run
    #[arg(short = 'f', long = "workflow-file")]
    workflow_file: Option<PathBuf>,

    /// Action to run (default: all actions)
    #[arg(short = 'a', long)]
    action: Option<String>,

    /// Bind the working directory rather than create a copy
    #[arg(short = 'b', long)]
    bind: bool,

    /// Disable logging of output from actions
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Dry run
    #[arg(short = 'n', long)]
    dryrun: bool,

    /// Disable file caches
    #[arg(short = 'C', long)]
    no_cache: bool,

    /// Executor type [docker, finch, shell]
    #[arg(short = 'x', long)]
    executor: Option<String>,

    /// Number of actions to execute concurrently
    #[arg(short = 'c', long, default_value_t = default_concurrency())]
    concurrency: usize,

    /// Map workflow environment names to credential profile names
    /// (name=profile, repeatable)
    #[arg(short = 'e', long = "environments", value_parser = parse_key_value)]
    environments: Vec<(String, String)>,

    /// Output mode [tui, text]
    #[arg(short = 't', long = "output-format")]
    output_format: Option<String>,

    /// Verbose output
    #[arg(short = 'V', long)]
    verbose: bool,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=profile, got '{raw}'"))
}

/// Cancel the root context on SIGINT/SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let interrupted = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = signal(SignalKind::terminate()).expect("signal handler");
            tokio::select! {
                _ = interrupted => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        interrupted.await;
        debug!("received signal, shutting down");
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let ctx = RunCtx::new().dry_run(cli.dryrun);
    spawn_signal_handler(ctx.cancel.clone());

    let result = execute(&ctx, cli).await;
    if let Err(err) = result {
        if !matches!(err, CatalystError::Cancelled) {
            eprintln!("{} {}", "Error:".red().bold(), err);
            if let Some(help) = err.help() {
                eprintln!("  {} {}", "Fix:".yellow(), help);
            }
        }
        std::process::exit(1);
    }
}

async fn execute(ctx: &RunCtx, cli: Cli) -> catalyst::Result<()> {
    let execution_type = match &cli.executor {
        Some(raw) => raw.parse::<ExecutionType>()?,
        None => ExecutionType::default_for_host(ctx).await,
    };

    let output_mode = match cli.output_format.as_deref() {
        Some("tui") => OutputMode::Tui,
        Some("text") => OutputMode::Text,
        // Default: TUI on interactive terminals outside CI
        _ => {
            if std::env::var("CI").as_deref() != Ok("true") && std::io::stdout().is_terminal() {
                OutputMode::Tui
            } else {
                OutputMode::Text
            }
        }
    };

    workflows::run(
        ctx,
        RunParams {
            working_dir: cli.working_dir,
            workflow_path: cli.workflow_file,
            workflow_name: cli.workflow,
            action: cli.action,
            execution_type,
            concurrency: cli.concurrency,
            reuse: cli.reuse,
            bind_working_dir: cli.bind,
            no_output: cli.quiet,
            no_cache: cli.no_cache,
            dryrun: cli.dryrun,
            output_mode,
            environment_profiles: cli.environments.into_iter().collect::<BTreeMap<_, _>>(),
        },
    )
    .await
}
