//! quill - apply tag-protocol responses to a workspace
//!
//! ## Commands
//!
//! - `extract`: parse a response and print its instructions
//! - `apply`: apply a response, run the checker and auto-fix
//! - `run`: ask the generator for a response to a prompt and apply it
//! - `check`: run the checker and print a problem report
//! - `report`: parse a problem report and print it as JSON

mod generator;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use quill_core::checker::Checker;
use quill_core::telemetry::{init_tracing, json_requested};
use quill_core::{
    CancelFlag, ChangeApplier, ChatMessage, Collaborators, CycleReport, CycleRunner, CycleStatus,
    Extractor, FsBackingStore, LockPolicy, OutcomeStatus, ProblemReport, ProblemReporter,
    ProcessChecker, QuillConfig, WorkspaceLease, WorkspaceLocks,
};

use crate::generator::ProcessGenerator;

#[derive(Parser)]
#[command(name = "quill")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Apply tag-protocol responses to a workspace", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines (also QUILL_LOG_FORMAT=json)
    #[arg(long, global = true)]
    json: bool,

    /// Workspace root
    #[arg(short = 'C', long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Tag prefix (overrides quill.toml)
    #[arg(long, global = true)]
    tag_prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract instructions from a response and print them as JSON
    Extract {
        /// Response file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Apply a response to the workspace, then check and auto-fix
    Apply {
        /// Response file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,

        #[command(flatten)]
        cycle: CycleArgs,
    },

    /// Generate a response for a prompt and apply it
    Run {
        /// Prompt sent to the generator
        prompt: String,

        #[command(flatten)]
        cycle: CycleArgs,
    },

    /// Run the checker and print a problem report
    Check {
        #[command(flatten)]
        checker: CheckerArgs,
    },

    /// Parse a problem report and print it as JSON
    Report {
        /// Report file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
}

#[derive(clap::Args)]
struct CheckerArgs {
    /// Checker command line (overrides quill.toml), e.g. "npx tsc --noEmit"
    #[arg(long)]
    checker: Option<String>,
}

#[derive(clap::Args)]
struct CycleArgs {
    #[command(flatten)]
    checker: CheckerArgs,

    /// Generator command line used for fixes (overrides quill.toml)
    #[arg(long)]
    generator: Option<String>,

    /// Fail instead of waiting when the workspace is busy
    #[arg(long)]
    reject_busy: bool,

    /// Output format for the cycle report
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json || json_requested(), level);

    let mut config = QuillConfig::load(&cli.workspace)
        .with_context(|| format!("Failed to load config from {}", cli.workspace.display()))?;
    if let Some(prefix) = cli.tag_prefix {
        config.tag_prefix = prefix;
    }

    match cli.command {
        Commands::Extract { input } => cmd_extract(&config, &input).await,
        Commands::Apply { input, cycle } => {
            let text = read_input(&input).await?;
            let runner = build_runner(&cli.workspace, &config, &cycle)?;
            let report = with_lease(&cli.workspace, &config, &cycle, |lease, cancel| {
                Box::pin(async move {
                    Ok(runner
                        .run(lease, quill_core::generate::single_fragment(text), cancel)
                        .await)
                })
            })
            .await?;
            finish(&report, cycle.format, &ProblemReporter::new(config.tag_prefix.clone()))
        }
        Commands::Run { prompt, cycle } => {
            let runner = build_runner(&cli.workspace, &config, &cycle)?;
            let report = with_lease(&cli.workspace, &config, &cycle, |lease, cancel| {
                Box::pin(async move {
                    runner
                        .run_conversation(lease, vec![ChatMessage::user(prompt)], cancel)
                        .await
                        .context("Generator failed to start")
                })
            })
            .await?;
            finish(&report, cycle.format, &ProblemReporter::new(config.tag_prefix.clone()))
        }
        Commands::Check { checker } => cmd_check(&cli.workspace, &config, &checker).await,
        Commands::Report { input } => cmd_report(&config, &input).await,
    }
}

async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        use tokio::io::AsyncReadExt;
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read {input}"))
    }
}

fn split_command(line: Option<&str>, configured: &[String]) -> Vec<String> {
    match line {
        Some(line) => line.split_whitespace().map(str::to_string).collect(),
        None => configured.to_vec(),
    }
}

fn build_checker(config: &QuillConfig, args: &CheckerArgs) -> ProcessChecker {
    ProcessChecker::new(
        split_command(args.checker.as_deref(), &config.checker.command),
        config.checker.timeout_secs,
    )
}

fn build_runner(workspace: &Path, config: &QuillConfig, args: &CycleArgs) -> Result<CycleRunner> {
    let root = std::fs::canonicalize(workspace)
        .with_context(|| format!("Workspace {} not found", workspace.display()))?;
    let generator = ProcessGenerator::new(split_command(
        args.generator.as_deref(),
        &config.generator.command,
    ));
    Ok(CycleRunner::new(
        Extractor::new(config.tag_prefix.clone()),
        ChangeApplier::new(Arc::new(FsBackingStore::new(root)), Collaborators::default()),
        Arc::new(build_checker(config, &args.checker)),
        Arc::new(generator),
    ))
}

type CycleFuture<'a> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<CycleReport>> + 'a>>;

/// Hold the workspace lease and a Ctrl-C cancel flag around `body`.
async fn with_lease<F>(
    workspace: &Path,
    config: &QuillConfig,
    args: &CycleArgs,
    body: F,
) -> Result<CycleReport>
where
    F: for<'a> FnOnce(&'a WorkspaceLease, &'a CancelFlag) -> CycleFuture<'a>,
{
    let policy = if args.reject_busy {
        LockPolicy::Reject
    } else {
        config.lock_policy
    };
    let locks = WorkspaceLocks::cross_process();
    let lease = locks.acquire_with(workspace, policy).await?;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event = "cli.cancel_requested");
            on_signal.cancel();
        }
    });

    body(&lease, &cancel).await
}

fn finish(report: &CycleReport, format: OutputFormat, reporter: &ProblemReporter) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print_report(report, reporter),
    }
    match report.status {
        CycleStatus::Applied | CycleStatus::ResolvedAfterFix => Ok(()),
        status => anyhow::bail!("cycle finished with status {status}"),
    }
}

fn print_report(report: &CycleReport, reporter: &ProblemReporter) {
    println!("Cycle {} -> {}", report.cycle_id, report.status);
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    for (round, result) in report.apply_results.iter().enumerate() {
        if round > 0 {
            println!("Fix attempt {round}:");
        }
        for outcome in &result.outcomes {
            let status = match &outcome.status {
                OutcomeStatus::Applied => "ok".to_string(),
                OutcomeStatus::Failed { reason } => format!("FAILED: {reason}"),
                OutcomeStatus::Skipped { reason } => format!("skipped: {reason}"),
            };
            match &outcome.detail {
                Some(detail) => println!("  [{}] {} {} ({detail})", outcome.index, outcome.kind, status),
                None => println!("  [{}] {} {}", outcome.index, outcome.kind, status),
            }
        }
        for kind in &result.commands {
            println!("  requested: {kind}");
        }
        if let Some(summary) = &result.summary {
            println!("  summary: {summary}");
        }
    }
    if let Some(session) = &report.fix_session {
        println!(
            "Auto-fix: {} after {} attempt(s)",
            session.status.as_str(),
            session.attempts
        );
    }
    if !report.final_report.is_empty() {
        println!("{}", reporter.format(&report.final_report));
    }
}

async fn cmd_extract(config: &QuillConfig, input: &str) -> Result<()> {
    let text = read_input(input).await?;
    let extraction = Extractor::new(config.tag_prefix.clone()).extract(&text);
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}

async fn cmd_check(workspace: &Path, config: &QuillConfig, args: &CheckerArgs) -> Result<()> {
    let checker = build_checker(config, args);
    let diagnostics = checker
        .check(workspace)
        .await
        .context("Checker failed to run")?;
    let report = ProblemReport::from_diagnostics(diagnostics);
    let reporter = ProblemReporter::new(config.tag_prefix.clone());
    println!("{}", reporter.format(&report));
    if !report.is_empty() {
        anyhow::bail!("{}", report.summary);
    }
    Ok(())
}

async fn cmd_report(config: &QuillConfig, input: &str) -> Result<()> {
    let text = read_input(input).await?;
    let report = ProblemReporter::new(config.tag_prefix.clone())
        .parse(&text)
        .context("Failed to parse problem report")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_apply_with_overrides() {
        let cli = Cli::try_parse_from([
            "quill",
            "-C",
            "/tmp/ws",
            "apply",
            "response.txt",
            "--checker",
            "npx tsc --noEmit",
            "--reject-busy",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.workspace, PathBuf::from("/tmp/ws"));
        match cli.command {
            Commands::Apply { input, cycle } => {
                assert_eq!(input, "response.txt");
                assert!(cycle.reject_busy);
                assert!(matches!(cycle.format, OutputFormat::Json));
                let config = QuillConfig::default();
                let checker = build_checker(&config, &cycle.checker);
                assert_eq!(checker.command(), ["npx", "tsc", "--noEmit"]);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn split_command_falls_back_to_config() {
        let configured = vec!["make".to_string(), "check".to_string()];
        assert_eq!(split_command(None, &configured), configured);
        assert_eq!(split_command(Some("tsc -p ."), &configured), ["tsc", "-p", "."]);
    }

    #[tokio::test]
    async fn apply_writes_files_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let config = QuillConfig::default();
        let args = CycleArgs {
            checker: CheckerArgs { checker: None },
            generator: None,
            reject_busy: true,
            format: OutputFormat::Json,
        };
        let runner = build_runner(dir.path(), &config, &args).unwrap();
        let report = with_lease(dir.path(), &config, &args, |lease, cancel| {
            Box::pin(async move {
                Ok(runner
                    .run(
                        lease,
                        quill_core::generate::single_fragment(
                            "<quill-write path=\"hello.txt\">hi</quill-write>",
                        ),
                        cancel,
                    )
                    .await)
            })
        })
        .await
        .unwrap();
        assert_eq!(report.status, CycleStatus::Applied);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "hi"
        );
        assert!(finish(&report, OutputFormat::Text, &ProblemReporter::default()).is_ok());
    }

    #[tokio::test]
    async fn reject_busy_sees_a_lease_held_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let other = WorkspaceLocks::cross_process();
        let _held = other.try_acquire(dir.path()).unwrap();

        let config = QuillConfig::default();
        let args = CycleArgs {
            checker: CheckerArgs { checker: None },
            generator: None,
            reject_busy: true,
            format: OutputFormat::Text,
        };
        let err = with_lease(dir.path(), &config, &args, |_, _| {
            Box::pin(async move { Err::<CycleReport, _>(anyhow::anyhow!("body ran")) })
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<quill_core::QuillError>(),
            Some(quill_core::QuillError::WorkspaceBusy(_))
        ));
    }
}
