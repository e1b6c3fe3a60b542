//! fleetctl - resolve targets, dispatch commands, export results

mod logging;
mod output;
mod settings;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use fleet_core::application::retry::RetrySelection;
use fleet_core::application::{
    DispatchEngine, DispatchRequest, ExportFormat, Exporter, ResultAggregator, TargetResolver,
};
use fleet_core::domain::{DispatchId, ExecutionState, ResultSet, TargetFilter};
use fleet_core::port::id_provider::UuidProvider;
use fleet_core::port::time_provider::SystemTimeProvider;
use fleet_infra_system::{FsArtifactStore, JsonFileInventory, SubprocessTransport};
use settings::Settings;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Exit code when every dispatch step worked but some targets did not succeed
const EXIT_TARGET_FAILURES: u8 = 2;
/// Exit code when the filter resolved to no targets
const EXIT_NO_TARGETS: u8 = 3;

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Run shell commands across a fleet and collect the results", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: platform config dir)
    #[arg(long, global = true, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Inventory file, overrides inventory.path
    #[arg(long, global = true)]
    inventory: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Match a tag, KEY=VALUE (repeatable, all must match)
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,

    /// Only targets registered with the agent
    #[arg(long)]
    managed_only: bool,

    /// Match a platform name
    #[arg(long)]
    platform: Option<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> TargetFilter {
        let mut filter = self
            .tags
            .iter()
            .fold(TargetFilter::All, |f, (k, v)| f.and(TargetFilter::tag(k, v)));
        if let Some(platform) = &self.platform {
            filter = filter.and(TargetFilter::platform(platform));
        }
        if self.managed_only {
            filter = filter.managed_only();
        }
        filter
    }
}

#[derive(Args, Debug, Default)]
struct ExportArgs {
    /// Export format (repeatable; default from export.formats)
    #[arg(long = "format")]
    formats: Vec<ExportFormat>,

    /// Export directory (default from export.destination)
    #[arg(long)]
    out: Option<String>,

    /// Skip exporting
    #[arg(long)]
    no_export: bool,
}

#[derive(Args, Debug, Default)]
struct TuningArgs {
    /// Per-target timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Targets worked on at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Stop waiting after this many milliseconds and report partial results
    #[arg(long)]
    wait_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the targets a filter resolves to
    Targets {
        #[command(flatten)]
        filter: FilterArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Dispatch commands to every matching target
    Run {
        #[command(flatten)]
        filter: FilterArgs,

        /// Shell command (repeatable, run in order)
        #[arg(short = 'c', long = "command", required = true)]
        commands: Vec<String>,

        /// Document name recorded with the dispatch
        #[arg(long)]
        document: Option<String>,

        /// Free-form comment recorded with the dispatch
        #[arg(long)]
        comment: Option<String>,

        /// Automatic retry passes over failed and timed-out targets
        #[arg(long, default_value = "0")]
        retries: u32,

        #[command(flatten)]
        tuning: TuningArgs,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Re-run the failed targets of an exported JSON report
    Retry {
        /// JSON report written by `run`
        report: PathBuf,

        /// Retry only FAILED targets
        #[arg(long, conflicts_with = "timed_out_only")]
        failed_only: bool,

        /// Retry only TIMED_OUT targets
        #[arg(long)]
        timed_out_only: bool,

        #[command(flatten)]
        tuning: TuningArgs,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Show an exported JSON report
    Show {
        report: PathBuf,

        /// Only rows in this state
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StateArg {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl From<StateArg> for ExecutionState {
    fn from(s: StateArg) -> Self {
        match s {
            StateArg::Pending => ExecutionState::Pending,
            StateArg::Running => ExecutionState::Running,
            StateArg::Succeeded => ExecutionState::Succeeded,
            StateArg::Failed => ExecutionState::Failed,
            StateArg::TimedOut => ExecutionState::TimedOut,
        }
    }
}

fn parse_tag(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Composition root: adapters wired into the core services
struct App {
    settings: Settings,
    wait_limit: Option<Duration>,
    resolver: TargetResolver,
    engine: Arc<DispatchEngine>,
    exporter: Exporter,
}

impl App {
    fn build(mut settings: Settings, tuning: &TuningArgs) -> Result<Self> {
        if let Some(ms) = tuning.timeout_ms {
            settings.dispatch.target_timeout_ms = ms;
        }
        if let Some(n) = tuning.max_concurrency {
            settings.dispatch.max_concurrency = n;
        }
        settings.dispatch.validate()?;

        let inventory = Arc::new(JsonFileInventory::new(&settings.inventory.path));
        let transport = Arc::new(SubprocessTransport::new(settings.transport.clone()));
        let store = Arc::new(FsArtifactStore::new("."));

        let engine = DispatchEngine::new(
            transport,
            Arc::new(ResultAggregator::new()),
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
            settings.dispatch.clone(),
        );

        Ok(Self {
            wait_limit: tuning.wait_ms.map(Duration::from_millis),
            resolver: TargetResolver::new(inventory),
            engine: Arc::new(engine),
            exporter: Exporter::new(store),
            settings,
        })
    }

    /// Wait for a dispatch, turning Ctrl-C into a cancellation request
    async fn wait(&self, dispatch_id: &DispatchId, targets: usize) -> Result<ResultSet> {
        let engine = Arc::clone(&self.engine);
        let id = dispatch_id.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Interrupted, cancelling dispatch...".yellow());
                if let Err(e) = engine.cancel(&id).await {
                    warn!(error = %e, "Cancel failed");
                }
            }
        });

        // Every target ends within its timeout once it holds a worker slot
        let config = self.engine.config();
        let waves = targets.div_ceil(config.max_concurrency.max(1)) as u32;
        let bound = self
            .wait_limit
            .unwrap_or_else(|| config.target_timeout() * (waves + 1) + config.poll_interval() * 4);

        let result = self
            .engine
            .aggregator()
            .await_completion(dispatch_id, bound)
            .await;
        interrupt.abort();
        Ok(result?)
    }

    async fn export(&self, result_set: &ResultSet, args: &ExportArgs) -> Result<()> {
        if args.no_export {
            return Ok(());
        }
        let formats = if args.formats.is_empty() {
            &self.settings.export.formats
        } else {
            &args.formats
        };
        let destination = match &args.out {
            Some(out) => settings::expand_path(out)?,
            None => self.settings.export.destination.clone(),
        };
        let artifacts = self
            .exporter
            .export_all(result_set, formats, &destination)
            .await?;
        output::print_artifacts(&artifacts);
        Ok(())
    }

    async fn report(&self, result_set: &ResultSet, args: &ExportArgs) -> Result<()> {
        println!();
        output::print_header(result_set);
        println!("{}", output::executions_table(result_set, None));
        output::print_summary(result_set);
        self.export(result_set, args).await?;
        if result_set.is_completed() {
            self.engine.aggregator().release(result_set.dispatch_id()).await?;
        }
        Ok(())
    }
}

fn exit_code(result_set: &ResultSet) -> ExitCode {
    let summary = result_set.summary();
    if summary.succeeded == summary.total {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_TARGET_FAILURES)
    }
}

async fn load_report(path: &Path) -> Result<ResultSet> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Cannot read report {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("{} is not a JSON report", path.display()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(inventory) = &cli.inventory {
        settings.inventory.path = settings::expand_path(inventory)?;
    }
    let _log_guard = logging::init(&settings.log, cli.verbose)?;
    info!(version = fleet_core::VERSION, "fleetctl starting");

    match cli.command {
        Commands::Targets { filter, json } => {
            let app = App::build(settings, &TuningArgs::default())?;
            let targets = app.resolver.resolve(&filter.to_filter()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&targets)?);
            } else {
                println!("{}", output::targets_table(&targets));
                println!("{}", format!("{} targets", targets.len()).cyan());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            filter,
            commands,
            document,
            comment,
            retries,
            tuning,
            export,
        } => {
            let app = App::build(settings, &tuning)?;
            let filter = filter.to_filter();
            let targets = app.resolver.resolve(&filter).await?;
            if targets.is_empty() {
                eprintln!("{}", format!("No targets match {}", filter).yellow());
                return Ok(ExitCode::from(EXIT_NO_TARGETS));
            }
            println!(
                "{}",
                format!("Dispatching to {} targets ({})", targets.len(), filter)
                    .cyan()
                    .bold()
            );

            let mut request = DispatchRequest::new(commands, targets);
            if let Some(document) = document {
                request = request.with_document(document);
            }
            if let Some(comment) = comment {
                request = request.with_comment(comment);
            }

            let count = request.targets.len();
            let id = app.engine.dispatch(request).await?;
            let mut result_set = app.wait(&id, count).await?;
            app.report(&result_set, &export).await?;

            for pass in 1..=retries {
                let selection = RetrySelection::default();
                let remaining = selection.select(&result_set).len();
                if remaining == 0 || !result_set.is_completed() {
                    break;
                }
                println!();
                println!(
                    "{}",
                    format!("Retry pass {}/{}: {} targets", pass, retries, remaining)
                        .cyan()
                        .bold()
                );
                let id = app.engine.retry(&result_set, selection).await?;
                result_set = app.wait(&id, remaining).await?;
                app.report(&result_set, &export).await?;
            }

            Ok(exit_code(&result_set))
        }

        Commands::Retry {
            report,
            failed_only,
            timed_out_only,
            tuning,
            export,
        } => {
            let previous = load_report(&report).await?;
            let selection = if failed_only {
                RetrySelection::failed_only()
            } else if timed_out_only {
                RetrySelection::timed_out_only()
            } else {
                RetrySelection::default()
            };
            let count = selection.select(&previous).len();
            if count == 0 {
                println!("{}", "Nothing to retry".green());
                return Ok(ExitCode::SUCCESS);
            }

            let app = App::build(settings, &tuning)?;
            let id = app.engine.retry(&previous, selection).await?;
            let result_set = app.wait(&id, count).await?;
            app.report(&result_set, &export).await?;
            Ok(exit_code(&result_set))
        }

        Commands::Show { report, state } => {
            let result_set = load_report(&report).await?;
            output::print_header(&result_set);
            println!(
                "{}",
                output::executions_table(&result_set, state.map(ExecutionState::from))
            );
            output::print_summary(&result_set);
            Ok(exit_code(&result_set))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("env=lab").unwrap(), ("env".to_string(), "lab".to_string()));
        assert_eq!(parse_tag("note=a=b").unwrap().1, "a=b");
        assert!(parse_tag("env").is_err());
        assert!(parse_tag("=lab").is_err());
    }

    #[test]
    fn test_filter_args() {
        let args = FilterArgs {
            tags: vec![("env".to_string(), "lab".to_string())],
            managed_only: true,
            platform: None,
        };
        assert_eq!(
            args.to_filter(),
            TargetFilter::tag("env", "lab").managed_only()
        );
        assert_eq!(FilterArgs::default().to_filter(), TargetFilter::All);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "fleetctl", "run", "--tag", "env=lab", "--managed-only", "-c", "uptime", "-c",
            "df -h", "--format", "csv", "--retries", "1",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                commands,
                retries,
                export,
                ..
            } => {
                assert_eq!(commands, ["uptime", "df -h"]);
                assert_eq!(retries, 1);
                assert_eq!(export.formats, [ExportFormat::Csv]);
            }
            _ => panic!("expected run"),
        }
    }
}
