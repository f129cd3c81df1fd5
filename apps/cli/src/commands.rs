//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kbforge_core::{
    ConnectorRegistry, IndexingHandler, IngestionHandler, ManagedExecutor, PublishingHandler,
    RecordingEventBus, Scheduler, SchedulerConfig, StepRegistry, TaskQueue,
};
use kbforge_shared::{
    AppConfig, BuildType, IndexingPayload, IngestionMode, IngestionPayload, PublishStrategy,
    PublishingPayload, ResultDetails, Task, TaskResult, TaskStatus, init_config, load_config,
    load_config_from,
};
use kbforge_storage::{IndexStorage, MemoryIndexStorage, MemoryRawFileStorage, RawFileStorage};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbforge: ingest, index and publish knowledge bases.
#[derive(Parser)]
#[command(
    name = "kbforge",
    version,
    about = "Run knowledge-base ingestion, indexing and publishing pipelines.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.kbforge/kbforge.toml.
    #[arg(long, global = true, env = "KBFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Alias update strategy, as accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StrategyArg {
    BlueGreen,
    Replace,
}

impl From<StrategyArg> for PublishStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::BlueGreen => PublishStrategy::BlueGreen,
            StrategyArg::Replace => PublishStrategy::Replace,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest a directory, build an index version and publish it.
    Run(RunArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Knowledge base id.
    #[arg(long)]
    pub kb: String,

    /// Directory of documents to ingest.
    #[arg(long)]
    pub source: PathBuf,

    /// Version id for the build (defaults to a hex millisecond timestamp).
    #[arg(long)]
    pub version: Option<String>,

    /// Publish target (defaults to the first configured environment).
    #[arg(long)]
    pub environment: Option<String>,

    /// Alias to point at the new collection (defaults to the KB id).
    #[arg(long)]
    pub alias: Option<String>,

    /// Alias update strategy.
    #[arg(long, value_enum, default_value = "blue-green")]
    pub strategy: StrategyArg,

    /// Worker threads (overrides `[scheduler] worker_count`).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Per-stage wait limit in seconds.
    #[arg(long, default_value = "600")]
    pub timeout: u64,

    /// Write all task results and events as JSON to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const LOG_TARGETS: &[&str] = &[
    "kbforge",
    "kbforge_core",
    "kbforge_shared",
    "kbforge_storage",
    "kbforge_connectors",
    "kbforge_steps",
];

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives: Vec<String> = LOG_TARGETS.iter().map(|t| format!("{t}={level}")).collect();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run(args) => cmd_run(&resolve_config(config_path)?, args),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(config_path)?),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Version id for runs without `--version`: the low 32 bits of the epoch
/// milliseconds in hex. Collection names keep only eight characters of the
/// version, so every character must vary between runs.
fn default_version(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("{:08x}", now.timestamp_millis() & 0xffff_ffff)
}

/// The three tasks of one pipeline run, in execution order.
fn build_tasks(config: &AppConfig, args: &RunArgs, version: &str, environment: &str) -> [Task; 3] {
    let ingestion = Task::ingestion(&args.kb, version, IngestionPayload {
        connector_type: "filesystem".into(),
        connector_config: serde_json::json!({
            "root": args.source,
            "extensions": config.ingestion.extensions,
        }),
        mode: IngestionMode::Full,
        since: None,
        dedup_strategy: config.ingestion.dedup_strategy,
    });
    let indexing = Task::indexing(&args.kb, version, IndexingPayload {
        pipeline_config: config.pipeline.steps.clone(),
        build_type: BuildType::Full,
        file_ids: None,
        collection_name: None,
    });
    let publishing = Task::publishing(&args.kb, version, PublishingPayload {
        target_environment_id: environment.to_string(),
        alias_name: args.alias.clone().unwrap_or_else(|| args.kb.clone()),
        strategy: args.strategy.into(),
        collection_name: None,
    });

    [ingestion, indexing, publishing].map(|task| {
        task.with_priority(config.queue.default_priority)
            .with_max_retries(config.queue.default_max_retries)
    })
}

fn cmd_run(config: &AppConfig, args: RunArgs) -> Result<()> {
    if !args.source.is_dir() {
        return Err(eyre!("source '{}' is not a directory", args.source.display()));
    }

    let environment = match &args.environment {
        Some(id) => id.clone(),
        None => config
            .environments
            .first()
            .map(|e| e.id.clone())
            .ok_or_else(|| eyre!("no environments configured; pass --environment"))?,
    };
    if !config.environments.iter().any(|e| e.id == environment) {
        return Err(eyre!("unknown environment '{environment}'"));
    }

    let version = args
        .version
        .clone()
        .unwrap_or_else(|| default_version(chrono::Utc::now()));

    let mut scheduler_config = SchedulerConfig::from(config);
    if let Some(workers) = args.workers {
        scheduler_config.worker_count = workers;
    }

    // Reference collaborators: in-memory stores shared by every environment.
    let raw_files: Arc<dyn RawFileStorage> = Arc::new(MemoryRawFileStorage::new());
    let index: Arc<dyn IndexStorage> = Arc::new(MemoryIndexStorage::new());

    let mut connectors = ConnectorRegistry::new();
    kbforge_connectors::register_builtin_connectors(&mut connectors)?;
    let mut steps = StepRegistry::new();
    kbforge_steps::register_builtin_steps(&mut steps)?;

    let publishing = config
        .environments
        .iter()
        .fold(PublishingHandler::new(), |handler, env| {
            handler.with_environment(env.id.clone(), Arc::clone(&index))
        });

    let queue = Arc::new(TaskQueue::new());
    let events = Arc::new(RecordingEventBus::new());
    let scheduler = Scheduler::with_event_bus(Arc::clone(&queue), scheduler_config, events.clone());
    scheduler.register_executor(Arc::new(ManagedExecutor::new(IngestionHandler::new(
        Arc::new(connectors),
        Arc::clone(&raw_files),
    ))))?;
    scheduler.register_executor(Arc::new(ManagedExecutor::new(IndexingHandler::new(
        Arc::clone(&raw_files),
        Arc::clone(&index),
        Arc::new(steps),
    ))))?;
    scheduler.register_executor(Arc::new(ManagedExecutor::new(publishing)))?;

    info!(
        kb = %args.kb,
        version = %version,
        environment = %environment,
        workers = scheduler.config().worker_count,
        "starting pipeline run"
    );
    scheduler.start()?;

    let timeout = Duration::from_secs(args.timeout);
    let mut results: Vec<TaskResult> = Vec::new();
    let mut failure = None;
    for task in build_tasks(config, &args, &version, &environment) {
        let label = task.task_type().as_str();
        match run_stage(&scheduler, task, timeout) {
            Ok(result) => {
                print_result(&result);
                let ok = result.status == TaskStatus::Completed;
                results.push(result);
                if !ok {
                    failure = Some(eyre!("{label} task did not complete; later stages skipped"));
                    break;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let detached = scheduler.stop(true, scheduler.config().stop_timeout);
    if detached > 0 {
        warn!(detached, "workers still busy after stop timeout");
    }

    if let Some(path) = &args.report {
        let report = serde_json::json!({
            "knowledge_base_id": args.kb,
            "knowledge_base_version_id": version,
            "environment_id": environment,
            "results": results,
            "events": events.events(),
        });
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .map_err(|e| eyre!("failed to write report {}: {e}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    match failure {
        Some(e) => Err(e),
        None => {
            println!();
            println!("  Published {} {version} to {environment}", args.kb);
            println!();
            Ok(())
        }
    }
}

/// Enqueue `task` and block until it is terminal, showing a spinner.
/// A stage that outlives `timeout` is cancelled before returning.
fn run_stage(scheduler: &Scheduler, task: Task, timeout: Duration) -> Result<TaskResult> {
    let queue = scheduler.queue();
    let label = task.task_type().as_str();
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message(format!("{label} {}", task.id));

    let task_id = queue.enqueue(task, Duration::ZERO)?;
    let status = queue.wait_for_terminal(&task_id, timeout);
    spinner.finish_and_clear();

    let Some(status) = status else {
        if !scheduler.cancel(&task_id) {
            warn!(task_id = %task_id, "timed-out task could not be cancelled");
        }
        return Err(eyre!("{label} task {task_id} timed out after {}s", timeout.as_secs()));
    };
    queue.get_result(&task_id).ok_or_else(|| {
        let task = queue.get_task(&task_id);
        eyre!(
            "{label} task {task_id} ended {status} without a result ({} retries)",
            task.map_or(0, |t| t.retry_count)
        )
    })
}

fn print_result(result: &TaskResult) {
    println!(
        "  {:<11} {:<10} {} items ({} ok, {} failed, {} skipped) {:.2}s",
        result.task_type.as_str(),
        result.status.as_str(),
        result.total_items,
        result.succeeded_count,
        result.failed_count,
        result.skipped_count,
        result.duration_seconds(),
    );
    match &result.details {
        ResultDetails::Ingestion(d) => println!(
            "              new {}, updated {}, unchanged {}",
            d.new_files, d.updated_files, d.unchanged_files
        ),
        ResultDetails::Indexing(d) => {
            println!("              {} records -> {}", d.records_written, d.collection_name);
            for stats in &d.step_stats {
                println!(
                    "              {:<12} in {:>4}  out {:>4}  errors {}",
                    stats.step_type, stats.input_count, stats.output_count, stats.errors_count
                );
            }
        }
        ResultDetails::Publishing(d) => println!(
            "              {}:{} -> {} ({}, was {})",
            d.environment_id,
            d.alias_name,
            d.collection_name,
            d.strategy,
            d.previous_collection.as_deref().unwrap_or("unset")
        ),
    }
    for error in result.errors.iter().take(5) {
        println!("              ! {}: {}", error.item_name, error.error_message);
    }
    if result.errors.len() > 5 {
        println!("              ! ... {} more", result.errors.len() - 5);
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kbforge_core::{ExecutionContext, TaskHandler, collection_name};
    use kbforge_shared::{IngestionDetails, TaskPayload, TaskType};

    /// Ingestion handler that spins until its task is cancelled.
    struct UntilCancelled;

    impl TaskHandler for UntilCancelled {
        fn task_type(&self) -> TaskType {
            TaskType::Ingestion
        }

        fn validate(&self, _task: &Task) -> Vec<String> {
            Vec::new()
        }

        fn execute_impl(&self, task: &Task, ctx: &ExecutionContext<'_>) -> kbforge_shared::Result<TaskResult> {
            let started_at = Utc::now();
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(self.cancelled_result(task, started_at))
        }

        fn empty_details(&self, _task: &Task) -> ResultDetails {
            ResultDetails::Ingestion(IngestionDetails::default())
        }
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("kbforge").chain(args.iter().copied())).unwrap()
    }

    fn run_args(cli: Cli) -> RunArgs {
        match cli.command {
            Command::Run(args) => args,
            Command::Config { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn run_defaults() {
        let args = run_args(parse(&["run", "--kb", "docs", "--source", "./docs"]));
        assert_eq!(args.kb, "docs");
        assert!(matches!(args.strategy, StrategyArg::BlueGreen));
        assert_eq!(args.timeout, 600);
        assert!(args.workers.is_none());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = parse(&["run", "--kb", "k", "--source", "s", "-vv", "--log-format", "json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
    }

    #[test]
    fn strategy_uses_kebab_case() {
        let args = run_args(parse(&["run", "--kb", "k", "--source", "s", "--strategy", "replace"]));
        assert_eq!(PublishStrategy::from(args.strategy), PublishStrategy::Replace);
        assert!(Cli::try_parse_from(["kbforge", "run", "--kb", "k", "--source", "s", "--strategy", "swap"]).is_err());
    }

    #[test]
    fn tasks_follow_config_defaults() {
        let mut config = AppConfig::default();
        config.queue.default_priority = 4;
        config.queue.default_max_retries = 1;
        let args = run_args(parse(&["run", "--kb", "docs", "--source", "/tmp/docs"]));
        let [ingestion, indexing, publishing] = build_tasks(&config, &args, "v1", "local");

        for task in [&ingestion, &indexing, &publishing] {
            assert_eq!(task.priority, 4);
            assert_eq!(task.max_retries, 1);
            assert_eq!(task.knowledge_base_version_id, "v1");
        }
        let TaskPayload::Ingestion(payload) = &ingestion.payload else {
            panic!("expected ingestion payload");
        };
        assert_eq!(payload.connector_config["root"], serde_json::json!("/tmp/docs"));
        let TaskPayload::Indexing(payload) = &indexing.payload else {
            panic!("expected indexing payload");
        };
        assert_eq!(payload.pipeline_config.len(), config.pipeline.steps.len());
        let TaskPayload::Publishing(payload) = &publishing.payload else {
            panic!("expected publishing payload");
        };
        assert_eq!(payload.alias_name, "docs");
        assert_eq!(payload.target_environment_id, "local");
    }

    #[test]
    fn default_versions_give_distinct_collections() {
        let first = Utc.with_ymd_and_hms(2026, 10, 10, 9, 0, 0).unwrap();
        let later_day = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let next_ms = first + chrono::TimeDelta::milliseconds(1);

        let name = |at| collection_name("docs", &default_version(at));
        assert_ne!(name(first), name(later_day));
        assert_ne!(name(first), name(next_ms));
        assert_eq!(default_version(first).len(), 8);
    }

    #[test]
    fn timed_out_running_stage_is_cancelled() {
        let config = SchedulerConfig {
            worker_count: 1,
            poll_interval: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(5),
            task_types: vec![TaskType::Ingestion],
        };
        let scheduler = Scheduler::new(Arc::new(TaskQueue::new()), config);
        scheduler
            .register_executor(Arc::new(ManagedExecutor::new(UntilCancelled)))
            .unwrap();
        scheduler.start().unwrap();

        let task = Task::ingestion("docs", "v1", IngestionPayload {
            connector_type: "filesystem".into(),
            connector_config: serde_json::Value::Null,
            mode: IngestionMode::Full,
            since: None,
            dedup_strategy: Default::default(),
        });
        let task_id = task.id.clone();
        let err = run_stage(&scheduler, task, Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("timed out"));

        assert_eq!(
            scheduler.queue().wait_for_terminal(&task_id, Duration::from_secs(5)),
            Some(TaskStatus::Cancelled)
        );
        assert_eq!(scheduler.stop(true, Duration::from_secs(5)), 0);
    }
}
