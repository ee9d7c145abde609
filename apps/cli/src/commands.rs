//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use uuid::Uuid;

use intakesync_core::{
    ClassifyOptions, ClassifyRunResult, Classifier, ProgressReporter, RecordOutcome,
    SyncRunResult, Synchronizer, run_classification, run_sync,
};
use intakesync_notion::NotionClient;
use intakesync_sheets::CsvWorkbook;
use intakesync_shared::{
    AppConfig, expand_home, init_config, load_config, load_config_from, validate_notion,
};
use intakesync_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// IntakeSync: classify intake requests and sync them to Notion.
#[derive(Parser)]
#[command(
    name = "intakesync",
    version,
    about = "Classify intake form responses into requests and sync them to a Notion database.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.intakesync/intakesync.toml).
    #[arg(long, global = true, env = "INTAKESYNC_CONFIG")]
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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Classify the intake sheet and rewrite the staging sheet.
    Classify,

    /// Upsert every staging row into the Notion database.
    Sync,

    /// Classify, then sync.
    Run,

    /// Show recent runs from the local ledger.
    History {
        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Show per-record outcomes of one run.
        #[arg(long)]
        run: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "intakesync=info",
        1 => "intakesync=debug",
        _ => "intakesync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Classify => {
            let config = load(config_path)?;
            cmd_classify(&config).await.map(|_| ())
        }
        Command::Sync => {
            let config = load(config_path)?;
            cmd_sync(&config).await
        }
        Command::Run => {
            let config = load(config_path)?;
            // Fail on missing credentials before touching the staging sheet.
            validate_notion(&config)?;
            cmd_classify(&config).await?;
            cmd_sync(&config).await
        }
        Command::History { limit, run } => {
            let config = load(config_path)?;
            cmd_history(&config, limit, run.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn open_ledger(config: &AppConfig) -> Result<Option<Arc<Storage>>> {
    if !config.ledger.enabled {
        info!("ledger disabled; runs are not recorded and records are not leased");
        return Ok(None);
    }
    let path = expand_home(&config.ledger.path);
    let storage = Storage::open(&path).await?;
    Ok(Some(Arc::new(storage)))
}

fn open_workbook(config: &AppConfig) -> Result<CsvWorkbook> {
    Ok(CsvWorkbook::open(expand_home(&config.workbook.dir))?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_classify(config: &AppConfig) -> Result<ClassifyRunResult> {
    let store = open_workbook(config)?;
    let classifier = Classifier::new(config.schema.clone())?;
    let ledger = open_ledger(config).await?;
    let opts = ClassifyOptions::from_config(config);

    info!(
        intake = %opts.intake_sheet,
        staging = %opts.staging_sheet,
        schema_version = classifier.mapping().version,
        "classifying intake"
    );

    let reporter = CliProgress::new();
    let result = run_classification(
        &store,
        &classifier,
        &opts,
        ledger.as_deref(),
        &reporter,
    )
    .await;
    reporter.finish();
    let result = result?;

    println!();
    println!("  Classification complete");
    println!("  Rows:       {}", result.report.total());
    println!("  Classified: {}", result.report.records.len());
    println!("  Discarded:  {}", result.report.discarded.len());
    println!("  Failed:     {}", result.report.failed.len());
    println!("  Merged:     {}", result.merged);
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    for issue in &result.report.failed {
        println!("    row {}: {}", issue.position, issue.message);
    }
    println!();

    Ok(result)
}

async fn cmd_sync(config: &AppConfig) -> Result<()> {
    let notion = validate_notion(config)?;
    let store = open_workbook(config)?;
    let ledger = open_ledger(config).await?;

    let database_id = notion.database_id.clone();
    let client = NotionClient::new(notion)?;
    let mut synchronizer = Synchronizer::new(Arc::new(client), database_id);
    if let Some(storage) = &ledger {
        let owner = Uuid::now_v7().to_string();
        synchronizer = synchronizer.with_leases(
            storage.clone(),
            owner,
            Duration::from_secs(config.ledger.lease_ttl_secs),
        );
    }

    info!(
        staging = %config.workbook.staging_sheet,
        database_id = %synchronizer.database_id(),
        "syncing staging sheet"
    );

    let reporter = CliProgress::new();
    let result = run_sync(
        &store,
        &synchronizer,
        &config.workbook.staging_sheet,
        ledger.as_deref(),
        &reporter,
    )
    .await;
    reporter.finish();
    print_sync_summary(&result?);

    Ok(())
}

fn print_sync_summary(result: &SyncRunResult) {
    let summary = &result.summary;
    println!();
    println!("  Sync complete");
    println!("  Created: {}", summary.created);
    println!("  Updated: {}", summary.updated);
    println!("  Skipped: {}", summary.skipped);
    println!("  Failed:  {}", summary.failed);
    println!("  Invalid: {}", result.staging_issues.len());
    if let Some(run_id) = &result.run_id {
        println!("  Run:     {run_id}");
    }
    println!("  Time:    {:.1}s", result.elapsed.as_secs_f64());

    for outcome in &summary.outcomes {
        if matches!(outcome, RecordOutcome::Created { .. } | RecordOutcome::Updated { .. }) {
            continue;
        }
        if let Some(detail) = outcome.detail() {
            println!("    id {} {}: {detail}", outcome.id(), outcome.label());
        }
    }
    for issue in &result.staging_issues {
        println!("    row {} invalid: {}", issue.row, issue.message);
    }
    println!();
}

async fn cmd_history(config: &AppConfig, limit: u32, run: Option<&str>) -> Result<()> {
    let path = expand_home(&config.ledger.path);
    let storage = Storage::open_readonly(&path).await?;

    if let Some(run_id) = run {
        let outcomes = storage.outcomes_for_run(run_id).await?;
        if outcomes.is_empty() {
            return Err(eyre!("no outcomes recorded for run '{run_id}'"));
        }
        for o in outcomes {
            println!(
                "  {:>5}  {:<8} {}  {}",
                o.record_id,
                o.outcome,
                o.page_id.as_deref().unwrap_or("-"),
                o.detail.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    }

    let runs = storage.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded in {}", path.display());
        return Ok(());
    }
    for r in runs {
        println!(
            "  {}  {:<8}  {}  {}",
            r.id,
            r.pipeline,
            r.started_at,
            r.stats_json.as_deref().unwrap_or("(unfinished)")
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn record_synced(&self, outcome: &RecordOutcome, current: usize, total: usize) {
        self.spinner.set_message(format!(
            "Syncing [{current}/{total}] id {} {}",
            outcome.id(),
            outcome.label()
        ));
    }
}
