//! Chainplan - declarative contract deployments
//!
//! Usage:
//!   chainplan deploy ignition/Elearning.toml --network hardhat
//!   chainplan plan ignition/Elearning.toml
//!   chainplan status --network hardhat

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chainplan_core::chain::{Accounts, ChainSnapshot, SimulatedChain, SimulatedSigner};
use chainplan_core::config::{ConfigStore, NetworkKind};
use chainplan_core::deploy::{DeploymentPlan, Deployer};
use chainplan_core::error::DeployError;
use chainplan_core::execute::{
    AbortSignal, DEFAULT_MAX_CONCURRENCY, FutureOutcome, RunOptions, RunReport,
};
use chainplan_core::journal::{FileJournalStore, Journal, JournalRecord};
use chainplan_core::module::load_manifest;
use chainplan_core::params::{EnvSource, ParameterOverrides, ParameterStore, load_parameters_file};

const EXIT_OK: i32 = 0;
const EXIT_BUILD: i32 = 1;
const EXIT_EXECUTION: i32 = 2;

#[derive(Parser)]
#[command(name = "chainplan")]
#[command(about = "Declarative smart-contract deployments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a module, resuming from the journal
    Deploy {
        /// Module manifest (TOML)
        module: PathBuf,

        /// Network profile from chainplan.toml
        #[arg(long, default_value = "hardhat")]
        network: String,

        /// JSON file with run-time parameter values
        #[arg(long)]
        parameters: Option<PathBuf>,

        /// Journal file (default: deployments/<network>/journal.jsonl)
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Config file to use instead of the default lookup
        #[arg(long)]
        config: Option<PathBuf>,

        /// Transactions in flight at once
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
        max_concurrency: usize,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Print the execution order without submitting anything
    Plan {
        /// Module manifest (TOML)
        module: PathBuf,

        /// JSON file with run-time parameter values
        #[arg(long)]
        parameters: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the current journal state
    Status {
        /// Module manifest; lists every planned future, journaled or not
        module: Option<PathBuf>,

        /// JSON file with run-time parameter values
        #[arg(long)]
        parameters: Option<PathBuf>,

        /// Journal file (default: deployments/<network>/journal.jsonl)
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Network whose default journal to read
        #[arg(long, default_value = "hardhat")]
        network: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainplan=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let code = match run_cli(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", style("error:").red().bold(), err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run_cli(command: Commands) -> Result<i32> {
    match command {
        Commands::Deploy {
            module,
            network,
            parameters,
            journal,
            config,
            max_concurrency,
            format,
        } => run_deploy(DeployArgs {
            module,
            network,
            parameters,
            journal,
            config,
            max_concurrency,
            format,
        }),
        Commands::Plan {
            module,
            parameters,
            format,
        } => run_plan(&module, parameters.as_deref(), format),
        Commands::Status {
            module,
            parameters,
            journal,
            network,
            format,
        } => {
            let path = journal.unwrap_or_else(|| default_journal_path(&network));
            match module {
                Some(module) => run_plan_status(&module, parameters.as_deref(), &path, format),
                None => run_status(&path, format),
            }
        }
    }
}

/// Build-time failures (including config and manifest errors) exit 1;
/// anything that went wrong once execution had begun exits 2.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DeployError>() {
        Some(deploy) if !deploy.is_build_time() => EXIT_EXECUTION,
        _ => EXIT_BUILD,
    }
}

struct DeployArgs {
    module: PathBuf,
    network: String,
    parameters: Option<PathBuf>,
    journal: Option<PathBuf>,
    config: Option<PathBuf>,
    max_concurrency: usize,
    format: OutputFormat,
}

fn default_journal_path(network: &str) -> PathBuf {
    Path::new("deployments").join(network).join("journal.jsonl")
}

/// State of the simulated chain lives beside the journal it belongs to.
fn chain_state_path(journal: &Path) -> PathBuf {
    journal.with_extension("chain.json")
}

fn open_simulated_chain(path: &Path, chain_id: u64) -> Result<SimulatedChain> {
    if !path.exists() {
        debug!(path = %path.display(), "starting a fresh simulated chain");
        return Ok(SimulatedChain::new(chain_id));
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chain state: {}", path.display()))?;
    let snapshot: ChainSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse chain state: {}", path.display()))?;
    if snapshot.chain_id != chain_id {
        anyhow::bail!(
            "Chain state {} belongs to chain id {}, but the network uses {}",
            path.display(),
            snapshot.chain_id,
            chain_id
        );
    }
    Ok(SimulatedChain::from_snapshot(snapshot))
}

fn save_simulated_chain(path: &Path, chain: &SimulatedChain) -> Result<()> {
    let content = serde_json::to_string_pretty(&chain.snapshot())?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write chain state: {}", path.display()))
}

fn build_plan(module: &Path, parameters: Option<&Path>) -> Result<DeploymentPlan> {
    let manifest = load_manifest(module)?;
    let overrides = match parameters {
        Some(path) => load_parameters_file(path)?,
        None => ParameterOverrides::new(),
    };
    let store = ParameterStore::new(overrides);
    let plan = DeploymentPlan::build(&manifest.root_module(), &store).map_err(DeployError::from)?;
    Ok(plan)
}

fn run_deploy(args: DeployArgs) -> Result<i32> {
    let plan = build_plan(&args.module, args.parameters.as_deref())?;

    let store = match &args.config {
        Some(path) => ConfigStore::from_file(path.clone()),
        None => ConfigStore::from_defaults()?,
    };
    let config = store.load()?;
    let profile = config
        .network(&args.network)
        .with_context(|| format!("Unknown network '{}'", args.network))?;
    let network = profile.resolve(&args.network, &EnvSource)?;
    if network.kind == NetworkKind::Http {
        anyhow::bail!(
            "Network '{}' uses the http transport, which this build does not provide",
            network.name
        );
    }
    let accounts = Accounts::from_keys(&network.accounts, &SimulatedSigner)
        .map_err(|e| anyhow::anyhow!("Network '{}': {}", network.name, e))?;
    let journal_path = args
        .journal
        .clone()
        .unwrap_or_else(|| default_journal_path(&args.network));
    let chain_path = chain_state_path(&journal_path);
    let chain = Arc::new(open_simulated_chain(
        &chain_path,
        network.chain_id.unwrap_or(31337),
    )?);
    debug!(path = %journal_path.display(), "opening journal");
    let mut journal = FileJournalStore::open(&journal_path)
        .and_then(Journal::open)
        .map_err(DeployError::from)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let report = runtime.block_on(async {
        let abort = AbortSignal::new();
        let on_signal = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.abort();
            }
        });

        let options = RunOptions::default()
            .with_max_concurrency(args.max_concurrency)
            .with_abort(abort);
        Deployer::new(chain.clone(), accounts)
            .with_options(options)
            .deploy(&plan, &mut journal)
            .await
    });
    save_simulated_chain(&chain_path, &chain)?;
    let report = report?;

    match args.format {
        OutputFormat::Table => print_report(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(if report.is_success() {
        EXIT_OK
    } else {
        EXIT_EXECUTION
    })
}

fn run_plan(module: &Path, parameters: Option<&Path>, format: OutputFormat) -> Result<i32> {
    let plan = build_plan(module, parameters)?;
    let batches = plan.graph.batches();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&batches)?);
        }
        OutputFormat::Table => {
            println!("Module: {}", style(&plan.composition.root).bold());
            println!(
                "Futures: {} ({} transactions)",
                plan.graph.len(),
                plan.onchain_count()
            );
            println!();
            for (index, batch) in batches.iter().enumerate() {
                println!("Batch #{}", index + 1);
                for id in batch {
                    let description = plan
                        .composition
                        .registry
                        .get(id)
                        .map(|f| f.describe())
                        .unwrap_or_default();
                    println!("  {:<50} {}", id.as_str(), style(description).dim());
                }
            }
        }
    }
    Ok(EXIT_OK)
}

fn open_existing_journal(path: &Path) -> Result<Journal> {
    if !path.exists() {
        anyhow::bail!("No journal at {}", path.display());
    }
    let journal = FileJournalStore::open(path)
        .and_then(Journal::open)
        .map_err(DeployError::from)?;
    Ok(journal)
}

fn run_plan_status(
    module: &Path,
    parameters: Option<&Path>,
    path: &Path,
    format: OutputFormat,
) -> Result<i32> {
    let plan = build_plan(module, parameters)?;
    let journal = if path.exists() {
        open_existing_journal(path)?
    } else {
        Journal::in_memory()
    };
    let rows = plan.status(&journal);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => {
            println!("Module: {}", style(&plan.composition.root).bold());
            println!("Journal: {}", path.display());
            println!();
            println!("  {:<50} {:<10} Result", "Future", "Status");
            println!("  {}", "-".repeat(80));
            for row in &rows {
                let status = row
                    .status
                    .map(|s| format!("{s:?}").to_lowercase())
                    .unwrap_or_else(|| "new".to_string());
                let detail = row
                    .result
                    .clone()
                    .or_else(|| row.tx_hash.clone())
                    .unwrap_or_else(|| row.description.clone());
                println!("  {:<50} {:<10} {}", row.id.as_str(), status, detail);
            }
        }
    }
    Ok(EXIT_OK)
}

fn run_status(path: &Path, format: OutputFormat) -> Result<i32> {
    let journal = open_existing_journal(path)?;

    match format {
        OutputFormat::Json => {
            let entries: Vec<&JournalRecord> = journal.entries().values().collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Table => {
            println!("Journal: {}", path.display());
            println!();
            if journal.is_empty() {
                println!("No entries recorded.");
                return Ok(EXIT_OK);
            }
            println!("  {:<50} {:<10} Result", "Future", "Status");
            println!("  {}", "-".repeat(80));
            for entry in journal.entries().values() {
                let status = format!("{:?}", entry.status).to_lowercase();
                let detail = entry
                    .result
                    .as_ref()
                    .map(|r| r.display())
                    .or_else(|| entry.error.clone())
                    .or_else(|| entry.external_reference.clone())
                    .unwrap_or_else(|| "-".to_string());
                println!("  {:<50} {:<10} {}", entry.future_id.as_str(), status, detail);
            }
        }
    }
    Ok(EXIT_OK)
}

fn print_report(report: &RunReport) {
    println!("  {:<50} {:<12} Result", "Future", "State");
    println!("  {}", "-".repeat(90));
    for (id, outcome) in &report.outcomes {
        let label = format!("{:<12}", outcome.label());
        let label = match outcome {
            FutureOutcome::Completed { .. } => style(label).green(),
            FutureOutcome::Skipped { .. } => style(label).dim(),
            FutureOutcome::Failed { .. } => style(label).red(),
            FutureOutcome::Blocked { .. } | FutureOutcome::NotStarted => style(label).yellow(),
            FutureOutcome::PendingUnknown { .. } => style(label).magenta(),
        };
        let detail = match outcome {
            FutureOutcome::Completed { result, .. } | FutureOutcome::Skipped { result } => {
                result.display()
            }
            FutureOutcome::Failed { error } => error.clone(),
            FutureOutcome::Blocked { on } => format!("waiting on {on}"),
            FutureOutcome::PendingUnknown { reason } => reason.clone(),
            FutureOutcome::NotStarted => "-".to_string(),
        };
        println!("  {:<50} {} {}", id.as_str(), label, detail);
    }
    println!();

    for orphan in &report.orphaned {
        println!(
            "{} journal entry '{}' matches no future in this build",
            style("warning:").yellow().bold(),
            orphan
        );
    }

    let summary = report.summary();
    let line = format!(
        "Summary: {} completed, {} skipped, {} failed, {} blocked, {} pending, {} transactions submitted",
        summary.completed,
        summary.skipped,
        summary.failed,
        summary.blocked,
        summary.pending,
        report.transactions_submitted
    );
    if report.is_success() {
        println!("{}", style(line).green());
    } else if report.aborted {
        println!("{} (aborted)", style(line).yellow());
    } else {
        println!("{}", style(line).red());
    }
}
