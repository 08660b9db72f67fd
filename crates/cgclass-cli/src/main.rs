use anyhow::{anyhow, Result};
use cgclass_core::{ClassificationContext, ContextStats, RegistryConfig, VERSION};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::*;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod snapshot;

use snapshot::SnapshotReport;

/// Chains longer than this suggest the bucket count is too small for the host
const LONG_CHAIN_WARNING: usize = 8;

/// cgclass - process classification registry for cgroups
#[derive(Parser, Debug)]
#[command(name = "cgclass")]
#[command(version = VERSION)]
#[command(about = "Process classification registry for cgroups", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CGCLASS_CONFIG", default_value = "/etc/cgclass/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and load it into a fresh registry
    Check,

    /// Register running processes from /proc and report classification
    Snapshot,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "cgclass.toml")]
        output: PathBuf,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "cgclass", &mut std::io::stdout());
        return Ok(());
    }

    let _guard = init_logging(cli.verbose, cli.log_dir.as_deref())?;

    info!("cgclass v{} starting...", VERSION);

    match cli.command {
        Some(Commands::GenerateConfig { output }) => generate_config(&output),
        Some(Commands::Snapshot) => run_snapshot(&cli.config, cli.json),
        Some(Commands::Check) | Some(Commands::Completions { .. }) | None => {
            run_check(&cli.config, cli.json)
        }
    }
}

/// Load, validate and apply the configuration
fn run_check(path: &Path, json_output: bool) -> Result<()> {
    let config = load_config(path)?;
    let mut ctx = build_context(&config)?;
    let stats = ctx.stats()?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&json!({ "stats": stats }))?);
    } else {
        println!("{}", "=== cgclass Configuration ===".green().bold());
        print_stats(&stats);
        print_groups(&ctx)?;
    }

    ctx.teardown_all();
    Ok(())
}

/// Register the host's processes and print bucket occupancy
fn run_snapshot(path: &Path, json_output: bool) -> Result<()> {
    let config = load_config(path)?;
    let mut ctx = build_context(&config)?;

    let report = snapshot::register_running(&mut ctx)?;
    let stats = ctx.stats()?;

    if stats.processes.longest_chain > LONG_CHAIN_WARNING {
        warn!(
            "Longest process chain is {} with {} buckets; consider raising process_buckets",
            stats.processes.longest_chain, stats.processes.buckets
        );
    }

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "snapshot": report, "stats": stats }))?
        );
    } else {
        println!("{}", "=== cgclass Snapshot ===".green().bold());
        print_report(&report);
        print_stats(&stats);
        print_groups(&ctx)?;
    }

    ctx.teardown_all();
    Ok(())
}

fn print_report(report: &SnapshotReport) {
    println!("\n{}", "Processes:".cyan());
    println!("  Scanned:     {}", report.scanned);
    println!("  Registered:  {}", report.registered);
    println!("  Classified:  {}", report.classified);
    println!("  Skipped:     {}", report.skipped);
}

fn print_stats(stats: &ContextStats) {
    println!("\n{}", "Indices:".cyan());
    println!("  Partitions:  {}", stats.partitions);
    println!("  Groups:      {}", stats.groups);
    println!("  Rules:       {}", stats.rules);

    let procs = &stats.processes;
    let chain = if procs.longest_chain > LONG_CHAIN_WARNING {
        format!("{}", procs.longest_chain).red()
    } else {
        format!("{}", procs.longest_chain).green()
    };
    println!("\n{}", "Process index:".cyan());
    println!("  Buckets:        {}", procs.buckets);
    println!("  Processes:      {}", procs.processes);
    println!("  Occupied:       {}", procs.occupied_buckets);
    println!("  Longest chain:  {}", chain);
    println!("  Average chain:  {:.2}", procs.average_chain());
}

fn print_groups(ctx: &ClassificationContext) -> Result<()> {
    let mut groups: Vec<_> = ctx.group_index()?.iter().collect();
    if groups.is_empty() {
        return Ok(());
    }
    groups.sort_by(|a, b| a.name.cmp(&b.name));

    println!("\n{}", "Groups:".cyan());
    for group in groups {
        let partition = group.partition.as_deref().unwrap_or("-");
        println!(
            "  {:<20} partition: {:<16} members: {}",
            group.name.bold(),
            partition,
            group.member_count()
        );
    }

    println!();
    Ok(())
}

/// Generate sample configuration file
fn generate_config(output: &Path) -> Result<()> {
    info!("Generating sample configuration file: {:?}", output);

    RegistryConfig::example()
        .save_to_file(output)
        .map_err(|e| anyhow!("Failed to save configuration file: {}", e))?;

    info!("Configuration file generated successfully");
    Ok(())
}

fn build_context(config: &RegistryConfig) -> Result<ClassificationContext> {
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

    config
        .build_context()
        .map_err(|e| anyhow!("Failed to build classification context: {}", e))
}

/// Load configuration from file or use defaults
fn load_config(path: &Path) -> Result<RegistryConfig> {
    if path.exists() {
        info!("Loading configuration from: {:?}", path);
        RegistryConfig::load_from_file(path)
            .map_err(|e| anyhow!("Failed to load configuration file: {}", e))
    } else {
        warn!("Configuration file not found: {:?}, using defaults", path);
        Ok(RegistryConfig::default())
    }
}

/// Initialize logging to stderr and, optionally, a rolling file
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "cgclass.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(false),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}
