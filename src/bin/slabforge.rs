//! Slabforge Operator Binary
//!
//! Command-line front end for exercising the allocator stacks:
//! - Churn workloads against any storage (allocate/release cycles)
//! - Configuration inspection
//!
//! # Examples
//!
//! ```bash
//! # Churn a pooled chunk storage and print JSON stats
//! slabforge churn --allocator pooled --rounds 100
//!
//! # Use a TOML config
//! slabforge --config storage.toml churn --allocator segmented
//!
//! # Show the effective configuration
//! slabforge --config storage.toml show-config
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use slabforge::storage::ChunkStats;
use slabforge::{BufferKind, Storage, StorageConfig};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Slabforge - slot allocation engine
#[derive(Parser, Debug)]
#[command(name = "slabforge")]
#[command(version = slabforge::VERSION)]
#[command(about = "Slabforge - slot allocation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage config file (TOML)
    #[arg(long, global = true, env = "SLABFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "SLABFORGE_LOG_LEVEL")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an allocate/release workload and print stats as JSON
    Churn(ChurnArgs),

    /// Print the effective storage configuration
    ShowConfig,

    /// Show version
    Version,
}

#[derive(Args, Debug)]
struct ChurnArgs {
    /// Allocator stack to exercise
    #[arg(short, long, value_enum, default_value = "chunk")]
    allocator: AllocatorKind,

    /// Override the configured buffer backend
    #[arg(short, long)]
    buffer: Option<BufferKind>,

    /// Number of fill/drain rounds
    #[arg(short, long, default_value = "10")]
    rounds: usize,

    /// Records allocated per round (defaults to the configured capacity)
    #[arg(short = 'n', long)]
    records: Option<usize>,
}

#[derive(ValueEnum, Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum AllocatorKind {
    Chunk,
    Versioned,
    Fixed,
    Pooled,
    Segmented,
}

#[derive(Serialize, Debug)]
struct ChurnReport {
    allocator: AllocatorKind,
    buffer: BufferKind,
    rounds: usize,
    records: usize,
    allocations: usize,
    releases: usize,
    elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<ChunkStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Churn(args) => churn_command(config, args),
        Commands::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Commands::Version => {
            println!("Slabforge {}", slabforge::VERSION);
            Ok(())
        }
    }
}

/// Setup console logging
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<StorageConfig> {
    match path {
        Some(path) => StorageConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            debug!("No config file given, using defaults");
            Ok(StorageConfig::default())
        }
    }
}

/// Churn command - fill and drain a storage repeatedly
fn churn_command(mut config: StorageConfig, args: ChurnArgs) -> anyhow::Result<()> {
    if let Some(buffer) = args.buffer {
        config.buffer = buffer;
    }
    let records = args.records.unwrap_or(config.capacity);

    info!(
        allocator = ?args.allocator,
        buffer = %config.buffer,
        rounds = args.rounds,
        records,
        "Starting churn"
    );

    let started = Instant::now();
    let mut report = ChurnReport {
        allocator: args.allocator,
        buffer: config.buffer,
        rounds: args.rounds,
        records,
        allocations: 0,
        releases: 0,
        elapsed_ms: 0.0,
        chunks: None,
        segments: None,
    };

    match args.allocator {
        AllocatorKind::Chunk => {
            let mut storage = config.chunk_storage::<u64>()?;
            churn(&mut storage, &args, records, &mut report)?;
            storage.validate()?;
            report.chunks = Some(storage.stats());
        }
        AllocatorKind::Versioned => {
            let mut storage = config.versioned_storage::<u64>()?;
            churn(&mut storage, &args, records, &mut report)?;
            storage.validate()?;
            report.chunks = Some(storage.stats());
        }
        AllocatorKind::Fixed => {
            let mut storage = config.fixed_storage::<u64>()?;
            churn(&mut storage, &args, records, &mut report)?;
        }
        AllocatorKind::Pooled => {
            let mut storage = config.pooled_storage::<u64>()?;
            churn(&mut storage, &args, records, &mut report)?;
            storage.clear()?;
            report.chunks = Some(storage.inner().stats());
        }
        AllocatorKind::Segmented => {
            let mut storage = config.segmented_storage::<u64>()?;
            churn(&mut storage, &args, records, &mut report)?;
            report.segments = Some(storage.segment_count());
        }
    }

    report.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(elapsed_ms = report.elapsed_ms, "Churn complete");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Each round fills `records` slots, then releases every other one before the rest
fn churn<S>(
    storage: &mut S,
    args: &ChurnArgs,
    records: usize,
    report: &mut ChurnReport,
) -> anyhow::Result<()>
where
    S: Storage<Item = u64>,
{
    for round in 0..args.rounds {
        let mut handles = Vec::with_capacity(records);
        for i in 0..records {
            handles.push(storage.allocate_with(i as u64)?);
        }
        report.allocations += records;

        for handle in handles.iter().step_by(2).chain(handles.iter().skip(1).step_by(2)) {
            storage.release(*handle)?;
        }
        report.releases += handles.len();
        debug!(round, live = storage.len(), "Round complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::ffi::OsStr;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_level_env_does_not_clash_with_filter_env() {
        let cmd = Cli::command();
        let arg = cmd
            .get_arguments()
            .find(|a| a.get_id() == "log_level")
            .expect("log_level argument");
        assert_eq!(arg.get_env(), Some(OsStr::new("SLABFORGE_LOG_LEVEL")));
    }

    #[test]
    fn test_parse_churn() {
        let cli = Cli::try_parse_from([
            "slabforge",
            "--log-level",
            "debug",
            "churn",
            "--allocator",
            "segmented",
            "--buffer",
            "bucket",
        ])
        .expect("valid arguments");
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Churn(args) => {
                assert!(matches!(args.allocator, AllocatorKind::Segmented));
                assert_eq!(args.buffer, Some(BufferKind::Bucket));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
