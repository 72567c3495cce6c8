//! # FlowCore CLI
//!
//! Usage:
//!   flowcore plan graph.json                 # execution order + parallel levels
//!   flowcore plan graph.json --algorithm dfs # depth-first order
//!   flowcore schedule "0 9 * * 1-5" -n 3     # next firing times
//!   flowcore config                          # effective configuration as TOML

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flowcore_core::FlowConfig;
use flowcore_graph::{DependencyGraph, GraphSnapshot, SortAlgorithm};
use flowcore_scheduler::CronExpr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowcore", version, about = "🔀 FlowCore — workflow orchestration toolkit")]
struct Cli {
    /// Config file (defaults to ~/.flowcore/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Order the nodes of a graph snapshot (JSON)
    Plan {
        file: String,
        #[arg(short, long, value_enum, default_value = "kahn")]
        algorithm: Algorithm,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Show upcoming runs of a cron expression
    Schedule {
        expression: String,
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
    /// Print the effective configuration
    Config {
        /// Print only the path the configuration was read from
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    Kahn,
    Dfs,
}

impl From<Algorithm> for SortAlgorithm {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Kahn => SortAlgorithm::Kahn,
            Algorithm::Dfs => SortAlgorithm::DepthFirst,
        }
    }
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(cli: &Cli) -> Result<(FlowConfig, PathBuf)> {
    match &cli.config {
        Some(raw) => {
            let path = expand_path(raw);
            let config = FlowConfig::load_from(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            Ok((config, path))
        }
        None => Ok((FlowConfig::load()?, FlowConfig::default_path())),
    }
}

fn init_logging(config: &FlowConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn plan(file: &str, algorithm: SortAlgorithm, json: bool) -> Result<()> {
    let path = expand_path(file);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let snapshot: GraphSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    let graph: DependencyGraph = DependencyGraph::from_snapshot(&snapshot)?;
    tracing::debug!("📊 Loaded {} node(s) from {}", graph.len(), path.display());

    let order = graph.execution_order(algorithm)?;
    let levels = graph.execution_levels()?;

    if json {
        let out = serde_json::json!({
            "algorithm": algorithm.to_string(),
            "order": order,
            "levels": levels,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("🔀 Execution order ({algorithm}):");
    for (i, id) in order.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, id);
    }
    println!("\n⚡ Parallel levels:");
    for (i, level) in levels.iter().enumerate() {
        println!("  [{}] {}", i, level.join(", "));
    }
    Ok(())
}

fn schedule(expression: &str, count: usize) -> Result<()> {
    let cron = CronExpr::parse(expression)?;
    let mut after = chrono::Utc::now();
    println!("📅 {cron}");
    for _ in 0..count {
        match cron.next_after(after) {
            Some(next) => {
                println!("  {}", next.to_rfc3339());
                after = next;
            }
            None => {
                println!("  (no further runs)");
                break;
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = load_config(&cli)?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Command::Plan {
            ref file,
            algorithm,
            json,
        } => plan(file, algorithm.into(), json),
        Command::Schedule {
            ref expression,
            count,
        } => schedule(expression, count),
        Command::Config { path } => {
            if path {
                println!("{}", config_path.display());
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
    }
}
