//! Changefeed CLI - cf command

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli_lib::SystemConfig;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod cmd;

/// Changefeed - rate-limited change feed over watched directories
#[derive(Parser)]
#[command(name = "cf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/changefeed/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configured directories and deliver changes
    Run {
        /// Stop once the feed has caught up
        #[arg(long)]
        once: bool,
    },
    /// Show feed, checkpoint and schedule status
    Status,
    /// Discard snapshots and the persisted checkpoint
    Clean {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// View configuration
    Config {
        /// List all configuration values
        #[arg(long)]
        list: bool,
        /// Get a specific config value (e.g., traversal.load_per_minute)
        #[arg(long)]
        get: Option<String>,
        /// Show example config file
        #[arg(long)]
        example: bool,
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Install the stderr subscriber and, when configured, a daily rolling log file
fn init_logging(log_dir: Option<&std::path::Path>) -> Option<WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cf.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            tracing_subscriber::registry().with(stderr).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            None
        }
    }
}

/// Load config and start logging for commands that operate on the feed
fn setup(config_path: Option<&std::path::Path>) -> Result<(SystemConfig, Option<WorkerGuard>)> {
    let config = cli_lib::system_config::load(config_path)?;
    let guard = init_logging(config.feed.log_dir.as_deref());
    Ok((config, guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config {
            list,
            get,
            example,
            path,
        } => {
            init_logging(None);
            if example {
                cmd::config::run_example()
            } else if path {
                cmd::config::run_path(config_path)
            } else if let (false, Some(key)) = (list, get.as_deref()) {
                cmd::config::run_get(config_path, key)
            } else {
                cmd::config::run_list(config_path)
            }
        }
        Commands::Run { once } => {
            let (config, _guard) = setup(config_path)?;
            cmd::run::run(config, once).await
        }
        Commands::Status => {
            let (config, _guard) = setup(config_path)?;
            cmd::status::run(&config)
        }
        Commands::Clean { yes } => {
            let (config, _guard) = setup(config_path)?;
            cmd::clean::run(&config, yes)
        }
    }
}
