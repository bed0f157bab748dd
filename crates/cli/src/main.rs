//! Taskwright CLI — the main entry point.
//!
//! Commands:
//! - `config`        — Print the default configuration (or its path)
//! - `check-config`  — Validate a configuration file
//! - `simulate`      — Run one project against a scripted advisor

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "taskwright",
    about = "Taskwright — autonomous multi-agent task-execution engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs and results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (defaults to ~/.taskwright/config.toml)
    #[arg(short, long, global = true, env = "TASKWRIGHT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration
    Config {
        /// Print the configuration file path instead
        #[arg(long)]
        path: bool,
    },

    /// Validate a configuration file
    CheckConfig {
        /// File to validate
        path: PathBuf,
    },

    /// Run one project against a scripted advisor
    Simulate {
        /// JSON script with the project, its tasks, and the advisor's answers
        #[arg(short, long)]
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Config { path } => commands::config_cmd::show(path),
        Commands::CheckConfig { path } => commands::config_cmd::check(&path, cli.json),
        Commands::Simulate { script } => commands::simulate::run(&script, cli.config.as_deref(), cli.json).await,
    }
}
