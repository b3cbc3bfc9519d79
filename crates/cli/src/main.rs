//! IronLoop CLI: the host entry point.
//!
//! Commands:
//! - `replay`    : Run the agent loop against a scripted model
//! - `config`    : Show, validate, or initialise configuration
//! - `strategies`: List recovery strategies in selection order

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "ironloop",
    about = "IronLoop: bounded agent loop with pluggable recovery",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Read configuration from this file instead of ~/.ironloop/config.toml
    #[arg(short, long, global = true, env = "IRONLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task against a scripted model and print the loop result
    Replay {
        /// JSON array of model replies; `{"error": "..."}` entries fail the call
        #[arg(short, long)]
        script: PathBuf,

        /// Task description sent to the agent
        #[arg(short, long)]
        task: String,

        /// What a good answer looks like
        #[arg(long)]
        expected_output: Option<String>,

        /// Override the configured iteration budget
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Run without the recovery manager
        #[arg(long)]
        no_recovery: bool,

        /// Also print recovery metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List recovery strategies in selection order
    Strategies,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Load and validate the configuration
    Validate,
    /// Print the default config file location
    Path,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
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

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Replay {
            script,
            task,
            expected_output,
            max_iterations,
            no_recovery,
            metrics,
        } => {
            let options = commands::replay::ReplayOptions {
                script,
                task,
                expected_output,
                max_iterations,
                recovery: !no_recovery,
                metrics,
            };
            commands::replay::run(config_path, options).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path)?,
            ConfigAction::Init => commands::config_cmd::init()?,
        },
        Commands::Strategies => commands::strategies::run(config_path)?,
    }

    Ok(())
}
