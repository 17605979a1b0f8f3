use clap::{Parser, Subcommand};
use reseal_core::{init_logging, ResealConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

mod commands;
mod report;

use commands::*;

#[derive(Parser)]
#[command(name = "reseal")]
#[command(about = "Re-seal secret records under the newest key generation")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "reseal.toml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-encrypt every in-scope record under the latest key generation
    Run(RunArgs),
    /// List the key generations in a key-material file
    Keys {
        /// Key-material file
        #[arg(long)]
        keys: PathBuf,
    },
    /// Inspect or reset the run checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointCommands,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match ResealConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("reseal: {:#}", e);
            return ExitCode::from(EXIT_ABORTED);
        }
    };

    if cli.verbose {
        config.logging.level = "DEBUG".to_string();
    }
    if cli.json_logs {
        config.logging.json_format = true;
    }
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("reseal: {:#}", e);
        return ExitCode::from(EXIT_ABORTED);
    }

    debug!(version = reseal_core::VERSION, config = %cli.config.display(), "reseal starting");

    let result = match cli.command {
        Commands::Run(args) => execute_run(&config, args).await,
        Commands::Keys { keys } => execute_keys_command(&keys).await,
        Commands::Checkpoint { action } => execute_checkpoint_command(action),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            ExitCode::from(EXIT_ABORTED)
        }
    }
}
