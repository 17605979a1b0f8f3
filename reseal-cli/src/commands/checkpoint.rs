use anyhow::{Context, Result};
use clap::Subcommand;
use reseal_core::checkpoint::{clear_checkpoint, load_checkpoint};
use std::path::PathBuf;

use super::EXIT_OK;

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// Print the stored checkpoint
    Show {
        /// Checkpoint directory
        #[arg(long, default_value = ".reseal")]
        checkpoint_dir: PathBuf,
    },
    /// Delete the stored checkpoint
    Clear {
        /// Checkpoint directory
        #[arg(long, default_value = ".reseal")]
        checkpoint_dir: PathBuf,
    },
}

pub fn execute_checkpoint_command(action: CheckpointCommands) -> Result<u8> {
    match action {
        CheckpointCommands::Show { checkpoint_dir } => {
            let state = load_checkpoint(&checkpoint_dir)?;
            let json =
                serde_json::to_string_pretty(&state).context("Failed to serialize checkpoint")?;
            println!("{}", json);
        }
        CheckpointCommands::Clear { checkpoint_dir } => {
            clear_checkpoint(&checkpoint_dir)?;
            println!("Checkpoint cleared");
        }
    }
    Ok(EXIT_OK)
}
