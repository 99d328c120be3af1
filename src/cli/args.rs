//! CLI argument definitions using clap
//!
//! Commands:
//! - aeromap inspect --config <path>
//! - aeromap plan --config <path> --collection <name> [--object <json>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aeromap - relationship-aware object storage mapping
#[derive(Parser, Debug)]
#[command(name = "aeromap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the schema directory and print the schema history
    Inspect {
        /// Path to configuration file
        #[arg(long, default_value = "./aeromap.json")]
        config: PathBuf,
    },

    /// Print the dissection and batch a nested create would run
    Plan {
        /// Path to configuration file
        #[arg(long, default_value = "./aeromap.json")]
        config: PathBuf,

        /// Collection the object is created in
        #[arg(long)]
        collection: String,

        /// Object as JSON; read from stdin when absent or `-`
        #[arg(long)]
        object: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
