//! CLI module for aeromap
//!
//! Provides command-line interface for:
//! - inspect: Resolve the schema directory and print its history
//! - plan: Show how a nested create decomposes into a batch

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{inspect, inspect_schema, load_config, plan, plan_create, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_request, write_error, write_response};
