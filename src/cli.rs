//! CLI argument parsing for racimo

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for detection results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "racimo")]
#[command(version)]
#[command(about = "Meta-operation detection over recorded operation logs", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Strategy configuration (TOML); embedded defaults when omitted
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run detection over a recorded operation (JSON)
    ///
    /// Accepts either a full operation record, including nested operations,
    /// or a bare list of sub-operation records.
    Detect {
        /// Path to the recorded operation
        #[arg(value_name = "RECORD")]
        input: PathBuf,
    },

    /// List the registered strategies in priority order with their parameters
    Strategies,
}
