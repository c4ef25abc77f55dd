//! devswap CLI library

#![deny(missing_docs)]

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand, ValueEnum};
use devswap_common::telemetry::LogFormat;

/// devswap - persistent development replacements for Kubernetes workloads
#[derive(Parser, Debug)]
#[command(name = "devswap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// devswap subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replace a workload with its persistent development variant
    Replace(commands::ClusterArgs),
    /// Restore the original workload and remove the replacement
    Revert(commands::ClusterArgs),
    /// Show whether a workload is currently replaced
    Status(commands::ClusterArgs),
    /// Print the planned pod spec without contacting a cluster
    Plan(commands::plan::PlanArgs),
}

/// Log format flag
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Replace(args) => commands::replace::run(args).await,
            Commands::Revert(args) => commands::revert::run(args).await,
            Commands::Status(args) => commands::status::run(args).await,
            Commands::Plan(args) => commands::plan::run(args),
        }
    }
}
