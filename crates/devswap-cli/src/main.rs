//! devswap
//!
//! Swap a workload for a persistent development replacement and back.

use clap::Parser;

use devswap_cli::{Cli, Result};
use devswap_common::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format.into(),
        default_filter: None,
    })?;

    cli.run().await
}
