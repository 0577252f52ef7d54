//! Batch settlement relayer - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// CLOB batch settlement relayer
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CLOB_RELAYER_CONFIG)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    clob_telemetry::init_logging()?;

    info!("Starting settlement relayer v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => clob_relayer::AppConfig::from_file(&path)?,
        None => clob_relayer::AppConfig::load()?,
    };
    info!(
        chain_id = config.settlement.chain_id,
        market = %config.settlement.market_address,
        rpc_url = %config.chain.rpc_url,
        "Configuration loaded"
    );

    clob_relayer::run(config).await?;

    Ok(())
}
