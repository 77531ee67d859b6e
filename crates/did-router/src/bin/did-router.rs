//! DID router operator CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use rvoip_did_router::logging::setup_logging;
use rvoip_did_router::{CallRouter, RouterConfig};

#[derive(Parser, Debug)]
#[command(name = "did-router")]
#[command(about = "DID allocation and call correlation engine", version)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Restore live calls, run the reaper and wait for Ctrl-C
    Serve,
    /// Add DIDs to the pool
    Provision {
        /// DIDs to add
        #[arg(required = true)]
        dids: Vec<String>,

        /// Country the DIDs belong to
        #[arg(long)]
        country: Option<String>,
    },
    /// Print router statistics as JSON
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = RouterConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    setup_logging(&config.logging);

    let router = CallRouter::connect(config)
        .await
        .context("Failed to initialize router")?;

    match args.command {
        Command::Serve => {
            info!("📞 Starting DID router v{}", env!("CARGO_PKG_VERSION"));
            let reaper = router.start().await?;
            info!("✅ DID router started");

            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            reaper.shutdown().await;
        }
        Command::Provision { dids, country } => {
            for did in &dids {
                router.pool().provision(did, country.as_deref()).await?;
            }
            info!("Provisioned {} DIDs", dids.len());
        }
        Command::Stats => {
            router.restore().await?;
            let stats = router.statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    router.database().close().await;
    Ok(())
}
