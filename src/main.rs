//! kintone mirror
//!
//! Reconciles every record of kintone applications into their Postgres mirror tables.

// kintone-mirror/src/main.rs
mod config;
mod errors;
mod kintone;
mod store;
mod sync;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::{AppConfig, EnvOverrides, FailurePolicy};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "kintone-mirror",
    version,
    about = "Fetch every record of kintone applications and mirror them into Postgres"
)]
struct Cli {
    /// Application id to reconcile; all registered applications when omitted
    app_id: Option<u64>,

    /// Path to config.json
    #[arg(long, short, env = "KINTONE_MIRROR_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Keep going with the remaining applications when one fails
    #[arg(long)]
    continue_on_error: bool,
}

/// Main entry point for the mirror tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    println!("start. kintone-mirror");
    match run_app(cli).await {
        Ok(_) => {
            println!("end. kintone-mirror");
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_app(cli: Cli) -> Result<()> {
    let mut app_config = AppConfig::load_from_json(&cli.config, &EnvOverrides::from_env())
        .context(format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        ))?;

    if cli.continue_on_error {
        app_config.sync.failure_policy = FailurePolicy::Continue;
    }

    sync::run_sync_flow(&app_config, cli.app_id).await
}
