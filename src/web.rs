#![cfg(not(tarpaulin_include))]

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use finance_dashboard::app;
use finance_dashboard::config::{DEFAULT_CONFIG_PATH, Settings};
use finance_dashboard::logging;

#[derive(Parser)]
#[command(name = "website", version, about = "Personal finance dashboard server")]
struct Args {
    /// Config file (YAML)
    #[arg(long, env = "CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to listen on, overrides `server.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Disable login; every browser gets an anonymous session
    #[arg(long)]
    no_auth: bool,

    /// Debug logging
    #[arg(long)]
    debug: bool,
}

/// Main entry point for the dashboard server
///
/// Settings come from the config file, then the environment (`DEBUG`,
/// `AUTH_REQUIRED`, `LOG_LEVEL`, `BIND_ADDR`), then command line flags.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(&args.config)?;
    settings.apply_env();
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    if args.no_auth {
        settings.auth.required = false;
    }
    if args.debug {
        settings.logging.debug = true;
    }

    logging::init(&settings).context("Failed to initialize logging")?;
    log::info!(
        "Starting finance dashboard {} (auth {})",
        env!("CARGO_PKG_VERSION"),
        if settings.auth.required { "on" } else { "off" }
    );

    app::run(settings)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
