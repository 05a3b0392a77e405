//! buildspan CLI entrypoint.

use anyhow::Context;
use clap::Parser;

mod commands;
mod config;
mod handlers;

use commands::{Cli, Commands};
use config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    buildspan_trace::init_logging(config::log_format(cli.settings.log_format))?;

    let settings = Settings::try_from(cli.settings).context("invalid configuration")?;

    match cli.command {
        Commands::Run => handlers::run_daemon(settings).await?,
        Commands::Once => handlers::run_once(settings).await?,
    }

    Ok(())
}
