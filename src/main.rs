//! tapkey - NFC smart-lock key manager
//!
//! This is the binary entry point. All logic lives in the library.

use clap::Parser;
use tracing::{error, info};

use tapkey::Cli;
use tapkey_app::config;
use tapkey_core::logging;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let settings = config::load_settings(&cli.project_path());
    let log_dir = logging::log_dir(&settings.storage.resolve_data_dir());
    let _log_guard = logging::init(&log_dir, cli.verbose)?;
    info!("command: {:?}", cli.command);

    let result = tapkey::run(cli, settings).await;
    if let Err(ref e) = result {
        error!("Application error: {:?}", e);
    }

    info!("tapkey exiting");
    Ok(result?)
}
