use anyhow::Context;
use clap::Parser;
use tracing::{error, warn};

use plaud_bridge::cli::{self, Cli};
use plaud_bridge::config::BridgeConfig;
use plaud_bridge::telemetry;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    let (mut config, config_error) = match BridgeConfig::try_from_env() {
        Ok(config) => (config, None),
        Err(err) => (BridgeConfig::default(), Some(err)),
    };
    args.apply(&mut config);

    if let Err(err) = telemetry::logging::init(&config.log_config()) {
        eprintln!("[plaud-bridge] {err}");
    }
    if let Some(err) = config_error {
        warn!(error = %err, "ignoring invalid PLAUD_* settings; using defaults");
        eprintln!("[plaud-bridge] invalid PLAUD_* settings, using defaults: {err}");
    }

    if let Err(err) = cli::run(args.command, &config)
        .await
        .context("plaud-bridge command failed")
    {
        error!(error = %err, "command failed");
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
