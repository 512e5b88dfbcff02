use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use raknet_relay::config::RelayConfig;
use raknet_relay::service::{MemoryBanList, TracingEvents, TrafficMonitor};
use raknet_relay::utils::logging::init_logging;
use raknet_relay::{RelayBinder, Result};

fn load_config() -> Result<RelayConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::from_env()?,
    };
    config.validate_strict()?;
    Ok(config)
}

async fn run(config: RelayConfig) -> Result<()> {
    let traffic = Arc::new(TrafficMonitor::new(&config.guard));
    let binder = RelayBinder::new(
        config,
        Arc::new(TracingEvents),
        Arc::new(MemoryBanList::new()),
        traffic,
    )?;

    let local = binder.bind()?;
    info!(%local, "Relay running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    binder.unbind().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("raknet-relay: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
    }
}
