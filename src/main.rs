//! PubState daemon
//!
//! Loads configuration, opens the configured datastore, restores persisted
//! messages and keeps pruning acknowledged ones until ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use pubstate::broker::Broker;
use pubstate::config::{Settings, load_config};
use pubstate::persistence::open_datastore;
use pubstate::utils::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init(&Settings::default().log);
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let level = logging::init(&config.log);
    info!(%level, "logging initialised");

    if let Err(e) = run(config).await {
        error!("Broker failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let datastore = open_datastore(&config.datastore)?;
    let broker = Arc::new(Broker::new(datastore, config.broker.clone()));
    broker.restore()?;

    if config.broker.prune_interval_secs > 0 {
        let interval = Duration::from_secs(config.broker.prune_interval_secs);
        tokio::spawn(Broker::start_prune_loop(broker.clone(), interval));
    }

    info!(
        backend = ?config.datastore.backend,
        messages = broker.messages().len(),
        "broker ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    broker.messages().datastore().flush()?;

    Ok(())
}
