use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use heatwise::config::{self, load_config};
use heatwise::hub::HubClient;
use heatwise::zone::runtime::spawn_zone;
use heatwise::zone::ZoneCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    heatwise::init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "heatwise.toml".to_string());
    let config = load_config(Path::new(&config_path))
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(config::default_data_dir);
    let hub = HubClient::new(&config.hub.base_url, &config.hub.token)?;

    let mut handles = Vec::new();
    for zone_config in config.zones {
        info!("starting zone '{}'", zone_config.name);
        let coordinator = ZoneCoordinator::new(zone_config, &data_dir);
        handles.push(spawn_zone(coordinator, hub.clone()));
    }
    if handles.is_empty() {
        warn!("no zones configured, nothing to do");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    for handle in handles {
        handle.shutdown().await;
    }

    Ok(())
}
