#![forbid(unsafe_code)]

use gridpulse::collector::aggregates::AggregatesCollector;
use gridpulse::collector::device::DeviceCollector;
use gridpulse::collector::grid::GridCollector;
use gridpulse::collector::scheduler::CollectorManager;
use gridpulse::collector::soe::SoeCollector;
use gridpulse::collector::tariff::ConfigCollector;
use gridpulse::config;
use gridpulse::gateway::GatewayClient;
use gridpulse::importer::ImportSupervisor;
use gridpulse::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    config::load_configuration().expect("Failed to load configuration");
    let config = config::get().expect("Failed to get configuration");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime")
        .block_on(async_main());
}

async fn async_main() {
    let config = config::get().expect("Failed to get configuration");

    let store_options = config
        .storage
        .store_options()
        .expect("Invalid storage configuration");
    let store = Arc::new(Store::open(store_options).expect("Failed to open storage"));

    let gateway = match GatewayClient::connect(&config.endpoint, &config.password).await {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!(%err, "failed to connect to gateway");
            std::process::exit(1);
        }
    };

    // The import supervisor and collector manager are the handles the
    // external HTTP layer mounts; the binary itself only drives the
    // polling loop.
    let _importer = ImportSupervisor::new(Arc::clone(&store));

    let mut manager = CollectorManager::new(
        Arc::clone(&store),
        Duration::from_secs(config.collection_interval.max(1)),
    );
    manager.register(Arc::new(DeviceCollector::new(Arc::clone(&gateway))));
    manager.register(Arc::new(GridCollector::new(Arc::clone(&gateway))));
    manager.register(Arc::new(AggregatesCollector::new(Arc::clone(&gateway))));
    manager.register(Arc::new(SoeCollector::new(Arc::clone(&gateway))));
    manager.register(Arc::new(ConfigCollector::new(Arc::clone(&gateway))));
    let manager = Arc::new(manager);

    if config.no_collector {
        info!("collector disabled by configuration");
    } else {
        manager.start();
        info!(
            interval_secs = config.collection_interval,
            "collector scheduler started"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    info!("shutting down");

    manager.stop();
    if let Err(err) = store.close() {
        error!(%err, "failed to close storage cleanly");
    }
}
