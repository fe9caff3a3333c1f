use anyhow::Context;
use bm_inventory::config::Config;
use bm_inventory::host::{DiskValidator, Manager};
use bm_inventory::inventory::Inventory;
use bm_inventory::job;
use bm_inventory::store::MemoryStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

async fn load_config() -> anyhow::Result<Config> {
    match std::env::var("BM_INVENTORY_CONFIG") {
        Ok(path) => Config::load(&path)
            .await
            .with_context(|| format!("load configuration {}", path)),
        Err(_) => Config::from_env().context("read configuration from environment"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config().await?;
    tracing::debug!("{:#?}", config);

    let store = Arc::new(MemoryStore::new());
    let jobs = job::Client::from_config(&config.job)
        .await
        .context("job client")?;
    let hosts = Manager::new(
        store.clone(),
        Arc::new(DiskValidator::default()),
        config.policy.clone(),
    );
    let inventory = Inventory::new(store, Arc::new(hosts), Arc::new(jobs), &config);

    let monitor = inventory.monitor().start();
    tracing::info!("bm-inventory running");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!("shutting down");
    monitor.stop().await;

    Ok(())
}
