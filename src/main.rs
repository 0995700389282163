use anyhow::Context;
use localbackend::api::{self, items::ItemStore};
use localbackend::{Config, Server};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load().context("failed to load configuration")?;

    let server = Server::new(cfg);
    api::register_routes(&server, Arc::new(ItemStore::seeded()))
        .context("failed to register routes")?;

    // The host app comes to the foreground.
    if let Err(err) = server.on_host_foreground().await {
        tracing::error!(error = %err, "failed to start server");
        return Err(err.into());
    }
    if let Some(url) = server.subscribe().borrow().url.clone() {
        tracing::info!("Serving on {}", url);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    server.on_host_terminate().await;
    Ok(())
}
