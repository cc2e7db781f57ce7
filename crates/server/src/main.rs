//! stash server entry point.
//!
//! Boots the caching coordinator for the configured version and serves it as
//! MCP tools on stdio transport. Logging goes to stderr to avoid interfering
//! with the JSON-RPC protocol on stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use stash_client::{
    Coordinator, FetchClient, FetchConfig, HttpRelay, Network, Registration, Relay, RelayConfig, SystemClock,
};
use stash_core::{AppConfig, CacheDb};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[cfg(test)]
mod testing;

/// How often the periodic-refresh clock is checked.
const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let origin = config.origin_url()?;
    tracing::info!(
        version = %config.version,
        %origin,
        db = %config.db_path.display(),
        "Starting stash server on stdio transport"
    );

    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening cache at {}", config.db_path.display()))?;
    let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from(&config), origin.clone())?);
    let relay = match &config.relay_url {
        Some(url) => {
            let relay = HttpRelay::new(RelayConfig::new(url.as_str()))?;
            // Deferred tasks stay queued while the relay is down.
            if let Err(e) = relay.health().await {
                tracing::warn!(error = %e, relay = %url, "relay health check failed");
            }
            let relay: Arc<dyn Relay> = Arc::new(relay);
            Some(relay)
        }
        None => None,
    };

    let registration = Arc::new(Registration::new(db.clone(), network.clone()));
    let coordinator = Coordinator::from_config(&config, db.clone(), network, Arc::new(SystemClock))?.with_relay(relay);
    match registration.register(coordinator).await {
        Ok(outcome) => tracing::info!(?outcome, "coordinator registered"),
        Err(e) => tracing::warn!(error = %e, "coordinator registration failed; requests go straight to the network"),
    }

    let ticker = registration.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match ticker.tick().await {
                Ok(0) => {}
                Ok(scheduled) => tracing::info!(scheduled, "periodic refresh scheduled"),
                Err(e) => tracing::warn!(error = %e, "periodic tick failed"),
            }
        }
    });

    let handler = handler::StashServer::new(registration, db, origin);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
