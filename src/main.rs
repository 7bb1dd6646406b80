//! relay-hub server entry point.
//!
//! Builds the hub over in-process memory brokers, starts the Axum HTTP
//! server with the WebSocket and REST endpoints, and shuts everything down
//! on Ctrl-C or on the first hub-fatal error.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

use relay_hub::access::StaticValidator;
use relay_hub::api;
use relay_hub::app_state::AppState;
use relay_hub::broker::{Broker, BrokerMap, MemoryBroker};
use relay_hub::config::{HubConfig, LogFormat};
use relay_hub::error::HubError;
use relay_hub::hub::Hub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = HubConfig::from_env()?;
    init_tracing(config.log_format);
    tracing::info!(addr = %config.listen_addr, "starting relay-hub");

    // Build brokers and access control
    let brokers: BrokerMap = config
        .ws
        .broker_names
        .iter()
        .map(|name| {
            let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new(config.memory_broker_capacity));
            (name.clone(), broker)
        })
        .collect();
    let validator = Arc::new(StaticValidator::new(&config.access));

    // Build and start the hub
    let hub = Arc::new(Hub::new(config.ws.clone(), brokers, validator)?);
    let errors = hub.serve().await?;

    // Build router
    let app = api::build_app(AppState::new(Arc::clone(&hub)));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, path = %hub.settings().path, "server listening");

    let (fatal_tx, mut fatal_rx) = oneshot::channel();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&hub), errors, fatal_tx))
        .await?;
    hub.stop().await;

    if let Ok(err) = fatal_rx.try_recv() {
        return Err(err.into());
    }
    tracing::info!("relay-hub stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Resolves on Ctrl-C or the first hub-fatal error, after stopping the hub
/// so open WebSocket connections are closed before the server drains.
async fn shutdown_signal(
    hub: Arc<Hub>,
    mut errors: mpsc::UnboundedReceiver<HubError>,
    fatal: oneshot::Sender<HubError>,
) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => tracing::info!("shutdown requested"),
            Err(err) => tracing::error!(error = %err, "failed to listen for Ctrl-C"),
        },
        Some(err) = errors.recv() => {
            tracing::error!(error = %err, "hub failed, shutting down");
            let _ = fatal.send(err);
        }
    }
    hub.stop().await;
}
