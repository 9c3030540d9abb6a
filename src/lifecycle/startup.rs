//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (signal handler, metrics endpoint)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::routing::RoutingError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("invalid {what} address '{addr}'")]
    Address { what: &'static str, addr: String },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the gateway until a termination signal arrives.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();

    if config.observability.metrics_enabled {
        let addr = parse_addr("metrics", &config.observability.metrics_address)?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(&config, shutdown.token())?;

    let addr = parse_addr("bind", &config.listener.bind_address)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    server.run(listener).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn parse_addr(what: &'static str, addr: &str) -> Result<SocketAddr, StartupError> {
    addr.parse().map_err(|_| StartupError::Address {
        what,
        addr: addr.to_string(),
    })
}
