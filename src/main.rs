//! Service Gateway
//!
//! Single authenticated entry point in front of a fixed set of backend
//! services. Built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────────────┐
//!                 │                         GATEWAY                           │
//!                 │                                                           │
//!  Client ───────▶│  http server ──▶ auth ──▶ routing ──▶ circuit breaker     │
//!                 │       │                    registry          │            │
//!                 │       │                                      ▼            │
//!                 │       │                               shared transport ───┼──▶ Backend
//!                 │       ▼                                                   │
//!  WebSocket ────▶│  tunnel (auth, admission) ──▶ relay pumps ────────────────┼──▶ Backend
//!                 │                                                           │
//!                 │  config · observability · lifecycle · health              │
//!                 └───────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use service_gateway::config::load_config;
use service_gateway::lifecycle::startup;
use service_gateway::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "service-gateway", version, about = "Authenticated API gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/gateway.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init_logging(level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        backends = config.backends.len(),
        "service-gateway starting"
    );

    startup::run(config).await?;
    Ok(())
}
