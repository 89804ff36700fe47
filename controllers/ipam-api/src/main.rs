//! IPAM API
//!
//! Serves the IPAM core over HTTP:
//! - RIRs, aggregates, VRFs and roles
//! - Prefixes, IP ranges and IP addresses with allocation endpoints
//! - VLANs
//! - Utilization and hierarchy queries
//!
//! State is held in memory for the lifetime of the process.

mod error;
mod handlers;
mod routes;


use ipam_core::{IpamConfig, IpamError, IpamStore};
use routes::{AppState, create_router};
use std::env;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ENV_LISTEN_ADDR: &str = "IPAM_LISTEN_ADDR";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting IPAM API");

    let config = IpamConfig::from_env()?;
    let listen_addr = env::var(ENV_LISTEN_ADDR).unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
    let addr: SocketAddr = listen_addr.parse().map_err(|_| {
        IpamError::InvalidConfig(format!(
            "{} must be a socket address, got '{}'",
            ENV_LISTEN_ADDR, listen_addr
        ))
    })?;

    info!("Configuration:");
    info!("  Listen address: {}", addr);
    info!("  Enforce global uniqueness: {}", config.enforce_global_unique);
    info!("  Allocation retries: {}", config.allocation_retries);

    let app = create_router(AppState::new(IpamStore::new(config)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
