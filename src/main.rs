//! Thaasbai Coordination Server
//!
//! Authoritative realtime coordinator for Dhiha Ei and Digu. All state is
//! in-memory and volatile by design.

use tracing::info;
use tracing_subscriber::EnvFilter;

use thaasbai_server::{Coordinator, ServerConfig, VERSION};

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Thaasbai server v{}", VERSION);
    info!(
        port = config.port,
        max_connections_per_ip = config.max_connections_per_ip,
        connection_rate_limit = config.connection_rate_limit,
        "starting"
    );

    let coordinator = Coordinator::new(config);
    if let Err(err) = coordinator.run().await {
        tracing::error!("server error: {err}");
    }
}
