//! salute-server: registers clients and solves their problems.

use salute::config::ServerConfig;
use salute::server::{LogErrors, Server};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config = ServerConfig::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        name = %config.name,
        max_array_len = config.max_array_len,
        max_connections = config.max_connections,
        "Starting salute server"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let server = Server::new(config);
        server.run(Arc::new(LogErrors)).await
    })?;
    Ok(())
}
