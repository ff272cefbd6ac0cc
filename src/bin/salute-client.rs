//! salute-client: interactive client.
//!
//! Type `list clients`, `solve <problem> [v1,v2,...]`, `salute` or `bye`.

use salute::client::Client;
use salute::config::{resolve_client_name, ClientConfig};
use tokio::io::BufReader;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config = ClientConfig::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Prompting happens before the runtime owns stdin
    let name = resolve_client_name(
        &config,
        &mut std::io::stdin().lock(),
        &mut std::io::stdout(),
    )?;

    info!(server = %config.server, client = %name, "Starting salute client");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config, name))?;
    Ok(())
}

async fn run(
    config: ClientConfig,
    name: String,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let span = info_span!("client", name = %name);
    let client = Client::new(config, name);

    async move {
        let mut session = client.connect().await?;

        let exit = session.send_loop(BufReader::new(tokio::io::stdin())).await?;
        info!(?exit, "Session ended");

        session.join().await?;
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    }
    .instrument(span)
    .await
}
