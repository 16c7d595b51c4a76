//! Warband server binary entry point.
//!
//! This is a thin wrapper around the warband-server library that:
//! 1. Parses command-line arguments
//! 2. Initializes logging
//! 3. Validates configuration
//! 4. Starts the server
//!
//! For library usage, see the warband-server crate documentation.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use warband_server::{LogFormat, Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    tracing::info!("Warband server starting...");
    tracing::info!(
        "Configuration loaded: bind={}, upstream={}, cache={}",
        config.bind,
        config.upstream_url,
        config.redis_url.split('@').next_back().unwrap_or_default()
    );

    config.validate()?;

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
