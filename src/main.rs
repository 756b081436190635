//! Multi-room chat server - Entry Point
//!
//! Generates the server keypair, loads configuration and runs the
//! listener.

use std::env;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatroom_server::{Config, SealedBoxProvider, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chatroom_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chatroom_server=info")),
        )
        .init();

    let mut config = Config::from_env()?;

    // Bind address from the command line wins over the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_address = addr;
    }

    // One keypair for the lifetime of the process
    let crypto = SealedBoxProvider::generate();
    info!("Server keypair generated");

    Server::new(config, Arc::new(crypto)).run().await?;
    Ok(())
}
