//! Bridge server backed by the in-memory engine.
//!
//! This example demonstrates:
//! - Resolving configuration from command-line flags and an optional JSON file
//! - Initialising logging
//! - Running the server until Ctrl-C
//!
//! # Running
//!
//! ```text
//! cargo run --example server -- -p 5000 -d ./rules -e start.clp -r 1
//! ```

use clap::Parser;
use clipswire::engine::{BatchLoader, MemoryEngine};
use clipswire::{telemetry, Server, ServerArgs};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerArgs::parse().resolve()?;
    telemetry::initialise(&config.log_filter, config.log_format)?;

    let server = Server::bind(config).await?;
    let handle = server.handle();
    let registry = server.registry();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received");
        handle.shutdown();
    });

    server
        .run(move || MemoryEngine::with_registry(registry), BatchLoader)
        .await?;
    Ok(())
}
