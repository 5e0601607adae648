//! DB API Gateway - Main entry point.

use clap::Parser;
use db_api_gateway::config::Config;
use db_api_gateway::server::DbApiServer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let server_config = match config.server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Usage: db-api-gateway --config <server.json>");
            eprintln!("       db-api-gateway --sqlite-path <file.db>");
            std::process::exit(1);
        }
    };

    info!(
        name = %server_config.name,
        addr = %server_config.bind_addr(),
        prefix = %server_config.normalized_api_prefix(),
        "Starting DB API Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = DbApiServer::new(server_config)?;
    if let Err(e) = server.start().await {
        if let Some(suggestion) = e.suggestion() {
            error!(error = %e, suggestion, "Server failed to start");
        } else {
            error!(error = %e, "Server failed to start");
        }
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    info!("Received SIGINT");

    server.stop().await;
    info!("Server shutdown complete");
    Ok(())
}
