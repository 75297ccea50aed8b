//! EdgeHub - connectivity agent entry point

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use edgehub_cli::{
    app::EdgeHubApp,
    cli::{Cli, Commands},
    config,
    websocket::WebSocketFactory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let config = config::load(cli.config.as_deref(), &cli.overrides())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config::to_toml(&config)?);
        }
        Commands::Run => {
            info!(
                "Starting EdgeHub for node {} against {}",
                config.node_id,
                config.endpoint_url()
            );
            let factory = Arc::new(WebSocketFactory::new(config.clone()));
            let app = EdgeHubApp::start(config, factory).context("failed to start EdgeHub")?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            app.shutdown().await?;
        }
    }

    Ok(())
}

/// Setup logging from RUST_LOG, falling back to the verbosity flag
fn setup_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
