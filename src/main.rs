//! tierdispatch HTTP server
//!
//! Starts an Axum web server that queues, rate-limits and routes generation
//! requests to tiered LLM providers.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tierdispatch::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};

/// How often expired cache entries are purged
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output.as_deref()),
        Some(Command::Check) => check(&cli.config),
        Some(Command::Serve) | None => serve(&cli.config).await,
    }
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)
                .map_err(|e| format!("Failed to write config template to '{}': {}", path, e))?;
            eprintln!("Configuration template written to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

fn check(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(path)?;
    println!(
        "{}: OK ({} providers, {} tiers)",
        path,
        config.providers.len(),
        config.tiers.len()
    );
    Ok(())
}

async fn serve(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(Config::from_file(path)?);

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting tierdispatch server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(config.clone())?;
    let dispatcher = state.dispatcher().clone();
    let janitor = dispatcher.spawn_cache_janitor(CACHE_CLEANUP_INTERVAL);

    let app = handlers::app(state);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining dispatcher queue");
    dispatcher.shutdown().await;
    if let Err(e) = janitor.await {
        tracing::warn!(error = %e, "Cache janitor task ended abnormally");
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
