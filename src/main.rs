#![deny(clippy::unwrap_used)]

use clap::Parser;
use dotenv::dotenv;
use tracing::{Instrument, error, info, info_span};
use tracing_subscriber::EnvFilter;

use laravel_db_mcp::mcp::DatabaseServer;
use laravel_db_mcp::mcp::config::{Cli, EnvSource, LogLevel, ServerConfig};

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let config = match EnvSource::load(cli.env.as_deref())
        .and_then(|env| ServerConfig::resolve(&cli, &env))
    {
        Ok(config) => config,
        Err(e) => {
            init_tracing(cli.log_level);
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.log_level);

    let span = match &config.id {
        Some(id) => info_span!("mcp", id = %id),
        None => info_span!("mcp"),
    };
    let code = run(config).instrument(span).await;

    // stdin may still be parked in a blocking read; exit without waiting on it
    std::process::exit(code);
}

/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: ServerConfig) -> i32 {
    let server = DatabaseServer::new(config);

    if let Err(e) = server.start().await {
        error!("Failed to start server: {}", e);
        server.stop().await;
        return 1;
    }

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        _ = server.finished() => info!("Transport closed"),
    }

    server.stop().await;
    0
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
