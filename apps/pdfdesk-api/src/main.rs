//! pdfdesk API server
//!
//! `pdfdesk-api [serve]` runs the HTTP API; `pdfdesk-api cleanup` sweeps
//! expired files and operations and exits.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pdfdesk_api::cleanup::{run_cleanup, CleanupOptions};
use pdfdesk_api::config::{Cli, Command, Config};
use pdfdesk_api::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::resolve(cli.settings);

    // Initialize logging
    let filter = if config.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pdfdesk_api=info,tower_http=debug"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Initializing pdfdesk API...");
    let state = Arc::new(AppState::new(&config).await?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, state).await,
        Command::Cleanup { dry_run, force } => {
            let report = run_cleanup(&state, CleanupOptions { dry_run, force }).await?;
            if report.dry_run {
                for name in &report.files {
                    info!("Would delete {}", name);
                }
                info!(
                    "Dry run: {} files and {} operations would be deleted",
                    report.files_matched, report.operations_matched
                );
            } else {
                info!(
                    "Deleted {} of {} files and {} operations",
                    report.files_deleted, report.files_matched, report.operations_deleted
                );
            }
            Ok(())
        }
    }
}

async fn serve(config: &Config, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("pdfdesk API listening on http://{}", addr);
    info!("Download links use {}", config.public_url);

    axum::serve(listener, app).await?;

    Ok(())
}
