use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use fleet_leads_service::config::ServiceArgs;
use fleet_leads_service::{app, ServiceState};
use fleet_leads_store_json::JsonDocumentStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = ServiceArgs::parse();
    let config = args.service_config()?;

    let store = JsonDocumentStore::open(&args.data_file)?;
    let report = store
        .migrate()
        .with_context(|| format!("failed to migrate {}", args.data_file.display()))?;
    tracing::info!(
        data_file = %args.data_file.display(),
        schema_version = report.to_version,
        "document store ready"
    );

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(
        "fleet-leads-service v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        args.bind
    );

    let state = ServiceState::new(store, &config);
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("fleet-leads-service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
