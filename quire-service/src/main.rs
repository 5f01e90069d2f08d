use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;

mod api;
mod clock;
mod config;
mod content;
mod db;
mod error;
mod events;
mod index;
mod inference;
mod jobs;
mod ollama;
mod search;
mod service;

use crate::db::Database;
use crate::jobs::{start_lease_reaper, start_retry_promoter, start_workers};
use crate::service::QuireService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting Quire document service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = config::load_config()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    // Ensure data directory exists
    std::fs::create_dir_all(&config.storage.data_dir)?;

    let db_path = config.storage.data_dir.join("quire.db");
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    // Install the Prometheus recorder before anything records a metric
    let metrics = PrometheusBuilder::new().install_recorder()?;

    let service = Arc::new(QuireService::new(db, config).await?);
    let addr = format!(
        "{}:{}",
        service.config.server.host, service.config.server.port
    );

    // Workers pull leased jobs; the sweepers recover expired leases and
    // promote due retries back to pending
    let worker_count = service.dispatcher.config().worker_count;
    start_workers(service.dispatcher.clone(), worker_count);
    start_lease_reaper(service.dispatcher.clone());
    start_retry_promoter(service.dispatcher.clone());

    let app = api::router(service, metrics);

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quire_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
