//! Ingest Supervisor
//!
//! Main entry point. Exits 0 after a graceful stop and non-zero when
//! startup fails.
//!
//! The binary runs on the in-memory `MemoryGraph`: it loads the inventory,
//! builds the graph and serves status, but no media flows and no bus signal
//! arrives until a real `GraphEngine` is wired in here. Until then it idles
//! until Ctrl-C.

use ingest_supervisor::{
    alert_dispatcher::{AlertDispatcher, HttpAlertTransport},
    graph::memory::MemoryGraph,
    inventory::{load_active_sources, InventoryRepository},
    state::AppConfig,
    status_api,
    supervisor::{RunOutcome, Supervisor},
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_supervisor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ingest Supervisor v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        alert_url = %config.alert_url,
        alert_workers = config.alert_workers,
        max_retries = config.supervisor.max_retries,
        window_ms = config.supervisor.window_ms,
        "Configuration loaded"
    );

    // Source inventory (fatal on failure)
    let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    tracing::info!("Database connected");

    let inventory = InventoryRepository::new(pool.clone());
    let records = load_active_sources(&inventory).await?;
    pool.close().await;

    // Alerts
    let transport = HttpAlertTransport::new(config.alert_url.clone(), config.alert_timeout)?;
    let dispatcher = AlertDispatcher::start(Arc::new(transport), config.alert_workers);

    // Graph
    let (engine, mut bus) = MemoryGraph::new();
    tracing::warn!("No media engine linked, running on the in-memory graph; no bus signals will arrive");
    let mut supervisor = Supervisor::bootstrap(
        Box::new(engine),
        &records,
        &config.supervisor,
        dispatcher.handle(),
    )?;

    if config.status_api_enabled {
        let app = status_api::create_router(supervisor.subscribe());
        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Status API listening on {}", addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Status API stopped");
            }
        });
    }

    let outcome = supervisor
        .run(&mut bus, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    match &outcome {
        RunOutcome::Shutdown => tracing::info!("Run loop stopped by shutdown request"),
        RunOutcome::Aborted { origin, message } => {
            tracing::error!(element = %origin, message = %message, "Run loop stopped by graph error")
        }
        RunOutcome::BusClosed => tracing::warn!("Run loop stopped, graph bus closed"),
    }

    let report = supervisor.shutdown(dispatcher).await;
    tracing::info!(
        alerts_delivered = report.alerts.delivered,
        alerts_failed = report.alerts.failed,
        sources_released = report.sources_released,
        "Ingest Supervisor stopped"
    );

    Ok(())
}
