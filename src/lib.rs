pub mod allow_list;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod rating;
pub mod registration;
pub mod registry;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod validate;
pub mod vocab;

pub use config::{CliArgs, Command, RegisterConfig};
pub use error::{FetchError, IngestError, StoreError};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use registration::{Registration, RegistrationStatus};
pub use registry::{IngestReport, Registry, Source};
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
pub use state::AppState;

use anyhow::Result;
use axum::Router;
use health::HealthChecker;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::OK, metrics::METRICS.encode())
}

/// Ops endpoints: health, readiness, component health and metrics.
pub fn ops_router(state: Arc<AppState>) -> Router {
    let health_checker = Arc::new(HealthChecker::new(state));
    Router::new()
        .route("/health", axum::routing::get(health::liveness_handler))
        .route("/ready", axum::routing::get(health::readiness_handler))
        .route(
            "/health/components",
            axum::routing::get(health::components_handler),
        )
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(health_checker)
}

/// Run the crawl scheduler and the ops endpoints until SIGINT or SIGTERM.
pub async fn run_server(config: RegisterConfig) -> Result<()> {
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone()).await?);

    match state.stats().await {
        Ok(stats) => tracing::info!(
            records = stats.records,
            publishers = stats.publishers,
            persistent = config.store_dir.is_some(),
            "graph store opened"
        ),
        Err(error) => tracing::warn!(%error, "could not read registry statistics"),
    }

    let shutdown_config =
        ShutdownConfig::default().with_drain_timeout(config.graceful_shutdown_timeout_secs);
    let coordinator = Arc::new(ShutdownCoordinator::new(shutdown_config));

    coordinator.spawn(state.scheduler().run(coordinator.token()));

    let listener = TcpListener::bind(config.http_bind_address).await?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(bind = %actual_addr, "ops endpoints listening");

    let signal_coordinator = coordinator.clone();
    let server_result = axum::serve(listener, ops_router(state))
        .with_graceful_shutdown(async move {
            signal_coordinator.wait_for_signal().await;
        })
        .await;

    tracing::info!("ops endpoints stopped, waiting for the crawl scheduler");
    if let Err(e) = coordinator.shutdown().await {
        tracing::error!("error during shutdown: {}", e);
    }

    server_result.map_err(anyhow::Error::from)
}
