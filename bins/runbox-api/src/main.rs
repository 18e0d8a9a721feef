mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use chrono::{DateTime, Utc};
use runbox_common::config::executors_enabled;
use runbox_executor::{ExecutionService, ServiceSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct AppState {
    /// `None` when executors are disabled
    pub service: Option<Arc<ExecutionService>>,
    pub started_at: DateTime<Utc>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Runbox API booting...");

    let service = if executors_enabled() {
        let settings = ServiceSettings::from_env().context("Invalid execution settings")?;
        info!(strategy = ?settings.strategy, "Starting execution service");
        let service = ExecutionService::connect(settings)
            .await
            .context("Failed to initialize execution service")?;
        let started = service.start_workers().await;
        info!(workers = ?started, "Execution service ready");
        Some(Arc::new(service))
    } else {
        warn!("EXECUTORS_ENABLED is false - skipping executor startup");
        None
    };

    let state = Arc::new(AppState {
        service: service.clone(),
        started_at: Utc::now(),
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let port = std::env::var("PORT").unwrap_or_else(|_| "5000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    let grace = std::env::var("SHUTDOWN_GRACE_SECS")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SHUTDOWN_GRACE);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(service, grace))
        .await
        .context("Server error")?;

    info!("Server closed");
    Ok(())
}

/// Resolves once workers are torn down; the listener closes after that
async fn shutdown(service: Option<Arc<ExecutionService>>, grace: Duration) {
    wait_for_signal().await;
    warn!("Shutting down gracefully...");

    // a stuck worker stop must not hang the process
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        error!("Forced shutdown");
        std::process::exit(1);
    });

    if let Some(service) = service {
        service.shutdown().await;
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
