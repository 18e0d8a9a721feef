mod config;
mod runner;
mod session;

use anyhow::Context;
use config::WorkerConfig;
use runner::{JobRunner, Toolchain};
use session::WorkerState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Runbox worker booting...");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    let toolchain = Toolchain::for_language(config.language);
    info!(
        language = %config.language,
        job_timeout_secs = config.job_timeout.as_secs(),
        max_output_bytes = config.max_output_bytes,
        run = ?toolchain.run,
        "Worker configured"
    );

    let runner = Arc::new(JobRunner::new(toolchain, config.job_timeout, config.max_output_bytes));
    let app = session::router(WorkerState {
        language: config.language,
        runner,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("{} executor ready on {}", config.language.display_name(), addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
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
    warn!("Received shutdown signal");
}
