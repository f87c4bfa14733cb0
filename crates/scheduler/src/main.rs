use anyhow::Context;
use clap::Parser;
use scheduler::config::Config;
use scheduler::metrics::SchedulerMetrics;
use scheduler::{ProtocolLoop, WsConnection};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();
    let config = Config::parse();
    tracing::info!(config = ?config, "Scheduler starting with configuration");

    let url = config.endpoint_url()?;
    let metrics = Arc::new(SchedulerMetrics::new().context("failed to register metrics")?);

    // --- 2. Optional Metrics Server ---
    if let Some(addr) = config.metrics_listen_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
        let router = metrics.router();
        tokio::spawn(async move {
            tracing::info!(addr = %addr, "Metrics server started");
            if let Err(e) = axum::serve(listener, router.into_make_service()).await {
                tracing::error!(error = %e, "Metrics server exited with an error");
            }
        });
    }

    // --- 3. Session ---
    let mut conn = WsConnection::connect(&url)
        .await
        .with_context(|| format!("failed to open session at {url}"))?;
    let runner = ProtocolLoop::new(config.session_mode(), config.policy.build(), metrics);

    let result = tokio::select! {
        res = runner.run(&mut conn, config.handshake()) => Some(res),
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received.");
            None
        }
    };
    conn.close().await;

    match result {
        Some(Ok(outcome)) => {
            tracing::info!(outcome = ?outcome, "Scheduler shut down gracefully.");
            Ok(())
        }
        Some(Err(e)) => Err(e).context("session failed"),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
