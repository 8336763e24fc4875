mod config;
mod routes;
mod scheduler;
mod state;

use crate::config::AppConfig;
use crate::scheduler::SyncScheduler;
use crate::state::{unregistered_provider_factory, AppState};
use airgap_core::db::connection::{close_pool, create_pool};
use airgap_core::db::migrate::migrate;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!(port = config.port, data_dir = %config.data_dir.display(), "starting airgap-syncd");

    std::fs::create_dir_all(&config.data_dir)?;

    let db_path = config.db_path.to_string_lossy().to_string();
    let pool = create_pool(&db_path)?;
    migrate(&pool)?;

    let state = Arc::new(AppState::new(pool, config.clone()));

    if let Err(e) = state
        .sync_manager
        .reconfigure_providers(unregistered_provider_factory())
        .await
    {
        tracing::warn!(error = %e, "failed to load provider configuration at startup");
    }

    let scheduler = match SyncScheduler::new(state.clone()).await {
        Ok(s) => {
            if let Err(e) = s.init_schedules().await {
                tracing::warn!(error = %e, "failed to initialize schedules");
            }
            if let Err(e) = s.start().await {
                tracing::warn!(error = %e, "failed to start scheduler");
            }
            Some(s)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to create scheduler");
            None
        }
    };

    let app = routes::create_router(state.clone());

    let cancel = CancellationToken::new();
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("shutting down");
    cancel.cancel();

    if let Some(s) = scheduler {
        if let Err(e) = s.shutdown().await {
            tracing::warn!(error = %e, "scheduler shutdown error");
        }
    }

    close_pool(&state.db);
    tracing::info!("stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    cancel.cancel();
}
