use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use lokcet_api::config::AppConfig;
use lokcet_api::{routes, AppState, Backends};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lokcet_shared::middleware::init_tracing("lokcet-api");

    let config = AppConfig::load()?;
    let port = config.port;

    let metrics_handle = lokcet_shared::middleware::init_metrics()?;
    let backends = Backends::connect(&config).await?;
    tracing::info!(backend = ?config.backend, "backends ready");

    let state = Arc::new(AppState::new(config, backends, metrics_handle));
    let shutdown = state.shutdown.clone();

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "lokcet-api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("lokcet-api stopped");
    Ok(())
}

/// Waits for Ctrl-C, then ends every open event stream so connections drain.
async fn shutdown_signal(streams: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    streams.cancel();
}
