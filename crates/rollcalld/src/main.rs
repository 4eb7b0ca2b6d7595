use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rollcalld::config::Config;
use rollcalld::engine::spawn_engine;
use rollcalld::faces::FaceStore;
use rollcalld::logging::init_tracing;
use rollcalld::routes::build_router;
use rollcalld::state::AppState;
use rollcalld::store::StudentStore;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_level());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let store = StudentStore::connect(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database))?;

    let faces = FaceStore::open(&config.data_dir)
        .with_context(|| format!("preparing image directories under {}", config.data_dir.display()))?;
    let stale = faces.clear_staging().context("clearing staged uploads")?;
    if stale > 0 {
        tracing::info!(removed = stale, "removed uploads left by an interrupted registration");
    }

    let engine = spawn_engine(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.distance_threshold,
        config.engine_queue_depth,
    )
    .context("starting recognition engine")?;

    let state = AppState::new(store, faces, Arc::new(engine), &config);
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, debug = config.debug, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown signal received");
}
