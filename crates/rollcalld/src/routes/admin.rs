use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// `GET /init-db`: create the students table if it does not exist.
pub async fn init_db(State(state): State<AppState>) -> (StatusCode, String) {
    match state.store().init_schema().await {
        Ok(()) => {
            tracing::info!("schema verified");
            (
                StatusCode::OK,
                "Database tables created/verified successfully!".to_string(),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "schema initialisation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error creating tables: {e}"),
            )
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub database: bool,
    pub students: Option<i64>,
    pub reference_images: Option<usize>,
}

/// `GET /health`: liveness plus a store round trip.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let students = match state.store().count().await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(error = %e, "health: student count failed");
            None
        }
    };

    let faces = state.faces().clone();
    let reference_images = match tokio::task::spawn_blocking(move || faces.references()).await {
        Ok(Ok(refs)) => Some(refs.len()),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "health: listing reference images failed");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "health: listing task failed");
            None
        }
    };

    let database = students.is_some();
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(HealthResponse {
            status: if database { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: state.uptime_secs(),
            database,
            students,
            reference_images,
        }),
    )
}
