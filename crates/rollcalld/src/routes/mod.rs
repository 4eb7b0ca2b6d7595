pub mod admin;
pub mod mark;
pub mod pages;
pub mod register;

use std::any::Any;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image::DynamicImage;
use rollcall_core::frame::{decode_data_url, decode_image};
use rollcall_core::{Frame, FrameError};
use tower_http::catch_panic::CatchPanicLayer;

use crate::error::AppError;
use crate::state::AppState;
use crate::views;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config().max_upload_bytes;

    Router::new()
        .route("/", get(pages::index))
        .route("/register", get(pages::register_form).post(register::submit))
        .route("/mark", get(pages::mark_form).post(mark::submit))
        .route("/init-db", get(admin::init_db))
        .route("/health", get(admin::health))
        .fallback(pages::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(render_panic))
        .with_state(state)
}

fn render_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = detail, "handler panicked");

    let status = StatusCode::INTERNAL_SERVER_ERROR;
    (status, Html(views::error_page(status, "An unexpected error occurred."))).into_response()
}

/// Decode a browser upload into the raster to store and the frame to
/// run the models on. Runs on the blocking pool.
pub(crate) async fn decode_upload(payload: String) -> Result<(DynamicImage, Arc<Frame>), AppError> {
    let decoded = tokio::task::spawn_blocking(move || -> Result<_, FrameError> {
        let bytes = decode_data_url(&payload)?;
        let image = decode_image(&bytes)?;
        let frame = Frame::from_image(&image);
        Ok((image, Arc::new(frame)))
    })
    .await??;
    Ok(decoded)
}
