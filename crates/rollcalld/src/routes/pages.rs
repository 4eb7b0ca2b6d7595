use axum::http::Uri;
use axum::response::Html;

use crate::error::AppError;
use crate::views;

pub async fn index() -> Html<String> {
    Html(views::index())
}

pub async fn register_form() -> Html<String> {
    Html(views::register_form())
}

pub async fn mark_form() -> Html<String> {
    Html(views::mark_form())
}

pub async fn not_found(uri: Uri) -> AppError {
    tracing::debug!(%uri, "no route");
    AppError::not_found("Page not found.")
}
