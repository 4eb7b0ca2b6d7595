use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::response::Html;
use axum::Form;
use serde::Deserialize;

use super::decode_upload;
use crate::error::{AppError, NOT_RECOGNIZED_MESSAGE, NO_STUDENTS_MESSAGE};
use crate::faces::FaceStoreError;
use crate::recognition::within;
use crate::state::AppState;
use crate::{validation, views};

#[derive(Debug, Deserialize)]
pub struct MarkForm {
    #[serde(default)]
    pub course_code: String,
    #[serde(default, rename = "imageData")]
    pub image_data: String,
}

/// `POST /mark`: match a live capture against the registered faces.
pub async fn submit(
    State(state): State<AppState>,
    form: Result<Form<MarkForm>, FormRejection>,
) -> Result<Html<String>, AppError> {
    let Form(form) = form?;
    let course = validation::course_code(&form.course_code).map_err(AppError::validation)?;
    let (image, frame) = decode_upload(form.image_data).await?;

    let references = {
        let _capture = state.capture_lock().lock().await;
        let faces = state.faces().clone();
        tokio::task::spawn_blocking(move || -> Result<_, FaceStoreError> {
            faces.write_capture(&image)?;
            faces.references()
        })
        .await??
    };

    if references.is_empty() {
        return Err(AppError::not_found(NO_STUDENTS_MESSAGE));
    }
    let reference_count = references.len();

    let candidate = within(
        state.engine_timeout(),
        state.engine().find_best_match(frame, references),
    )
    .await?;

    let Some(candidate) = candidate else {
        tracing::info!(course = %course, references = reference_count, "face not recognized");
        return Err(AppError::not_found(NOT_RECOGNIZED_MESSAGE));
    };

    let Some(student) = state.store().find_by_mat_number(&candidate.mat_number).await? else {
        tracing::warn!(
            mat_number = %candidate.mat_number,
            "matched reference image has no student record"
        );
        return Err(AppError::not_found(NOT_RECOGNIZED_MESSAGE));
    };

    tracing::info!(
        mat_number = %student.mat_number,
        course = %course,
        distance = candidate.distance,
        "attendance marked"
    );
    Ok(Html(views::confirmation(&student.name, &student.mat_number, &course)))
}
