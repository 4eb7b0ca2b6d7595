use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::response::Redirect;
use axum::Form;
use serde::Deserialize;

use super::decode_upload;
use crate::error::{AppError, INVALID_FACE_MESSAGE, NO_FACE_MESSAGE};
use crate::faces::StagedImage;
use crate::recognition::{within, RecognitionError};
use crate::state::AppState;
use crate::store::{NewStudent, Student, StoreError};
use crate::validation;

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mat_no: String,
    #[serde(default, rename = "imageData")]
    pub image_data: String,
}

/// `POST /register`: validate, require a face, then store row and image together.
pub async fn submit(
    State(state): State<AppState>,
    form: Result<Form<RegisterForm>, FormRejection>,
) -> Result<Redirect, AppError> {
    let Form(form) = form?;
    let name = validation::display_name(&form.name).map_err(AppError::validation)?;
    let mat_number = validation::mat_number(&form.mat_no).map_err(AppError::validation)?;

    // Fast path; the unique index still decides concurrent races.
    if state.store().find_by_mat_number(&mat_number).await?.is_some() {
        return Err(StoreError::Duplicate(mat_number).into());
    }

    let (image, frame) = decode_upload(form.image_data).await?;

    if state.config().require_face {
        let faces = within(state.engine_timeout(), state.engine().count_faces(frame)).await?;
        if faces == 0 {
            tracing::info!(mat_number = %mat_number, "registration rejected: no face");
            return Err(AppError::validation(NO_FACE_MESSAGE));
        }
    }

    let faces = state.faces().clone();
    let key = mat_number.clone();
    let staged = tokio::task::spawn_blocking(move || faces.stage(&image, &key)).await??;

    let result = validate_and_commit(&state, name, mat_number, &staged).await;
    if result.is_err() {
        state.faces().discard(&staged);
    }
    let student = result?;

    tracing::info!(
        id = student.id,
        mat_number = %student.mat_number,
        name = %student.name,
        "student registered"
    );
    Ok(Redirect::to("/"))
}

async fn validate_and_commit(
    state: &AppState,
    name: String,
    mat_number: String,
    staged: &StagedImage,
) -> Result<Student, AppError> {
    let validated = within(
        state.engine_timeout(),
        state.engine().validate_reference(staged.staged.clone()),
    )
    .await;
    match validated {
        Ok(()) => {}
        Err(RecognitionError::NoFace) => {
            tracing::info!(mat_number = %mat_number, "registration rejected: no usable face");
            return Err(AppError::validation(INVALID_FACE_MESSAGE));
        }
        Err(e) => return Err(e.into()),
    }

    let student = state
        .store()
        .register(NewStudent { name, mat_number }, staged.clone())
        .await?;
    Ok(student)
}
