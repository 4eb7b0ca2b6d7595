use axum::extract::rejection::FormRejection;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use thiserror::Error;

use crate::faces::FaceStoreError;
use crate::recognition::RecognitionError;
use crate::store::StoreError;
use crate::views;

pub const IMAGE_ERROR_MESSAGE: &str = "Error processing image. Please try again.";
pub const NO_FACE_MESSAGE: &str =
    "No face detected in the image. Please ensure your face is clearly visible and try again.";
pub const INVALID_FACE_MESSAGE: &str =
    "Face could not be properly detected. Please ensure your face is clearly visible and try again.";
pub const DUPLICATE_MESSAGE: &str = "Student with this matriculation number already exists.";
pub const NO_STUDENTS_MESSAGE: &str = "No students registered. Please register first.";
pub const NOT_RECOGNIZED_MESSAGE: &str = "Face not recognized";

/// Every failure a handler can surface. Client-facing variants carry the
/// message shown to the user; internal variants carry detail for the log only.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ValidationFailed(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("recognition unavailable: {0}")]
    RecognitionUnavailable(String),
    #[error("overloaded: {0}")]
    Overloaded(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            // Duplicates render as a plain bad request, like other form errors.
            Self::ValidationFailed(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RecognitionUnavailable(_) | Self::StorageFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RecognitionUnavailable(_) => "RECOGNITION_UNAVAILABLE",
            Self::Overloaded(_) => "OVERLOADED",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }

    /// Text rendered in the error view.
    pub fn public_message(&self) -> &str {
        match self {
            Self::ValidationFailed(m) | Self::Conflict(m) | Self::NotFound(m) => m,
            Self::RecognitionUnavailable(_) => "Face recognition failed. Please try again.",
            Self::Overloaded(_) => "The recognition service is busy. Please try again shortly.",
            Self::StorageFailure(_) => "Failed to save changes. Please try again.",
        }
    }

    fn is_internal(&self) -> bool {
        self.status().is_server_error()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.is_internal() {
            tracing::error!(status = %status, code = self.code(), error = %self, "request failed");
        } else {
            tracing::warn!(status = %status, code = self.code(), error = %self, "request rejected");
        }

        (status, Html(views::error_page(status, self.public_message()))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => AppError::Conflict(DUPLICATE_MESSAGE.to_string()),
            other => AppError::StorageFailure(other.to_string()),
        }
    }
}

impl From<FaceStoreError> for AppError {
    fn from(err: FaceStoreError) -> Self {
        AppError::StorageFailure(err.to_string())
    }
}

impl From<rollcall_core::FrameError> for AppError {
    fn from(err: rollcall_core::FrameError) -> Self {
        tracing::debug!(error = %err, "undecodable image payload");
        AppError::validation(IMAGE_ERROR_MESSAGE)
    }
}

impl From<RecognitionError> for AppError {
    fn from(err: RecognitionError) -> Self {
        match err {
            RecognitionError::NoFace => AppError::validation(NO_FACE_MESSAGE),
            RecognitionError::Busy | RecognitionError::TimedOut(_) => {
                AppError::Overloaded(err.to_string())
            }
            RecognitionError::Unavailable(detail) => AppError::RecognitionUnavailable(detail),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::StorageFailure(format!("background task failed: {err}"))
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::validation("The uploaded image is too large.");
        }
        AppError::validation(rejection.body_text())
    }
}
