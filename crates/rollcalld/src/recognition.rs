//! Recognition adapter: the seam between request handlers and whatever
//! runs the face models.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use rollcall_core::Frame;
use thiserror::Error;

use crate::faces::ReferenceImage;

/// Closest accepted reference for a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub mat_number: String,
    /// Cosine distance, strictly below the configured threshold.
    pub distance: f32,
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("no face found in image")]
    NoFace,
    #[error("recognition engine is busy")]
    Busy,
    #[error("recognition timed out after {0:?}")]
    TimedOut(Duration),
    #[error("recognition unavailable: {0}")]
    Unavailable(String),
}

/// Face detection and matching, as the request handlers need it.
///
/// Futures are boxed so the trait stays object-safe and `AppState` can hold
/// an `Arc<dyn FaceEngine>`.
pub trait FaceEngine: Send + Sync {
    /// Number of faces the detector finds in `frame`.
    fn count_faces(&self, frame: Arc<Frame>) -> BoxFuture<'_, Result<usize, RecognitionError>>;

    /// Load an image file and extract a face embedding from it.
    /// `NoFace` when none can be found.
    fn validate_reference(&self, path: PathBuf) -> BoxFuture<'_, Result<(), RecognitionError>>;

    /// Closest reference whose distance is below the threshold, if any.
    /// A probe without a detectable face yields `None`.
    fn find_best_match(
        &self,
        probe: Arc<Frame>,
        references: Vec<ReferenceImage>,
    ) -> BoxFuture<'_, Result<Option<Candidate>, RecognitionError>>;
}

/// Bound an engine call by `limit`.
pub async fn within<T, F>(limit: Duration, call: F) -> Result<T, RecognitionError>
where
    F: Future<Output = Result<T, RecognitionError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RecognitionError::TimedOut(limit)),
    }
}
