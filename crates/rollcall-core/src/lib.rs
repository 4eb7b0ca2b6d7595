//! rollcall-core: face pipeline for the Roll Call attendance service.
//!
//! Decodes uploaded stills into grayscale frames, detects faces with SCRFD,
//! aligns them and extracts ArcFace embeddings, all running via ONNX Runtime
//! on the CPU. Matching embeddings against the registered gallery lives in
//! [`types`].

use std::path::PathBuf;

pub mod alignment;
pub mod detector;
pub mod frame;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use frame::{Frame, FrameError};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, CosineMatcher, Embedding, MatchResult, Matcher, Reference};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default location of the ONNX models: `$XDG_DATA_HOME/rollcall/models`,
/// falling back to `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}
