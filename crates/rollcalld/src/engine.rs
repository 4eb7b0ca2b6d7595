use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::BoxFuture;
use futures::FutureExt;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{BoundingBox, CosineMatcher, Embedding, FaceDetector, FaceRecognizer, Frame, Matcher, Reference};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::faces::ReferenceImage;
use crate::recognition::{Candidate, FaceEngine, RecognitionError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("image error: {0}")]
    Frame(#[from] rollcall_core::FrameError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("engine queue is full")]
    Busy,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for RecognitionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NoFaceDetected => RecognitionError::NoFace,
            EngineError::Busy => RecognitionError::Busy,
            other => RecognitionError::Unavailable(other.to_string()),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Detect {
        frame: Arc<Frame>,
        reply: Reply<Vec<BoundingBox>>,
    },
    ValidateReference {
        path: PathBuf,
        reply: Reply<()>,
    },
    Identify {
        probe: Arc<Frame>,
        references: Vec<ReferenceImage>,
        reply: Reply<Option<Candidate>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Queue a request without waiting for room. A full queue is `Busy`.
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.try_send(build(reply_tx)).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::Busy,
            TrySendError::Closed(_) => EngineError::ChannelClosed,
        })?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Faces in `frame`, most confident first.
    pub async fn detect(&self, frame: Arc<Frame>) -> Result<Vec<BoundingBox>, EngineError> {
        self.request(|reply| EngineRequest::Detect { frame, reply }).await
    }

    /// Load `path` and extract an embedding from its best face.
    pub async fn validate(&self, path: PathBuf) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::ValidateReference { path, reply })
            .await
    }

    /// Match `probe` against the reference images.
    pub async fn identify(
        &self,
        probe: Arc<Frame>,
        references: Vec<ReferenceImage>,
    ) -> Result<Option<Candidate>, EngineError> {
        self.request(|reply| EngineRequest::Identify {
            probe,
            references,
            reply,
        })
        .await
    }
}

impl FaceEngine for EngineHandle {
    fn count_faces(&self, frame: Arc<Frame>) -> BoxFuture<'_, Result<usize, RecognitionError>> {
        async move { Ok(self.detect(frame).await?.len()) }.boxed()
    }

    fn validate_reference(&self, path: PathBuf) -> BoxFuture<'_, Result<(), RecognitionError>> {
        async move { Ok(self.validate(path).await?) }.boxed()
    }

    fn find_best_match(
        &self,
        probe: Arc<Frame>,
        references: Vec<ReferenceImage>,
    ) -> BoxFuture<'_, Result<Option<Candidate>, RecognitionError>> {
        async move { Ok(self.identify(probe, references).await?) }.boxed()
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads both ONNX models, then enters a request loop. Fails fast at
/// startup if either model is unavailable.
pub fn spawn_engine(
    scrfd_path: &str,
    arcface_path: &str,
    threshold: f32,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError> {
    let detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

    let mut worker = Worker {
        detector,
        recognizer,
        threshold,
        cache: EmbeddingCache::default(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(threshold, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { frame, reply } => {
                        let _ = reply.send(worker.detect(&frame));
                    }
                    EngineRequest::ValidateReference { path, reply } => {
                        let _ = reply.send(worker.validate(&path));
                    }
                    EngineRequest::Identify {
                        probe,
                        references,
                        reply,
                    } => {
                        let _ = reply.send(worker.identify(&probe, &references));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Reference embeddings keyed by image path, invalidated by mtime.
#[derive(Default)]
struct EmbeddingCache {
    entries: HashMap<PathBuf, (SystemTime, Embedding)>,
}

impl EmbeddingCache {
    fn get(&self, path: &Path, modified: SystemTime) -> Option<&Embedding> {
        self.entries
            .get(path)
            .filter(|(at, _)| *at == modified)
            .map(|(_, embedding)| embedding)
    }

    fn insert(&mut self, path: PathBuf, modified: SystemTime, embedding: Embedding) {
        self.entries.insert(path, (modified, embedding));
    }

    /// Drop entries whose image is no longer among `live`.
    fn retain_paths(&mut self, live: &HashSet<&Path>) {
        self.entries.retain(|path, _| live.contains(path.as_path()));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct Worker {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    threshold: f32,
    cache: EmbeddingCache,
}

impl Worker {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EngineError> {
        let faces = self.detector.detect(frame)?;
        tracing::debug!(faces = faces.len(), "detect");
        Ok(faces)
    }

    /// Embedding of the most confident usable face, or `None` if there is none.
    fn embed(&mut self, frame: &Frame) -> Result<Option<Embedding>, EngineError> {
        let faces = self.detector.detect(frame)?;
        let recognizer = &mut self.recognizer;
        best_embedding(&faces, |face| recognizer.extract(frame, face))
    }

    fn validate(&mut self, path: &Path) -> Result<(), EngineError> {
        let frame = Frame::open(path)?;
        match self.embed(&frame)? {
            Some(_) => Ok(()),
            None => Err(EngineError::NoFaceDetected),
        }
    }

    fn reference_embedding(&mut self, reference: &ReferenceImage) -> Result<Option<Embedding>, EngineError> {
        let modified = std::fs::metadata(&reference.path)?.modified()?;
        if let Some(embedding) = self.cache.get(&reference.path, modified) {
            return Ok(Some(embedding.clone()));
        }

        let frame = Frame::open(&reference.path)?;
        let embedding = self.embed(&frame)?;
        if let Some(embedding) = &embedding {
            self.cache.insert(reference.path.clone(), modified, embedding.clone());
        }
        Ok(embedding)
    }

    /// Embed the probe, embed every usable reference, pick the nearest.
    ///
    /// References that cannot be read or show no face are skipped.
    fn identify(
        &mut self,
        probe: &Frame,
        references: &[ReferenceImage],
    ) -> Result<Option<Candidate>, EngineError> {
        let Some(probe) = self.embed(probe)? else {
            tracing::debug!("identify: no face in probe");
            return Ok(None);
        };

        let mut gallery = Vec::with_capacity(references.len());
        for reference in references {
            match self.reference_embedding(reference) {
                Ok(Some(embedding)) => gallery.push(Reference {
                    key: reference.mat_number.clone(),
                    embedding,
                }),
                Ok(None) => tracing::warn!(
                    mat_number = %reference.mat_number,
                    "no face in reference image; skipping"
                ),
                Err(e) => tracing::warn!(
                    mat_number = %reference.mat_number,
                    error = %e,
                    "unusable reference image; skipping"
                ),
            }
        }

        let live: HashSet<&Path> = references.iter().map(|r| r.path.as_path()).collect();
        self.cache.retain_paths(&live);

        let result = CosineMatcher.compare(&probe, &gallery, self.threshold);
        tracing::debug!(
            references = references.len(),
            usable = gallery.len(),
            cached = self.cache.len(),
            distance = ?result.distance,
            matched = result.matched,
            "identify"
        );

        Ok(match (result.key, result.distance) {
            (Some(mat_number), Some(distance)) if result.matched => Some(Candidate { mat_number, distance }),
            _ => None,
        })
    }
}

/// Embed the first face in `faces` (most confident first) that aligns.
///
/// Faces with degenerate landmarks are skipped rather than embedded, so they
/// never match each other.
fn best_embedding(
    faces: &[BoundingBox],
    mut extract: impl FnMut(&BoundingBox) -> Result<Embedding, RecognizerError>,
) -> Result<Option<Embedding>, EngineError> {
    for face in faces {
        match extract(face) {
            Ok(embedding) => {
                tracing::debug!(confidence = face.confidence, "best face selected");
                return Ok(Some(embedding));
            }
            Err(RecognizerError::DegenerateLandmarks) => {
                tracing::debug!(confidence = face.confidence, "degenerate landmarks; skipping face");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}
