//! Deterministic stand-in for the ONNX engine.
//!
//! The "embedding" of an image is its mean-centred 8x8 block average, so
//! differently oriented gradients are orthogonal and an image matches
//! itself. Frames with almost no contrast have "no face".

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use rollcall_core::{CosineMatcher, Embedding, Frame, Matcher, Reference};
use rollcalld::faces::ReferenceImage;
use rollcalld::recognition::{Candidate, FaceEngine, RecognitionError};

const GRID: usize = 8;
const MIN_CONTRAST: f32 = 1.0;
pub const THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StubMode {
    Normal = 0,
    /// Detection passes, reference validation finds no face.
    RejectReferences = 1,
    Busy = 2,
    Broken = 3,
    Panic = 4,
}

#[derive(Clone, Default)]
pub struct StubEngine {
    mode: Arc<AtomicU8>,
}

impl StubEngine {
    pub fn set_mode(&self, mode: StubMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    fn check_mode(&self) -> Result<StubMode, RecognitionError> {
        match self.mode.load(Ordering::SeqCst) {
            0 => Ok(StubMode::Normal),
            1 => Ok(StubMode::RejectReferences),
            2 => Err(RecognitionError::Busy),
            3 => Err(RecognitionError::Unavailable("stub engine is broken".into())),
            _ => panic!("stub engine panicked"),
        }
    }
}

/// Standard deviation of pixel brightness. Near zero for blank frames.
fn contrast(frame: &Frame) -> f32 {
    if frame.data.is_empty() {
        return 0.0;
    }
    let n = frame.data.len() as f32;
    let mean = frame.data.iter().map(|&b| b as f32).sum::<f32>() / n;
    let variance = frame.data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}

pub fn embed(frame: &Frame) -> Option<Embedding> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    if w < GRID || h < GRID || contrast(frame) < MIN_CONTRAST {
        return None;
    }

    let mut cells = Vec::with_capacity(GRID * GRID);
    for gy in 0..GRID {
        for gx in 0..GRID {
            let (x0, x1) = (gx * w / GRID, (gx + 1) * w / GRID);
            let (y0, y1) = (gy * h / GRID, (gy + 1) * h / GRID);
            let mut sum = 0.0f32;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += frame.data[y * w + x] as f32;
                }
            }
            cells.push(sum / ((x1 - x0) * (y1 - y0)) as f32);
        }
    }
    let mean = cells.iter().sum::<f32>() / cells.len() as f32;
    let centred = cells.into_iter().map(|v| v - mean).collect();
    Some(Embedding::normalized(centred, Some("stub".into())))
}

impl FaceEngine for StubEngine {
    fn count_faces(&self, frame: Arc<Frame>) -> BoxFuture<'_, Result<usize, RecognitionError>> {
        async move {
            self.check_mode()?;
            Ok(usize::from(embed(&frame).is_some()))
        }
        .boxed()
    }

    fn validate_reference(&self, path: PathBuf) -> BoxFuture<'_, Result<(), RecognitionError>> {
        async move {
            if self.check_mode()? == StubMode::RejectReferences {
                return Err(RecognitionError::NoFace);
            }
            let frame = Frame::open(&path).map_err(|e| RecognitionError::Unavailable(e.to_string()))?;
            embed(&frame).map(|_| ()).ok_or(RecognitionError::NoFace)
        }
        .boxed()
    }

    fn find_best_match(
        &self,
        probe: Arc<Frame>,
        references: Vec<ReferenceImage>,
    ) -> BoxFuture<'_, Result<Option<Candidate>, RecognitionError>> {
        async move {
            self.check_mode()?;
            let Some(probe) = embed(&probe) else {
                return Ok(None);
            };
            let gallery: Vec<Reference> = references
                .iter()
                .filter_map(|r| {
                    let frame = Frame::open(&r.path).ok()?;
                    Some(Reference {
                        key: r.mat_number.clone(),
                        embedding: embed(&frame)?,
                    })
                })
                .collect();

            let result = CosineMatcher.compare(&probe, &gallery, THRESHOLD);
            Ok(match (result.matched, result.key, result.distance) {
                (true, Some(mat_number), Some(distance)) => Some(Candidate { mat_number, distance }),
                _ => None,
            })
        }
        .boxed()
    }
}
