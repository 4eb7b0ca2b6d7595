//! Face image store: reference images on disk, keyed by matriculation number.
//!
//! Layout under the data directory:
//!
//! ```text
//! captured_students_faces/<mat_number>.jpg   one reference image per student
//! recognition_image/captured.jpg             last capture, overwritten per attempt
//! staging/<mat_number>-<uuid>.jpg            uploads awaiting validation
//! ```
//!
//! All methods block on the filesystem; async callers go through
//! `spawn_blocking`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use thiserror::Error;

use crate::validation;

pub const FACES_DIR: &str = "captured_students_faces";
pub const CAPTURE_DIR: &str = "recognition_image";
pub const STAGING_DIR: &str = "staging";
const CAPTURE_FILE: &str = "captured.jpg";
const REFERENCE_EXT: &str = "jpg";

#[derive(Debug, Error)]
pub enum FaceStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding image: {0}")]
    Encode(#[from] image::ImageError),
}

/// A stored reference image and the key it is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub mat_number: String,
    pub path: PathBuf,
}

/// An upload written to staging, and where it goes once registration commits.
#[derive(Debug, Clone)]
pub struct StagedImage {
    pub staged: PathBuf,
    pub target: PathBuf,
}

pub struct FaceStore {
    faces_dir: PathBuf,
    capture_dir: PathBuf,
    staging_dir: PathBuf,
}

impl FaceStore {
    /// Create the directory layout under `data_dir`. Existing files, staged
    /// uploads included, are left alone.
    pub fn open(data_dir: &Path) -> Result<Self, FaceStoreError> {
        let store = Self {
            faces_dir: data_dir.join(FACES_DIR),
            capture_dir: data_dir.join(CAPTURE_DIR),
            staging_dir: data_dir.join(STAGING_DIR),
        };
        for dir in [&store.faces_dir, &store.capture_dir, &store.staging_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    /// Remove uploads left in staging by an interrupted registration.
    ///
    /// Only the service calls this, once at startup and before it accepts
    /// requests; other processes sharing the data directory must not.
    pub fn clear_staging(&self) -> Result<usize, FaceStoreError> {
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.staging_dir)? {
            let path = entry?.path();
            if path.is_file() {
                tracing::debug!(path = %path.display(), "removing stale staged upload");
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn faces_dir(&self) -> &Path {
        &self.faces_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Final location of a student's reference image.
    pub fn reference_path(&self, mat_number: &str) -> PathBuf {
        self.faces_dir.join(format!("{mat_number}.{REFERENCE_EXT}"))
    }

    /// Encode `image` as JPEG into staging.
    pub fn stage(&self, image: &DynamicImage, mat_number: &str) -> Result<StagedImage, FaceStoreError> {
        let staged = self
            .staging_dir
            .join(format!("{mat_number}-{}.{REFERENCE_EXT}", uuid::Uuid::new_v4()));
        write_jpeg(image, &staged)?;
        Ok(StagedImage {
            staged,
            target: self.reference_path(mat_number),
        })
    }

    /// Remove a staged upload. Missing files are fine.
    pub fn discard(&self, staged: &StagedImage) {
        match std::fs::remove_file(&staged.staged) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %staged.staged.display(), error = %e, "failed to remove staged upload")
            }
        }
    }

    /// Every reference image on disk, ordered by matriculation number.
    ///
    /// Files whose stem is not a valid matriculation number are ignored.
    pub fn references(&self) -> Result<Vec<ReferenceImage>, FaceStoreError> {
        let mut references = Vec::new();
        for entry in std::fs::read_dir(&self.faces_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let is_jpeg = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(REFERENCE_EXT));
            let stem = path.file_stem().and_then(|s| s.to_str());
            match stem.map(validation::mat_number) {
                Some(Ok(mat_number)) if is_jpeg => references.push(ReferenceImage { mat_number, path }),
                _ => tracing::debug!(path = %path.display(), "skipping non-reference file"),
            }
        }
        references.sort_by(|a, b| a.mat_number.cmp(&b.mat_number));
        Ok(references)
    }

    /// Overwrite the transient capture file.
    pub fn write_capture(&self, image: &DynamicImage) -> Result<PathBuf, FaceStoreError> {
        let path = self.capture_dir.join(CAPTURE_FILE);
        write_jpeg(image, &path)?;
        Ok(path)
    }
}

fn write_jpeg(image: &DynamicImage, path: &Path) -> Result<(), FaceStoreError> {
    // JPEG has no alpha channel
    image.to_rgb8().save_with_format(path, ImageFormat::Jpeg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([200, 120, 40, 255])))
    }

    #[test]
    fn open_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).unwrap();
        assert!(store.faces_dir().is_dir());
        assert!(store.staging_dir().is_dir());
        assert!(tmp.path().join(CAPTURE_DIR).is_dir());
    }

    #[test]
    fn second_open_keeps_inflight_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let serving = FaceStore::open(tmp.path()).unwrap();
        let staged = serving.stage(&sample_image(), "MAT001").unwrap();

        let other = FaceStore::open(tmp.path()).unwrap();
        assert!(staged.staged.is_file());
        assert!(other.references().unwrap().is_empty());
    }

    #[test]
    fn clear_staging_removes_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).unwrap();
        std::fs::write(store.staging_dir().join("old.jpg"), b"x").unwrap();
        std::fs::write(store.staging_dir().join("older.jpg"), b"x").unwrap();

        assert_eq!(store.clear_staging().unwrap(), 2);
        assert_eq!(std::fs::read_dir(store.staging_dir()).unwrap().count(), 0);
        assert_eq!(store.clear_staging().unwrap(), 0);
    }

    #[test]
    fn stage_then_discard() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).unwrap();

        let staged = store.stage(&sample_image(), "MAT001").unwrap();
        assert!(staged.staged.is_file());
        assert_eq!(staged.target, store.faces_dir().join("MAT001.jpg"));
        assert!(!staged.target.exists());

        store.discard(&staged);
        assert!(!staged.staged.exists());
        // Second discard is a no-op
        store.discard(&staged);
    }

    #[test]
    fn references_are_keyed_by_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).unwrap();
        for mat in ["MAT002", "MAT001"] {
            let staged = store.stage(&sample_image(), mat).unwrap();
            std::fs::rename(&staged.staged, &staged.target).unwrap();
        }
        std::fs::write(store.faces_dir().join("notes.txt"), b"ignore me").unwrap();
        std::fs::write(store.faces_dir().join("bad name.jpg"), b"ignore me").unwrap();

        let refs = store.references().unwrap();
        let keys: Vec<&str> = refs.iter().map(|r| r.mat_number.as_str()).collect();
        assert_eq!(keys, ["MAT001", "MAT002"]);
        assert_eq!(refs[0].path, store.reference_path("MAT001"));
    }

    #[test]
    fn capture_is_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FaceStore::open(tmp.path()).unwrap();
        let first = store.write_capture(&sample_image()).unwrap();
        let second = store.write_capture(&sample_image()).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_dir(tmp.path().join(CAPTURE_DIR)).unwrap().count(), 1);
        assert!(image::open(&second).is_ok());
    }
}
