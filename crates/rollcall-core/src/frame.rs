//! Still frames: data-URL payloads, raster decoding, grayscale conversion.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, GrayImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("image payload is empty")]
    Empty,
    #[error("malformed data URL: {0}")]
    BadDataUrl(String),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image dimensions are zero")]
    ZeroDimensions,
}

/// Decode a browser capture payload of the form `data:<mime>;base64,<data>`.
///
/// A bare base64 body without the header is accepted as well. When a header
/// is present the MIME type must be an image type and the encoding base64.
pub fn decode_data_url(payload: &str) -> Result<Vec<u8>, FrameError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }

    let body = match payload.split_once(',') {
        Some((header, body)) => {
            let meta = header
                .strip_prefix("data:")
                .ok_or_else(|| FrameError::BadDataUrl("missing `data:` scheme".into()))?;
            let mime = meta
                .strip_suffix(";base64")
                .ok_or_else(|| FrameError::BadDataUrl(format!("not base64-encoded: {meta:?}")))?;
            let mime = mime.split(';').next().unwrap_or_default();
            if !mime.is_empty() && !mime.starts_with("image/") {
                return Err(FrameError::BadDataUrl(format!("not an image type: {mime:?}")));
            }
            body
        }
        None => payload,
    };

    let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(STANDARD.decode(cleaned)?)
}

/// Decode encoded image bytes (JPEG, PNG, ...) into a raster.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, FrameError> {
    let image = image::load_from_memory(bytes)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(FrameError::ZeroDimensions);
    }
    Ok(image)
}

/// A grayscale still.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Row-major pixel data, one byte per pixel (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn from_image(image: &DynamicImage) -> Self {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        Self {
            data: gray.into_raw(),
            width,
            height,
        }
    }

    /// Load and convert an image file from disk.
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let image = image::open(path)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(FrameError::ZeroDimensions);
        }
        Ok(Self::from_image(&image))
    }

    /// Borrow-free view as an `image` buffer, for resampling.
    pub fn to_gray_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Pixel value at integer coordinates; 0 outside the frame.
    pub fn pixel(&self, x: i64, y: i64) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0.0;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(0) as f32
    }

    /// Bilinear sample at sub-pixel coordinates; out-of-bounds taps read as black.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        self.pixel(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + self.pixel(x0 + 1, y0) * fx * (1.0 - fy)
            + self.pixel(x0, y0 + 1) * (1.0 - fx) * fy
            + self.pixel(x0 + 1, y0 + 1) * fx * fy
    }
}
