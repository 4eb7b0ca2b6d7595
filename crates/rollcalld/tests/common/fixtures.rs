use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};

const SIZE: u32 = 64;

fn png_data_url(image: GrayImage) -> String {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    format!("data:image/png;base64,{}", STANDARD.encode(buf))
}

fn scale(v: u32) -> u8 {
    (v * 255 / (SIZE - 1)) as u8
}

/// Dark on the left, bright on the right.
pub fn horizontal_gradient() -> String {
    png_data_url(GrayImage::from_fn(SIZE, SIZE, |x, _| Luma([scale(x)])))
}

/// Dark at the top, bright at the bottom.
pub fn vertical_gradient() -> String {
    png_data_url(GrayImage::from_fn(SIZE, SIZE, |_, y| Luma([scale(y)])))
}

/// 8x8 board of 8px squares.
pub fn checkerboard() -> String {
    png_data_url(GrayImage::from_fn(SIZE, SIZE, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Luma([40])
        } else {
            Luma([215])
        }
    }))
}

/// A blank frame: nothing a detector would call a face.
pub fn uniform() -> String {
    png_data_url(GrayImage::from_pixel(SIZE, SIZE, Luma([128])))
}

/// Decode a fixture back to a raster, for writing images by hand.
pub fn decode(data_url: &str) -> DynamicImage {
    let (_, body) = data_url.split_once(',').expect("data url");
    image::load_from_memory(&STANDARD.decode(body).expect("base64")).expect("image")
}
