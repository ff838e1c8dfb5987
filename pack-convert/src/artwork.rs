//! Fitting arbitrary artwork onto the player's 320x240 grayscale screen.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use more_asserts as ma;
use pack_writer::bmp::{self, IMAGE_HEIGHT, IMAGE_WIDTH};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ArtworkError {
    #[error("couldn't decode image")]
    Decode(#[from] image::ImageError),

    #[error("couldn't encode bitmap")]
    Encode(#[from] bmp::WriteBmpError),
}

/// Convert one image asset into the device BMP byte stream (not yet
/// encrypted).
///
/// The input is grayscaled, scaled to fit inside the screen with its aspect
/// ratio kept, centered on a black canvas, and flipped so the rows run
/// bottom-up the way BMP stores them.
pub fn encode_image(path: &Path) -> Result<Vec<u8>, ArtworkError> {
    let decoded = image::open(path)?.into_luma8();
    let canvas = fit_to_screen(&decoded);
    let mut out = Vec::with_capacity(4 * 1024);
    bmp::write_grayscale_bmp(&mut out, canvas.as_raw())?;
    Ok(out)
}

fn fit_to_screen(source: &GrayImage) -> GrayImage {
    let (width, height) = source.dimensions();
    let scale = (f64::from(IMAGE_WIDTH) / f64::from(width.max(1)))
        .min(f64::from(IMAGE_HEIGHT) / f64::from(height.max(1)));
    let scaled_width = ((f64::from(width) * scale).round() as u32).clamp(1, IMAGE_WIDTH);
    let scaled_height = ((f64::from(height) * scale).round() as u32).clamp(1, IMAGE_HEIGHT);
    ma::assert_le!(scaled_width, IMAGE_WIDTH);
    ma::assert_le!(scaled_height, IMAGE_HEIGHT);
    let resized = imageops::resize(source, scaled_width, scaled_height, FilterType::Lanczos3);

    let mut canvas = GrayImage::from_pixel(IMAGE_WIDTH, IMAGE_HEIGHT, Luma([0]));
    let x = i64::from((IMAGE_WIDTH - scaled_width) / 2);
    let y = i64::from((IMAGE_HEIGHT - scaled_height) / 2);
    imageops::replace(&mut canvas, &resized, x, y);
    imageops::flip_vertical_in_place(&mut canvas);
    canvas
}
