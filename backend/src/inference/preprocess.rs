use std::path::Path;

use image::imageops::FilterType;
use image::ImageReader;
use ndarray::Array4;

use super::error::InferenceError;

pub const IMAGE_SIZE: u32 = 256;
pub const CHANNELS: usize = 3;

/// Pixel tensor laid out as (batch, height, width, channel), values 0-255.
pub type ImageTensor = Array4<f32>;

pub fn preprocess_image(path: &Path) -> Result<ImageTensor, InferenceError> {
    if !path.exists() {
        return Err(InferenceError::Validation(format!(
            "Image not found: {}",
            path.display()
        )));
    }

    let decoded = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| {
            log::debug!("Failed to open {}: {}", path.display(), e);
            unreadable()
        })?
        .decode()
        .map_err(|e| {
            log::debug!("Failed to decode {}: {}", path.display(), e);
            unreadable()
        })?;

    // Stretch to the target size; aspect ratio is not preserved.
    let rgb = decoded
        .resize_exact(IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom)
        .to_rgb8();

    let side = IMAGE_SIZE as usize;
    let data: Vec<f32> = rgb.into_raw().into_iter().map(f32::from).collect();
    Array4::from_shape_vec((1, side, side, CHANNELS), data)
        .map_err(|e| InferenceError::Internal(format!("tensor shape mismatch: {}", e)))
}

fn unreadable() -> InferenceError {
    InferenceError::Validation("Could not read image. Upload a valid image file.".to_string())
}
