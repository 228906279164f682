//! Image preparation for upload.
//!
//! Pipeline flow:
//! 1. Read + validate bytes (size bounds)
//! 2. Decode
//! 3. Fix EXIF rotation (phone photos are often stored sideways)
//! 4. Convert to RGB, pre-downscale huge inputs
//! 5. Resize to the square target (stretch or pad)
//! 6. Encode JPEG at reduced quality
//! 7. Replicate into as many slots as the backend contract needs
//!
//! Any failure is an error. The unprocessed original is never uploaded.

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, Rgb, RgbImage};
use tracing::debug;

use super::types::{CapturedImage, PreparationConfig, PreparedPayload, ResizeMode, MAX_PAYLOADS};
use super::PreparationError;

/// Maximum accepted input size (phone photos are a few MB).
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Smallest byte count any real JPEG/PNG can have.
const MIN_IMAGE_BYTES: usize = 67;

const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Turns one captured photo into upload-ready payloads.
pub trait ImagePreparer: Send + Sync {
    /// Produce `target_count` payloads (1..=3) from one capture. When more
    /// than one slot is requested the same prepared image fills every slot.
    fn prepare(
        &self,
        image: &CapturedImage,
        target_count: usize,
    ) -> Result<Vec<PreparedPayload>, PreparationError>;
}

/// Resize + JPEG re-encode preparer.
pub struct JpegPreparer {
    config: PreparationConfig,
}

impl JpegPreparer {
    pub fn new(config: PreparationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreparationConfig {
        &self.config
    }

    /// Prepare from bytes already in memory.
    pub fn prepare_bytes(
        &self,
        bytes: &[u8],
        target_count: usize,
    ) -> Result<Vec<PreparedPayload>, PreparationError> {
        if target_count == 0 || target_count > MAX_PAYLOADS {
            return Err(PreparationError::InvalidTargetCount {
                requested: target_count,
                max: MAX_PAYLOADS,
            });
        }

        let jpeg = self.encode_one(bytes)?;

        Ok((0..target_count)
            .map(|i| PreparedPayload {
                bytes: jpeg.clone(),
                content_type: JPEG_CONTENT_TYPE,
                filename: format!("image_{i}.jpg"),
            })
            .collect())
    }

    fn encode_one(&self, bytes: &[u8]) -> Result<Vec<u8>, PreparationError> {
        validate_image_bytes(bytes)?;

        let img = image::load_from_memory(bytes)
            .map_err(|e| PreparationError::Decode(e.to_string()))?;
        let (orig_w, orig_h) = img.dimensions();

        let img = if self.config.correct_orientation {
            apply_orientation(img, read_exif_orientation(bytes))
        } else {
            img
        };

        let rgb = img.to_rgb8();
        let working = pre_downscale(&rgb, self.config.max_input_dimension);
        let resized = match self.config.resize_mode {
            ResizeMode::Stretch => stretch_to_square(&working, self.config.target_size),
            ResizeMode::Pad => {
                pad_to_square(&working, self.config.target_size, self.config.padding_color)
            }
        };

        let jpeg = encode_jpeg(&resized, self.config.jpeg_quality)?;

        debug!(
            original = format!("{orig_w}x{orig_h}"),
            output = format!("{0}x{0}", self.config.target_size),
            input_size = bytes.len(),
            jpeg_size = jpeg.len(),
            "Image prepared for upload"
        );

        Ok(jpeg)
    }
}

impl Default for JpegPreparer {
    fn default() -> Self {
        Self::new(PreparationConfig::default())
    }
}

impl ImagePreparer for JpegPreparer {
    fn prepare(
        &self,
        image: &CapturedImage,
        target_count: usize,
    ) -> Result<Vec<PreparedPayload>, PreparationError> {
        let bytes = std::fs::read(image.path()).map_err(|source| PreparationError::Read {
            path: image.path().to_path_buf(),
            source,
        })?;
        self.prepare_bytes(&bytes, target_count)
    }
}

// ═══════════════════════════════════════════════════════════
// Orientation
// ═══════════════════════════════════════════════════════════

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform.
///
/// 1 = Normal, 2 = Mirrored, 3 = 180deg, 4 = Flipped V,
/// 5 = Mirrored + 90deg CW, 6 = 90deg CW, 7 = Mirrored + 270deg CW, 8 = 270deg CW
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ═══════════════════════════════════════════════════════════
// Pure helper functions
// ═══════════════════════════════════════════════════════════

/// Reject clearly invalid input before decoding.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), PreparationError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(PreparationError::InvalidImage(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(PreparationError::InvalidImage(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Pre-downscale oversized images to reduce memory before the main resize.
fn pre_downscale(img: &RgbImage, max_dim: u32) -> Cow<'_, RgbImage> {
    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);

    if largest <= max_dim {
        return Cow::Borrowed(img);
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    debug!(
        from = format!("{w}x{h}"),
        to = format!("{new_w}x{new_h}"),
        "Pre-downscaling oversized image"
    );

    Cow::Owned(image::imageops::resize(img, new_w, new_h, FilterType::Triangle))
}

/// Dimensions that fit inside a square while preserving aspect ratio.
/// Small images are not upscaled.
pub fn compute_fit_dimensions(width: u32, height: u32, target_size: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }

    let scale = (target_size as f32 / width as f32).min(target_size as f32 / height as f32);
    let scale = scale.min(1.0);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, target_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, target_size);

    (new_w, new_h)
}

fn stretch_to_square(img: &RgbImage, target: u32) -> RgbImage {
    image::imageops::resize(img, target, target, FilterType::CatmullRom)
}

fn pad_to_square(img: &RgbImage, target: u32, padding: [u8; 3]) -> RgbImage {
    let (content_w, content_h) = compute_fit_dimensions(img.width(), img.height(), target);
    let resized = image::imageops::resize(img, content_w, content_h, FilterType::CatmullRom);

    let mut canvas = RgbImage::from_pixel(target, target, Rgb(padding));
    let offset_x = (target - content_w) / 2;
    let offset_y = (target - content_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x, offset_y);
    canvas
}

/// Encode an RGB image as JPEG at the given quality.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, PreparationError> {
    let dynamic = DynamicImage::ImageRgb8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Jpeg(quality.clamp(1, 100)))
        .map_err(|e| PreparationError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}
