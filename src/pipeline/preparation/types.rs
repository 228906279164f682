use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Largest number of payloads any backend contract accepts in one request.
pub const MAX_PAYLOADS: usize = 3;

/// A photo handed over by the camera (or the capture peripheral).
///
/// Only a reference: the file is read when preparation runs and never
/// modified, so the same capture can be prepared again on retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    path: PathBuf,
}

impl CapturedImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// String form stored alongside a saved scan.
    pub fn reference(&self) -> String {
        self.path.display().to_string()
    }
}

/// One resized, re-encoded image ready to be embedded in a multipart form.
#[derive(Clone, PartialEq, Eq)]
pub struct PreparedPayload {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

// Bytes are summarized, never dumped.
impl std::fmt::Debug for PreparedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedPayload")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("content_type", &self.content_type)
            .field("filename", &self.filename)
            .finish()
    }
}

/// How a non-square photo is brought to the square target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Scale both axes to the target, ignoring aspect ratio (what the
    /// backend models were trained on).
    #[default]
    Stretch,
    /// Preserve aspect ratio and pad the remainder with `padding_color`.
    Pad,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationConfig {
    /// Edge length of the square output, in pixels.
    pub target_size: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    pub resize_mode: ResizeMode,
    /// Inputs larger than this on their longest edge are downscaled first.
    pub max_input_dimension: u32,
    pub padding_color: [u8; 3],
    /// Apply EXIF orientation before resizing.
    pub correct_orientation: bool,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            target_size: 224,
            jpeg_quality: 80,
            resize_mode: ResizeMode::Stretch,
            max_input_dimension: 4096,
            padding_color: [0, 0, 0],
            correct_orientation: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_small_square_jpeg() {
        let config = PreparationConfig::default();
        assert_eq!(config.target_size, 224);
        assert!(config.target_size <= 256);
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.resize_mode, ResizeMode::Stretch);
    }

    #[test]
    fn payload_debug_hides_bytes() {
        let payload = PreparedPayload {
            bytes: vec![0xFF; 1024],
            content_type: "image/jpeg",
            filename: "image_0.jpg".into(),
        };
        let debug = format!("{payload:?}");
        assert!(debug.contains("<1024 bytes>"));
        assert!(!debug.contains("255"));
    }

    #[test]
    fn captured_image_reference_is_path() {
        let image = CapturedImage::new("/tmp/nail.jpg");
        assert_eq!(image.reference(), "/tmp/nail.jpg");
        assert_eq!(image.path(), Path::new("/tmp/nail.jpg"));
    }

    #[test]
    fn resize_mode_serde() {
        assert_eq!(serde_json::to_string(&ResizeMode::Pad).unwrap(), "\"pad\"");
        let mode: ResizeMode = serde_json::from_str("\"stretch\"").unwrap();
        assert_eq!(mode, ResizeMode::Stretch);
    }
}
