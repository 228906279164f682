pub mod preprocess;
pub mod types;

pub use preprocess::*;
pub use types::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreparationError {
    #[error("Cannot read captured image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("JPEG encoding failed: {0}")]
    Encode(String),

    #[error("Payload count must be between 1 and {max}, got {requested}")]
    InvalidTargetCount { requested: usize, max: usize },

    #[error("Preparation task failed: {0}")]
    Task(String),
}
