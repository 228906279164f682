pub mod capture_device;
pub mod client;
pub mod types;

pub use capture_device::*;
pub use client::*;
pub use types::*;

use thiserror::Error;

/// Failure categories surfaced by every HTTP call this crate makes.
///
/// None of these are retried internally. The orchestrator decides.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Cannot reach {0}")]
    Unreachable(String),

    #[error("Request timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("HTTP {status} {body}")]
    Server { status: u16, body: String },

    #[error("Credentials rejected (HTTP 401)")]
    Unauthorized,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The request could not be built locally (wrong payload count, bad
    /// feature vector); nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
