//! Client-observable failure taxonomy.
//!
//! Every lower-level error is folded into a `ScanFailure` at the
//! orchestrator boundary; nothing below it decides whether to retry.

use serde::Serialize;

use super::normalizer::NormalizeError;
use super::preparation::PreparationError;
use super::transport::{CaptureError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Preparation,
    Unreachable,
    Timeout,
    ServerError,
    Unauthorized,
    MalformedResponse,
}

impl FailureKind {
    /// What the user can do about it.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::Preparation => "The photo could not be processed. Try again or retake the photo.",
            Self::Unreachable => {
                "Cannot reach the analysis server. Check your connection and the server address."
            }
            Self::Timeout => "The server took too long to respond. It may be busy; try again.",
            Self::ServerError => "The analysis server reported an error. Try again later.",
            Self::Unauthorized => "The camera rejected the access token. Check the device token.",
            Self::MalformedResponse => {
                "The server sent an unexpected answer. This is a server problem, not yours."
            }
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Preparation => "preparation",
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::ServerError => "server error",
            Self::Unauthorized => "unauthorized",
            Self::MalformedResponse => "malformed response",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of a failed attempt: a kind plus the underlying detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ScanFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Guidance followed by the technical detail, for display.
    pub fn user_message(&self) -> String {
        format!("{} ({})", self.kind.guidance(), self.message)
    }
}

impl std::fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<PreparationError> for ScanFailure {
    fn from(e: PreparationError) -> Self {
        Self::new(FailureKind::Preparation, e.to_string())
    }
}

impl From<TransportError> for ScanFailure {
    fn from(e: TransportError) -> Self {
        let kind = match &e {
            TransportError::Unreachable(_) => FailureKind::Unreachable,
            TransportError::Timeout { .. } => FailureKind::Timeout,
            TransportError::Server { .. } => FailureKind::ServerError,
            TransportError::Unauthorized => FailureKind::Unauthorized,
            TransportError::MalformedResponse(_) => FailureKind::MalformedResponse,
            // Nothing was sent; the payloads did not fit the contract.
            TransportError::InvalidRequest(_) => FailureKind::Preparation,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<NormalizeError> for ScanFailure {
    fn from(e: NormalizeError) -> Self {
        Self::new(FailureKind::MalformedResponse, e.to_string())
    }
}

impl From<CaptureError> for ScanFailure {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::Transport(t) => t.into(),
            save @ CaptureError::Save { .. } => Self::new(FailureKind::Preparation, save.to_string()),
        }
    }
}
