//! Error types for QuickCall.

use thiserror::Error;

/// Primary error type for all call operations.
///
/// Every variant is scoped to a single call attempt; none of them is fatal to
/// the process.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Signaling error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Signaling {
        status: Option<u16>,
        message: String,
    },

    #[error("Media acquisition error: {0}")]
    MediaAcquisition(String),

    #[error("Peer connection error: {0}")]
    Transport(String),

    #[error("Control event parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: &'static str, ms: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Call attempt canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad error category for routing caller-side recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Credential,
    Signaling,
    Media,
    Transport,
    Protocol,
    Timeout,
    Configuration,
    Canceled,
    Unknown,
}

impl CallError {
    /// Create a signaling error for a non-success HTTP status.
    pub fn signaling_status(status: u16, message: impl Into<String>) -> Self {
        Self::Signaling {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a signaling error for a transport-level failure.
    pub fn signaling(message: impl Into<String>) -> Self {
        Self::Signaling {
            status: None,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Credential(_) => ErrorCategory::Credential,
            Self::Signaling { .. } => ErrorCategory::Signaling,
            Self::MediaAcquisition(_) => ErrorCategory::Media,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Parse(_) => ErrorCategory::Protocol,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Canceled => ErrorCategory::Canceled,
            Self::InvalidState(_) | Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether a caller-driven retry of the whole call attempt may succeed.
    ///
    /// The session manager never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Signaling {
                status: Some(status),
                ..
            } => matches!(status, 429 | 500..=599),
            Self::Signaling { status: None, .. } => true,
            Self::Credential(_) | Self::Timeout { .. } | Self::Transport(_) => true,
            _ => false,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CallError>;
