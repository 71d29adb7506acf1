use std::time::Duration;
use thiserror::Error;

/// Reasons a dispatch run is refused before any message is sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Emergency message is empty")]
    MessageEmpty,

    #[error("SMS is not available on this device")]
    CapabilityUnavailable,

    #[error("A dispatch run is already in progress")]
    AlreadyRunning,
}

/// Failure of a single send attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Gateway rejected message with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send timed out")]
    Timeout,

    #[error("Messaging unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SendError::Timeout
        } else {
            SendError::Transport(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Location lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Permission to access location was denied")]
    PermissionDenied,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContactError {
    #[error("Message cannot be empty")]
    MessageEmpty,

    #[error("Contact already exists: {0}")]
    DuplicateContact(String),

    #[error("Contact not found: {0}")]
    NotFound(String),
}
