use std::time::Duration;
use thiserror::Error;
use super::types::{ItemId, UploadStatus};

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("{0}")]
    Rejected(String),

    #[error("Upload timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Item {0} not found")]
    NotFound(ItemId),

    #[error("Cannot {action} item {id} in state {status}")]
    InvalidTransition {
        id: ItemId,
        status: UploadStatus,
        action: &'static str,
    },

    #[error("Item {0} failed validation and cannot be retried")]
    NotRetryable(ItemId),

    #[error("An upload run is already in progress")]
    AlreadyRunning,

    #[error("No pending items to upload")]
    NothingToStart,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Item {0} already has a live cancellation token")]
    DuplicateDispatch(ItemId),

    #[error("Manager shutdown")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_transition(id: ItemId, status: UploadStatus, action: &'static str) -> Self {
        Self::InvalidTransition { id, status, action }
    }
}

/// Why a candidate never entered the active set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{name} is {size} bytes, larger than the {max} byte limit")]
    TooLarge {
        name: String,
        size: u64,
        max: u64,
    },

    #[error("{name} is not an allowed file type")]
    TypeNotAllowed {
        name: String,
    },

    #[error("{name} ({size} bytes) is already queued")]
    Duplicate {
        name: String,
        size: u64,
    },

    #[error("Queue is full ({max} files maximum)")]
    TooManyFiles {
        max: usize,
    },

    #[error("{0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Error alias
pub type Result<T, E = TransferError> = std::result::Result<T, E>;
