//! Error types for Cadence.

use thiserror::Error;

/// Result type alias using Cadence's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadence.
#[derive(Error, Debug)]
pub enum Error {
    // Backend errors
    #[error("Audio backend error: {0}")]
    Backend(String),

    // Scheduling errors
    #[error("All unpaused channels have full buffers.")]
    NoChannelAvailable,

    #[error("Channel queue is full, retry later")]
    QueueFull,

    #[error("Channel {index} out of range (have {count})")]
    InvalidChannel { index: usize, count: usize },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns true if this error came from the audio backend.
    ///
    /// Backend errors are fatal to the audio session.
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Returns true if the request may succeed if retried later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NoChannelAvailable | Self::QueueFull)
    }
}
