//! Error types for the radial feed.

use thiserror::Error;

/// Result type alias using FeedError.
pub type FeedResult<T> = Result<T, FeedError>;

/// Primary error type for chunk ingestion and radial publishing.
#[derive(Debug, Error)]
pub enum FeedError {
    // === Per-chunk Errors ===
    #[error("Chunk transfer failed: {0}")]
    Transfer(String),

    #[error("Failed to decode chunk: {0}")]
    Decode(String),

    #[error("Invalid chunk key '{key}': {message}")]
    InvalidChunkKey { key: String, message: String },

    // === Subscription Errors ===
    #[error("Notification subscription error: {0}")]
    Subscription(String),

    // === Setup Errors ===
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    // === Control Flow ===
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    /// Build an `InvalidChunkKey` error.
    pub fn invalid_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        FeedError::InvalidChunkKey {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the pipeline should skip the failed unit of work and carry on.
    ///
    /// Configuration problems and unknown sites are fatal to the caller;
    /// everything tied to a single chunk or a single remote call is not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            FeedError::Transfer(_)
            | FeedError::Decode(_)
            | FeedError::InvalidChunkKey { .. }
            | FeedError::Subscription(_)
            | FeedError::Io(_) => true,

            FeedError::Configuration(_) | FeedError::UnknownSite(_) | FeedError::Cancelled => {
                false
            }
        }
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Transfer(_) => "transfer",
            FeedError::Decode(_) => "decode",
            FeedError::InvalidChunkKey { .. } => "invalid_key",
            FeedError::Subscription(_) => "subscription",
            FeedError::Configuration(_) => "configuration",
            FeedError::UnknownSite(_) => "unknown_site",
            FeedError::Cancelled => "cancelled",
            FeedError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Subscription(format!("JSON error: {}", err))
    }
}
