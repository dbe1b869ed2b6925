//! Error types for Vidora Core

use thiserror::Error;

/// Result type alias for playback session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Playback session error types
#[derive(Error, Debug)]
pub enum Error {
    // Lifecycle errors
    #[error("Invalid controller state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Controller is not ready (state: {state})")]
    NotReady { state: String },

    #[error("Controller has been disposed")]
    Disposed,

    #[error("Container '{container}' was not attached after {frames} frames")]
    DomAttachTimeout { container: String, frames: u32 },

    // Media backend errors
    #[error("Media backend construction failed: {0}")]
    BackendConstruction(String),

    #[error("Playback engine error: {0}")]
    PlaybackEngine(String),

    // Quality tier errors
    #[error("Quality tier introspection is not available")]
    TiersUnsupported,

    #[error("Quality tier {index} out of range ({count} tiers)")]
    TierOutOfRange { index: usize, count: usize },

    // Storage errors
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage quota exceeded for key {key}")]
    QuotaExceeded { key: String },

    #[error("Corrupt stored data: {0}")]
    CorruptData(#[from] serde_json::Error),

    // Content API errors
    #[error("Content API request failed: {0}")]
    ContentApi(String),

    #[cfg(feature = "http")]
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a playback engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Error::PlaybackEngine(msg.into())
    }

    /// Returns true if this error is recoverable locally.
    ///
    /// Transient readiness, missing capabilities and storage failures are
    /// handled where they occur; engine failures end the current load.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DomAttachTimeout { .. }
                | Error::TiersUnsupported
                | Error::StorageUnavailable(_)
                | Error::QuotaExceeded { .. }
                | Error::CorruptData(_)
                | Error::Io(_)
        )
    }

    /// Returns the error code for host-side reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::NotReady { .. } => "NOT_READY",
            Error::Disposed => "DISPOSED",
            Error::DomAttachTimeout { .. } => "DOM_ATTACH_TIMEOUT",
            Error::BackendConstruction(_) => "BACKEND_CONSTRUCTION",
            Error::PlaybackEngine(_) => "PLAYBACK_ENGINE",
            Error::TiersUnsupported => "TIERS_UNSUPPORTED",
            Error::TierOutOfRange { .. } => "TIER_OUT_OF_RANGE",
            Error::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Error::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Error::CorruptData(_) => "CORRUPT_DATA",
            Error::ContentApi(_) => "CONTENT_API",
            #[cfg(feature = "http")]
            Error::Network(_) => "NETWORK",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Io(_) => "IO",
        }
    }
}
