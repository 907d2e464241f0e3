//! Error types for talkback.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TalkbackError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Backend errors
    #[error("Recognition failed ({backend}): {message}")]
    Recognition { backend: String, message: String },

    #[error("Generation failed ({backend}): {message}")]
    Generation { backend: String, message: String },

    #[error("Synthesis failed ({backend}): {message}")]
    Synthesis { backend: String, message: String },

    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Backend {backend} returned status {status}: {message}")]
    BackendStatus {
        backend: String,
        status: u16,
        message: String,
    },

    #[error("No backend available for {capability}")]
    BackendUnavailable { capability: String },

    #[cfg(feature = "http-backends")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Audio errors
    #[error("Audio encoding failed: {message}")]
    Audio { message: String },

    // Transport errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl TalkbackError {
    /// Whether the failure is worth retrying against another backend
    /// (timeouts, rate limits, server errors, dropped connections).
    pub fn is_transient(&self) -> bool {
        match self {
            TalkbackError::Timeout { .. } => true,
            TalkbackError::BackendStatus { status, .. } => *status == 429 || *status >= 500,
            #[cfg(feature = "http-backends")]
            TalkbackError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TalkbackError::Io(_) => true,
            _ => false,
        }
    }
}

impl From<hound::Error> for TalkbackError {
    fn from(err: hound::Error) -> Self {
        TalkbackError::Audio {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TalkbackError {
    fn from(err: serde_json::Error) -> Self {
        TalkbackError::Protocol {
            message: err.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, TalkbackError>;
