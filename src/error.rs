//! Error types for Larder
//!
//! All modules use `LarderResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Larder operations
pub type LarderResult<T> = Result<T, LarderError>;

/// Boxed error raised by a caller-supplied fetch function
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All errors that can occur in Larder
#[derive(Error, Debug)]
pub enum LarderError {
    // Key errors
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    // Entry errors
    #[error("Cache entry not found: {0}")]
    NotFound(String),

    #[error("Corrupt cache entry {fingerprint}: {reason}")]
    CorruptEntry { fingerprint: String, reason: String },

    // Lock errors
    #[error("Timed out after {waited_ms} ms waiting for lock on {fingerprint}")]
    LockTimeout { fingerprint: String, waited_ms: u128 },

    // Fetch errors
    #[error("Fetch failed for {label}: {source}")]
    FetchFailed {
        label: String,
        #[source]
        source: BoxError,
    },

    // Storage errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not enough free space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl LarderError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a corrupt entry error
    pub fn corrupt(fingerprint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            fingerprint: fingerprint.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a fetch function failure, keeping the original error as source
    pub fn fetch_failed(label: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::FetchFailed {
            label: label.into(),
            source: source.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Another process is populating this entry. Retry, or raise cache.lock_timeout_secs")
            }
            Self::CorruptEntry { .. } => Some("Run: larder clean"),
            Self::InsufficientSpace { .. } => Some("Run: larder prune --max-total-mb <N>"),
            Self::NotFound(_) => Some("Run: larder import <name> <file>"),
            _ => None,
        }
    }
}
