//! Error types for Warden Guard

use thiserror::Error;

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Warden error types
#[derive(Debug, Error)]
pub enum WardenError {
    /// A scanner did not finish within its time budget
    #[error("Scanner '{scanner}' timed out after {timeout_ms}ms")]
    ScannerTimeout { scanner: String, timeout_ms: u64 },

    /// A scanner returned an error or panicked
    #[error("Scanner '{scanner}' failed: {message}")]
    ScannerCrash { scanner: String, message: String },

    /// The generator could not produce a completion
    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    /// No anonymization mapping exists for the session
    #[error("No vault entry for session: {0}")]
    VaultMiss(String),

    /// The overall request deadline expired
    #[error("Request timed out after {0}ms")]
    RequestTimeout(u64),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Scanner name does not resolve to a known scanner kind
    #[error("Unknown scanner: {0}")]
    UnknownScanner(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// HTTP error talking to the generator backend
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl WardenError {
    /// Errors the pipeline absorbs locally instead of surfacing to the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WardenError::ScannerTimeout { .. }
                | WardenError::ScannerCrash { .. }
                | WardenError::VaultMiss(_)
        )
    }
}
