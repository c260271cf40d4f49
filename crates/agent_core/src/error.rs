//! Error types for the decision engine.
//!
//! Invariant violations (negative resources, double cell assignment,
//! occupancy collisions) are logic bugs and deliberately panic with context
//! rather than surfacing here; the host process catches and logs them. This
//! type covers the conditions that are expected to occur in normal operation.

use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error type for all engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The observation snapshot is structurally invalid.
    #[error("Malformed observation: {0}")]
    MalformedObservation(String),

    /// The persisted strategy cache blob could not be decoded.
    #[error("Failed to decode strategy cache: {0}")]
    CacheDecode(String),

    /// The persisted strategy cache blob could not be encoded.
    #[error("Failed to encode strategy cache: {0}")]
    CacheEncode(String),

    /// Failed to parse a configuration file.
    #[error("Failed to parse config '{path}': {message}")]
    ConfigParse {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },
}
