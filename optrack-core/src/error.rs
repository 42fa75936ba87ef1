//! Error types for optrack-core

use thiserror::Error;

/// Main error type for the optrack-core library
///
/// Tracker mutations never fail; unknown or already-terminal ids are
/// silent no-ops. Errors only come from the ambient layers (config,
/// logging, feed decoding).
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed operation feed record
    #[error("feed error at line {line}: {message}")]
    Feed { line: usize, message: String },
}

/// Result type alias for optrack-core
pub type Result<T> = std::result::Result<T, Error>;
