//! Error types for EasyEXL.
//!
//! A single error enum covers configuration, filesystem, external tool and
//! hub failures.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the EasyEXL library.
#[derive(Debug, Error)]
pub enum EasyExlError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid bits-per-weight value '{value}': {reason}")]
    InvalidBpw { value: String, reason: String },

    #[error("Invalid model path: {0}")]
    InvalidModelPath(PathBuf),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // External tool errors
    #[error("{tool} not found: {path}")]
    ToolMissing { tool: String, path: PathBuf },

    #[error("Failed to launch {tool}: {message}")]
    ToolLaunch { tool: String, message: String },

    #[error("{tool} exited with status: {code}")]
    ToolFailed { tool: String, code: i32 },

    // Hub errors
    #[error("Hub error: {message}")]
    Hub {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for EasyEXL operations.
pub type Result<T> = std::result::Result<T, EasyExlError>;

impl From<std::io::Error> for EasyExlError {
    fn from(err: std::io::Error) -> Self {
        EasyExlError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for EasyExlError {
    fn from(err: serde_json::Error) -> Self {
        EasyExlError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for EasyExlError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => EasyExlError::Hub {
                message: err.to_string(),
                status_code: Some(status.as_u16()),
            },
            None => EasyExlError::Network {
                message: err.to_string(),
            },
        }
    }
}

impl EasyExlError {
    /// Create an IO error with a description of what was being done and the path involved.
    pub fn io(context: &str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        EasyExlError::Io {
            message: format!("{context}: {err}"),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        EasyExlError::Config {
            message: message.into(),
        }
    }
}
