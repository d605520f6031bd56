//! Unified error type for the triage crate
//!
//! Errors are serializable so they can travel over the message channel that
//! connects the pipeline to the settings surface. Only construction, config
//! loading and the raw adapters return them: pipeline operations log and
//! degrade instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum TriageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote classifier timed out after {0}ms")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown category: {0}")]
    InvalidCategory(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for TriageError {
    fn from(err: std::io::Error) -> Self {
        TriageError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for TriageError {
    fn from(err: toml::de::Error) -> Self {
        TriageError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        TriageError::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for TriageError {
    fn from(err: rusqlite::Error) -> Self {
        TriageError::Store(err.to_string())
    }
}

impl From<r2d2::Error> for TriageError {
    fn from(err: r2d2::Error) -> Self {
        TriageError::Store(err.to_string())
    }
}

impl From<String> for TriageError {
    fn from(err: String) -> Self {
        TriageError::Other(err)
    }
}

impl From<&str> for TriageError {
    fn from(err: &str) -> Self {
        TriageError::Other(err.to_string())
    }
}

/// Result type alias using TriageError
pub type Result<T> = std::result::Result<T, TriageError>;
