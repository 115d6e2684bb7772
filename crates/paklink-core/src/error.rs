//! Error types for paklink-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for paklink operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Source is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Link target is the source file itself: {0}")]
    SelfTarget(PathBuf),

    #[error("Failed to remove existing target {path}: {source}")]
    TargetRemoval {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to link {source_path} using {method}")]
    LinkFailed { source_path: PathBuf, method: String },

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("Failed to launch {path}: {message}")]
    Launch { path: PathBuf, message: String },

    #[error("{0}")]
    Other(String),
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watch(err.to_string())
    }
}

/// Result type alias for paklink operations
pub type Result<T> = std::result::Result<T, Error>;
