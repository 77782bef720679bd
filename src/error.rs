//! Error types for forge

use std::path::PathBuf;
use thiserror::Error;

/// A single stream payload that could not be turned into an `Event`.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized event shape: {0}")]
    Schema(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    #[error("empty path")]
    EmptyPath,

    #[error("path conflict at '{path}': used both as a file and as a directory")]
    PathConflict { path: String },
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("expected a JSON object mapping paths to contents")]
    NotAnObject,

    #[error(transparent)]
    Tree(#[from] TreeError),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("export task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: {status} - {body}")]
    Status {
        context: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error returned by the command handlers.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("import failed: {0}")]
    Import(#[from] ImportError),

    #[error("export failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no code artifact was produced")]
    NoArtifact,
}

pub type Result<T> = std::result::Result<T, ForgeError>;
