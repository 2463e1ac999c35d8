//! Error types for as-playground

use thiserror::Error;

use crate::backup::ImportError;
use crate::merge::MergeError;
use crate::relay::RelayError;

/// Core error type for as-playground operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("{0}")]
    Other(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
