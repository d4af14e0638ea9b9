//! Error types for container engine operations.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("docker binary not found at {0}")]
    BinaryNotFound(PathBuf),

    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("container spec invalid: {0}")]
    SpecInvalid(String),

    #[error("container name already in use: {0}")]
    NameConflict(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("failed to start container {name}: {message}")]
    StartFailed { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
