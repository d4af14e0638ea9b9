//! Error types for proxy operations.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("nginx binary not found at {0}")]
    BinaryNotFound(PathBuf),

    #[error("proxy configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("proxy reload failed: {0}")]
    ReloadFailed(String),

    #[error("no staged vhost to enable for {0}")]
    NothingStaged(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
