//! Error types for the proxyforge pipeline.
//!
//! Each stage has its own error enum; [`ProxyError`] wraps them so a caller
//! running the whole pipeline handles a single type.

use thiserror::Error;

use crate::classify::ClassifyError;
use crate::loader::LoadError;

/// Main error type for proxyforge operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The file is not an analyzable DLL
    #[error(transparent)]
    Load(#[from] LoadError),

    /// An export could not be classified safely
    #[error("Export classification failed: {0}")]
    Classify(#[from] ClassifyError),

    /// Writing generated files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be used
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for proxyforge operations
pub type Result<T> = std::result::Result<T, ProxyError>;
