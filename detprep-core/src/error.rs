//! Error types for the detprep-core crate.

use thiserror::Error;

/// Top-level error type for model preparation.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Export stage failed: {0}")]
    Export(String),

    #[error("Browser conversion stage failed: {0}")]
    Convert(String),

    #[error("Invalid choice: {0}")]
    InvalidChoice(String),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Unsupported model type: {0}")]
    UnsupportedKind(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PrepError {
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    pub fn convert(msg: impl Into<String>) -> Self {
        Self::Convert(msg.into())
    }

    pub fn invalid_artifact(msg: impl Into<String>) -> Self {
        Self::InvalidArtifact(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<figment::Error> for PrepError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenience alias for results across the crate.
pub type Result<T> = std::result::Result<T, PrepError>;
