//! Error types for the persistence store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing project JSON documents.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File system error while reading, writing or renaming a document.
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document exists but is not valid JSON for the expected model.
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A section update was requested before detection wrote the registry.
    #[error("registry not found at {path}; run detection first")]
    MissingRegistry { path: PathBuf },

    /// Project ids are non-empty strings of ASCII digits.
    #[error("invalid project id '{0}': expected digits only")]
    InvalidProjectId(String),

    /// Section codes are upper-case ASCII letters, digits and underscores.
    #[error("invalid section code '{0}'")]
    InvalidSectionCode(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
