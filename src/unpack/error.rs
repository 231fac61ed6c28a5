//! Error types for archive expansion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while expanding one archive.
///
/// Each one is captured per file and persisted as a
/// [`FalloDescompresion`](crate::model::FalloDescompresion) entry; none stops
/// the section.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// File system error while reading the archive or writing members.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One member could not be read or written.
    #[error("cannot extract member {path}: {source}")]
    Member {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The zip reader rejected the archive.
    #[error("invalid zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// The 7z reader rejected the archive.
    #[error("invalid 7z archive {path}: {message}")]
    SevenZ { path: PathBuf, message: String },

    /// The rar library and every external extractor failed.
    #[error("cannot extract rar archive {path}: {message}")]
    Rar { path: PathBuf, message: String },

    /// Nesting exceeded the configured depth.
    #[error("archive nesting deeper than {limit} levels at {path}")]
    RecursionLimit { path: PathBuf, limit: usize },

    /// Not an archive format this expander handles.
    #[error("unsupported archive format: {path}")]
    Unsupported { path: PathBuf },
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn member(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Member {
            path: path.into(),
            source,
        }
    }

    pub fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }

    pub fn sevenz(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SevenZ {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn rar(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Rar {
            path: path.into(),
            message: message.into(),
        }
    }
}
