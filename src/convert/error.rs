//! Error types for format conversion.

use std::path::PathBuf;

use thiserror::Error;

use crate::render::RenderError;

/// Errors raised while converting one file to the standard PDF.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// File system error reading the input or writing the output.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The PDF could not be parsed or rewritten.
    #[error("PDF error in {path}: {source}")]
    Pdf {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    /// The rewritten document could not be written.
    #[error("cannot write {path}: {message}")]
    Save { path: PathBuf, message: String },

    /// The PDF has a page without a usable media box.
    #[error("PDF page {page} of {path} has no usable media box")]
    MediaBox { path: PathBuf, page: u32 },

    /// The image could not be decoded or re-encoded.
    #[error("image error in {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The office renderer failed.
    #[error("office conversion of {path} failed: {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: RenderError,
    },

    /// The label is not one the converter handles.
    #[error("format {label} is not convertible")]
    NotConvertible { label: String },
}

impl ConvertError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn pdf(path: impl Into<PathBuf>, source: lopdf::Error) -> Self {
        Self::Pdf {
            path: path.into(),
            source,
        }
    }

    pub fn save(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Save {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }

    pub fn render(path: impl Into<PathBuf>, source: RenderError) -> Self {
        Self::Render {
            path: path.into(),
            source,
        }
    }
}
