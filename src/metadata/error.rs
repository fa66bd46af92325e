//! Error types for PDF metadata reading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading document metadata.
///
/// These are non-fatal at the pipeline level: a document whose metadata
/// cannot be read keeps its original filename and still goes through
/// extraction.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// File system error reading the document.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// The document path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The document could not be parsed as a PDF.
    #[error("cannot parse {path} as PDF: {reason}")]
    Parse {
        /// The document path.
        path: PathBuf,
        /// What went wrong, from the PDF library.
        reason: String,
    },
}

impl MetadataError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse error with path context.
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
