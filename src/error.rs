//! Error types for the jetbook library

use std::path::PathBuf;
use thiserror::Error;

use crate::marker::FetchError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the jetbook library
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed configuration, or a page count the template does not allow
    #[error("Configuration error: {0}")]
    Config(String),

    /// Marker image could not be produced for a page
    #[error("Failed to fetch marker image for page {page}: {source}")]
    ImageFetch {
        page: u32,
        #[source]
        source: FetchError,
    },

    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural problem in a document
    #[error("Document error: {0}")]
    Document(String),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Invalid PDF (no pages)
    #[error("PDF has no pages: {}", .0.display())]
    EmptyPdf(PathBuf),

    /// Template is not a single page
    #[error("Template must have exactly one page, {} has {pages}", .path.display())]
    TemplatePageCount { path: PathBuf, pages: usize },

    /// Run stopped through its cancel token
    #[error("Run cancelled before page {page}")]
    Cancelled { page: u32 },
}

impl Error {
    /// Whether this error was raised before any document or network work
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Page index the error is attached to, if any
    pub fn page(&self) -> Option<u32> {
        match self {
            Error::ImageFetch { page, .. } | Error::Cancelled { page } => Some(*page),
            _ => None,
        }
    }
}
