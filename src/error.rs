//! Error types for docvl library.

use std::io;
use thiserror::Error;

/// Result type alias for docvl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while turning documents into text.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error when reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input is neither a PDF nor a supported raster image.
    #[error("Unknown file format: not a PDF or supported image")]
    UnknownFormat,

    /// A page could not be decoded or rasterized.
    #[error("Failed to render page {page}: {message}")]
    Render {
        /// 1-indexed page number
        page: u32,
        /// Reason reported by the document backend
        message: String,
    },

    /// The document itself could not be opened.
    #[error("Failed to open document: {0}")]
    DocumentOpen(String),

    /// The inference backend is not loaded or cannot be reached.
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The inference backend failed while generating.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The inference backend answered with something we cannot interpret.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// Page number is out of range.
    #[error("Page {0} is out of range (document has {1} pages)")]
    PageOutOfRange(u32, u32),

    /// Requested page range does not fit the document.
    #[error("Invalid page range: {0}")]
    InvalidPageRange(String),

    /// A pipeline or backend option has an invalid value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error while serializing a report.
    #[error("Report serialization error: {0}")]
    Serialize(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error belongs to a single page and should not abort a batch.
    ///
    /// Render and inference failures are recorded against the page; configuration
    /// and I/O problems stop the run before any page is processed.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            Error::Render { .. }
                | Error::BackendUnavailable(_)
                | Error::Inference(_)
                | Error::MalformedResponse(_)
        )
    }

    pub(crate) fn render(page: u32, message: impl Into<String>) -> Self {
        Error::Render {
            page,
            message: message.into(),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => Error::Io(e),
            image::ImageError::Unsupported(_) => Error::UnknownFormat,
            _ => Error::DocumentOpen(err.to_string()),
        }
    }
}

impl From<pdfium_render::prelude::PdfiumError> for Error {
    fn from(err: pdfium_render::prelude::PdfiumError) -> Self {
        Error::DocumentOpen(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::BackendUnavailable(err.to_string())
        } else if err.is_decode() {
            Error::MalformedResponse(err.to_string())
        } else {
            Error::Inference(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialize(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Serialize(err.to_string())
    }
}
