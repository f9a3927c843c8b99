//! Error types for the pdfir library.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::geometry::CoordinateSpace;

/// Result type alias for pdfir operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while turning PDF pages into page IR.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error when reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Two coordinate spaces were combined without a transform between them.
    #[error("Coordinate space mismatch: expected {expected}, found {found}")]
    SpaceMismatch {
        /// Space the operation required
        expected: CoordinateSpace,
        /// Space that was supplied
        found: CoordinateSpace,
    },

    /// A transform cannot be built or inverted (zero scale, NaN, ...).
    #[error("Degenerate transform: {0}")]
    DegenerateTransform(String),

    /// Page content could not be extracted. Recovered at page granularity.
    #[error("Page {page} extraction failed: {reason}")]
    PageExtraction {
        /// 1-indexed page number
        page: u32,
        /// What went wrong
        reason: String,
    },

    /// An OCR backend call failed.
    #[error("OCR backend '{backend}' failed: {message}")]
    OcrBackend {
        /// Backend name
        backend: String,
        /// Failure description
        message: String,
    },

    /// An OCR backend call exceeded its deadline.
    #[error("OCR backend '{backend}' timed out after {timeout:?}")]
    OcrTimeout {
        /// Backend name
        backend: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// The file format is not recognized as PDF.
    #[error("Unknown file format: not a valid PDF")]
    UnknownFormat,

    /// The PDF version is not supported.
    #[error("Unsupported PDF version: {0}")]
    UnsupportedVersion(String),

    /// Error parsing PDF structure.
    #[error("PDF parsing error: {0}")]
    PdfParse(String),

    /// The PDF document is encrypted.
    #[error("Document is encrypted")]
    Encrypted,

    /// Page number is out of range.
    #[error("Page {0} is out of range (document has {1} pages)")]
    PageOutOfRange(u32, u32),

    /// Raster decoding or encoding failed.
    #[error("Image error: {0}")]
    Image(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error while writing IR to an output format.
    #[error("Rendering error: {0}")]
    Render(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a page extraction error.
    pub fn page(page: u32, reason: impl Into<String>) -> Self {
        Error::PageExtraction {
            page,
            reason: reason.into(),
        }
    }

    /// Build an OCR backend error.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::OcrBackend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether this error only affects a single page, so document
    /// processing may continue with an empty or partial page.
    pub fn is_page_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PageExtraction { .. }
                | Error::PdfParse(_)
                | Error::Image(_)
                | Error::OcrBackend { .. }
                | Error::OcrTimeout { .. }
                | Error::SpaceMismatch { .. }
                | Error::DegenerateTransform(_)
        )
    }

    /// Whether this error came from an OCR backend call (eligible for fallback).
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Error::OcrBackend { .. } | Error::OcrTimeout { .. })
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        match err {
            lopdf::Error::IO(e) => Error::Io(e),
            lopdf::Error::Decryption(_) => Error::Encrypted,
            _ => Error::PdfParse(err.to_string()),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Render(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SpaceMismatch {
            expected: CoordinateSpace::Raster,
            found: CoordinateSpace::Document,
        };
        assert_eq!(
            err.to_string(),
            "Coordinate space mismatch: expected RASTER, found DOCUMENT"
        );

        let err = Error::PageOutOfRange(10, 5);
        assert_eq!(
            err.to_string(),
            "Page 10 is out of range (document has 5 pages)"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::page(3, "bad font").is_page_recoverable());
        assert!(Error::backend("tesseract", "crashed").is_backend_failure());
        assert!(!Error::Config("dpi".into()).is_page_recoverable());
        assert!(!Error::UnknownFormat.is_backend_failure());
    }
}
