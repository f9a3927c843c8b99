//! OCR backend abstraction.
//!
//! Backends implement one capability, [`OcrBackend::recognize`], taking an
//! image (optionally restricted to a region) plus language hints and
//! returning spans in the image's own pixel space. Which backend runs is a
//! configuration choice ([`BackendKind`]); fallback, deadlines and
//! concurrency limits live on the caller side in [`OcrRunner`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pdfir::ocr::{BackendKind, OcrBackend, OcrRegistry, OcrRequest, OcrSpan};
//! use pdfir::geometry::{BBox, CoordinateSpace};
//!
//! struct Fixed;
//!
//! impl OcrBackend for Fixed {
//!     fn name(&self) -> &str {
//!         "fixed"
//!     }
//!
//!     fn recognize(&self, request: &OcrRequest) -> pdfir::Result<Vec<OcrSpan>> {
//!         let bbox = BBox::new(0.0, 0.0, 10.0, 10.0, request.space);
//!         Ok(vec![OcrSpan::new("hi", bbox, 0.9)])
//!     }
//! }
//!
//! let mut registry = OcrRegistry::new();
//! registry.register(BackendKind::VisionApi, Arc::new(Fixed));
//! assert!(registry.contains(BackendKind::VisionApi));
//! ```

mod limiter;
mod registry;
mod runner;
mod tesseract;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{BBox, CoordinateSpace};
use crate::model::Span;

pub use limiter::{BackendLimiters, OcrLimiter, OcrPermit};
pub use registry::OcrRegistry;
pub use runner::{OcrRunner, RegionOutcome};
pub use tesseract::{parse_tsv, TesseractBackend};

/// Configured OCR engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Local Tesseract executable
    Tesseract,
    /// Cloud document-analysis service
    DocumentAi,
    /// Cloud vision service
    VisionApi,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Tesseract,
        BackendKind::DocumentAi,
        BackendKind::VisionApi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Tesseract => "tesseract",
            BackendKind::DocumentAi => "document_ai",
            BackendKind::VisionApi => "vision_api",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tesseract" => Ok(BackendKind::Tesseract),
            "document_ai" | "documentai" => Ok(BackendKind::DocumentAi),
            "vision_api" | "vision" => Ok(BackendKind::VisionApi),
            other => Err(Error::Config(format!("unknown OCR backend: {}", other))),
        }
    }
}

/// Language hints passed with every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageHints {
    pub languages: Vec<String>,
}

impl LanguageHints {
    pub fn new<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            languages: languages
                .into_iter()
                .map(Into::into)
                .filter(|l: &String| !l.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// Tesseract `-l` form: `eng+deu`.
    pub fn joined(&self) -> String {
        self.languages.join("+")
    }
}

/// One recognition call.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    /// Page image, shared between retries
    pub image: Arc<GrayImage>,
    /// Pixel space of `image`
    pub space: CoordinateSpace,
    /// Restrict recognition to this region (same space)
    pub region: Option<BBox>,
    pub hints: LanguageHints,
}

impl OcrRequest {
    pub fn new(image: Arc<GrayImage>, space: CoordinateSpace) -> Self {
        Self {
            image,
            space,
            region: None,
            hints: LanguageHints::default(),
        }
    }

    /// Restrict to a region, which must be in the request's space.
    pub fn with_region(mut self, region: BBox) -> Result<Self> {
        if region.space != self.space {
            return Err(Error::SpaceMismatch {
                expected: self.space,
                found: region.space,
            });
        }
        self.region = Some(region);
        Ok(self)
    }

    pub fn with_hints(mut self, hints: LanguageHints) -> Self {
        self.hints = hints;
        self
    }

    /// Integer pixel window `(x, y, width, height)` to recognize, clipped
    /// to the image. `None` when the region misses the image.
    pub fn pixel_window(&self) -> Option<(u32, u32, u32, u32)> {
        let (w, h) = self.image.dimensions();
        let Some(region) = self.region else {
            return (w > 0 && h > 0).then_some((0, 0, w, h));
        };
        let x0 = region.min_x.floor().clamp(0.0, w as f64) as u32;
        let y0 = region.min_y.floor().clamp(0.0, h as f64) as u32;
        let x1 = region.max_x.ceil().clamp(0.0, w as f64) as u32;
        let y1 = region.max_y.ceil().clamp(0.0, h as f64) as u32;
        (x1 > x0 && y1 > y0).then_some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// A recognized piece of text in request space.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrSpan {
    pub text: String,
    pub bbox: BBox,
    /// `0.0..=1.0`
    pub confidence: f64,
}

impl OcrSpan {
    pub fn new(text: impl Into<String>, bbox: BBox, confidence: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence,
        }
    }

    /// IR span with OCR origin, still in request space.
    pub fn into_span(self) -> Span {
        Span::ocr(self.text, self.bbox, self.confidence)
    }
}

/// An OCR engine.
pub trait OcrBackend: Send + Sync {
    /// Short engine name used in logs and page metadata.
    fn name(&self) -> &str;

    /// Recognize text. Boxes are in `request.space`.
    fn recognize(&self, request: &OcrRequest) -> Result<Vec<OcrSpan>>;
}

/// Mean span confidence, `None` for no spans.
pub fn mean_confidence(spans: &[OcrSpan]) -> Option<f64> {
    if spans.is_empty() {
        return None;
    }
    Some(spans.iter().map(|s| s.confidence).sum::<f64>() / spans.len() as f64)
}
