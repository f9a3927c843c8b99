//! Page-level IR.

use serde::{Deserialize, Serialize};

use super::{BlockRole, Origin, Span, TextBlock};
use crate::detect::{Classification, PdfType};
use crate::geometry::TransformChain;

/// The intermediate representation of one page.
///
/// Block boxes are in document space. Blocks are stored in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageIR {
    /// Page number (1-indexed)
    pub number: u32,

    /// Page width in points (1 point = 1/72 inch)
    pub width: f64,

    /// Page height in points
    pub height: f64,

    /// Page rotation in degrees (0, 90, 180, 270)
    pub rotation: u16,

    /// Text blocks in reading order
    pub blocks: Vec<TextBlock>,

    /// Processing metadata
    pub metadata: PageMetadata,
}

impl PageIR {
    /// An empty page.
    pub fn new(number: u32, width: f64, height: f64) -> Self {
        Self {
            number,
            width,
            height,
            rotation: 0,
            blocks: Vec::new(),
            metadata: PageMetadata::default(),
        }
    }

    /// An empty page recording why processing failed.
    pub fn failed(number: u32, error: impl Into<String>) -> Self {
        let mut page = Self::new(number, 0.0, 0.0);
        page.metadata.error = Some(error.into());
        page
    }

    /// Whether processing this page failed.
    pub fn is_error(&self) -> bool {
        self.metadata.error.is_some()
    }

    /// Plain text, blocks separated by blank lines.
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(TextBlock::text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Plain text without header and footer blocks.
    pub fn body_text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| !matches!(b.role, BlockRole::Header | BlockRole::Footer))
            .map(TextBlock::text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// All spans in reading order.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.blocks.iter().flat_map(TextBlock::spans)
    }

    /// Number of blocks with the given origin.
    pub fn count_blocks(&self, origin: Origin) -> usize {
        self.blocks.iter().filter(|b| b.origin() == origin).count()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Page dimensions as `(width, height)`.
    pub fn dimensions(&self) -> (f64, f64) {
        (self.width, self.height)
    }
}

/// How a page was processed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Page classification, absent when extraction failed
    pub pdf_type: Option<PdfType>,

    /// Coverage figures behind the classification
    pub classification: Option<Classification>,

    /// Render DPI, 0 when the page was not rasterized
    pub dpi: u32,

    /// Deskew rotation applied to the raster, in degrees
    pub deskew_angle: f64,

    /// Document-to-OCR-space chain used for this page
    pub transform: Option<TransformChain>,

    /// OCR counters
    pub ocr: OcrStats,

    /// Set when the page could not be processed
    pub error: Option<String>,

    /// Set when OCR was needed but every backend failed
    pub degraded: bool,
}

/// Per-page OCR counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OcrStats {
    /// Regions sent to OCR
    pub regions: usize,
    /// Regions where every backend failed
    pub failed_regions: usize,
    /// Spans returned by backends
    pub recognized: usize,
    /// Spans suppressed by trusted masks
    pub masked: usize,
    /// Spans dropped because vector text covered them
    pub conflicts: usize,
    /// Spans dropped below the confidence floor
    pub low_confidence: usize,
    /// Backend that produced the kept result
    pub backend: Option<String>,
    /// Whether the fallback backend was used
    pub fallback_used: bool,
}
