//! Page IR assembly.
//!
//! Merges vector spans with back-mapped OCR spans, groups them into lines
//! and blocks, orders the blocks for reading and assigns block roles.
//!
//! Merge precedence, applied in this order:
//!
//! 1. OCR spans are mapped back to document space through the inverse of
//!    the page transform chain.
//! 2. On MIXED pages, OCR spans covered by trusted regions are suppressed.
//! 3. Remaining OCR spans mostly covered by vector text are dropped; vector
//!    text always wins a conflict.

mod layout;
mod order;

use serde::{Deserialize, Serialize};

use crate::config::{Config, LayoutConfig, MaskingConfig};
use crate::detect::Classification;
use crate::error::{Error, Result};
use crate::extract::PageContent;
use crate::geometry::{CoordinateSpace, TransformChain};
use crate::mask::{RegionSet, TrustedMasker};
use crate::model::{BlockRole, OcrStats, Origin, PageIR, PageMetadata, Span, TextBlock};

pub use layout::{group_blocks, group_lines, FontStatistics};
pub use order::{row_order, xy_cut};

/// Block ordering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingOrder {
    /// Recursive XY-cut
    #[default]
    XyCut,
    /// Top to bottom, left to right
    Simple,
    /// Grouping order: vector blocks, then OCR blocks
    None,
}

/// Everything known about a page once OCR has run.
#[derive(Debug, Clone)]
pub struct AssemblyInput {
    pub number: u32,
    pub width: f64,
    pub height: f64,
    pub rotation: u16,
    pub classification: Option<Classification>,
    /// Vector spans, document space
    pub vector_spans: Vec<Span>,
    /// OCR spans in the target space of `transform`
    pub ocr_spans: Vec<Span>,
    /// Document-to-OCR-space chain
    pub transform: Option<TransformChain>,
    /// Trusted regions in document space (MIXED pages)
    pub mask: Option<RegionSet>,
    pub dpi: u32,
    pub deskew_angle: f64,
    pub ocr_stats: OcrStats,
    pub degraded: bool,
}

impl AssemblyInput {
    /// Input carrying the page's vector text and nothing else.
    pub fn new(content: PageContent) -> Self {
        Self {
            number: content.number,
            width: content.width,
            height: content.height,
            rotation: content.rotation,
            classification: None,
            vector_spans: content.spans,
            ocr_spans: Vec::new(),
            transform: None,
            mask: None,
            dpi: 0,
            deskew_angle: 0.0,
            ocr_stats: OcrStats::default(),
            degraded: false,
        }
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// OCR spans together with the chain that maps document space to
    /// their space.
    pub fn with_ocr(mut self, spans: Vec<Span>, transform: TransformChain) -> Self {
        self.ocr_spans = spans;
        self.transform = Some(transform);
        self
    }

    pub fn with_mask(mut self, regions: RegionSet) -> Self {
        self.mask = Some(regions);
        self
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn with_deskew_angle(mut self, angle: f64) -> Self {
        self.deskew_angle = angle;
        self
    }

    pub fn with_ocr_stats(mut self, stats: OcrStats) -> Self {
        self.ocr_stats = stats;
        self
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

/// Builds a [`PageIR`] from an [`AssemblyInput`].
#[derive(Debug, Clone)]
pub struct PageAssembler {
    layout: LayoutConfig,
    masking: MaskingConfig,
}

impl PageAssembler {
    pub fn new(config: &Config) -> Self {
        Self {
            layout: config.layout.clone(),
            masking: config.masking.clone(),
        }
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Assemble one page.
    ///
    /// Fails with [`Error::SpaceMismatch`] when a vector span is not in
    /// document space, or an OCR span is not in the target space of the
    /// supplied chain.
    pub fn assemble(&self, input: AssemblyInput) -> Result<PageIR> {
        let mut stats = input.ocr_stats;

        for span in &input.vector_spans {
            ensure_space(CoordinateSpace::Document, span)?;
        }
        let vector: Vec<Span> = input
            .vector_spans
            .into_iter()
            .filter(|s| !s.text().trim().is_empty())
            .collect();

        let mut ocr = back_map(input.ocr_spans, input.transform.as_ref())?;

        if let Some(regions) = input.mask.as_ref().filter(|r| !r.is_empty()) {
            let masker = TrustedMasker::new(self.masking.clone(), input.dpi);
            let outcome = masker.suppress(ocr, regions);
            stats.masked += outcome.suppressed.len();
            ocr = outcome.kept;
        }

        let before = ocr.len();
        ocr = self.resolve_conflicts(&vector, ocr)?;
        stats.conflicts += before - ocr.len();

        let fonts = FontStatistics::from_spans(&vector);

        let mut blocks = group_blocks(group_lines(vector, &self.layout), Origin::Vector, &self.layout);
        blocks.extend(group_blocks(group_lines(ocr, &self.layout), Origin::Ocr, &self.layout));
        blocks.retain(|b| !b.is_empty());

        let blocks = self.order(blocks);
        let blocks = blocks
            .into_iter()
            .map(|b| {
                let role = self.role(&b, input.height, &fonts);
                b.with_role(role)
            })
            .collect::<Vec<_>>();

        log::debug!(
            "page {}: {} blocks ({} vector, {} ocr), {} masked, {} conflicts",
            input.number,
            blocks.len(),
            blocks.iter().filter(|b| b.origin() == Origin::Vector).count(),
            blocks.iter().filter(|b| b.origin() == Origin::Ocr).count(),
            stats.masked,
            stats.conflicts
        );

        let mut page = PageIR::new(input.number, input.width, input.height);
        page.rotation = input.rotation;
        page.blocks = blocks;
        page.metadata = PageMetadata {
            pdf_type: input.classification.map(|c| c.pdf_type),
            classification: input.classification,
            dpi: input.dpi,
            deskew_angle: input.deskew_angle,
            transform: input.transform,
            ocr: stats,
            error: None,
            degraded: input.degraded,
        };
        Ok(page)
    }

    /// Drop OCR spans whose area is mostly covered by vector text.
    fn resolve_conflicts(&self, vector: &[Span], ocr: Vec<Span>) -> Result<Vec<Span>> {
        if vector.is_empty() || ocr.is_empty() {
            return Ok(ocr);
        }
        let covered = RegionSet::from_boxes(vector.iter().map(|s| *s.bbox()), CoordinateSpace::Document)?;
        Ok(ocr
            .into_iter()
            .filter(|span| {
                let fraction = covered.covered_fraction(span.bbox());
                if fraction >= self.layout.conflict_overlap {
                    log::trace!("OCR span {:?} loses to vector text ({:.2})", span.text(), fraction);
                    false
                } else {
                    true
                }
            })
            .collect())
    }

    fn order(&self, blocks: Vec<TextBlock>) -> Vec<TextBlock> {
        let boxes: Vec<_> = blocks.iter().map(|b| b.bbox).collect();
        let indices = match self.layout.reading_order {
            ReadingOrder::XyCut => xy_cut(&boxes, self.layout.min_row_gap, self.layout.min_col_gap),
            ReadingOrder::Simple => row_order(&boxes),
            ReadingOrder::None => return blocks,
        };
        let mut slots: Vec<Option<TextBlock>> = blocks.into_iter().map(Some).collect();
        indices.into_iter().filter_map(|i| slots[i].take()).collect()
    }

    fn role(&self, block: &TextBlock, page_height: f64, fonts: &FontStatistics) -> BlockRole {
        let ratio = self.layout.region_ratio;
        if page_height > 0.0 && ratio > 0.0 {
            if block.bbox.min_y >= page_height * (1.0 - ratio) {
                return BlockRole::Header;
            }
            if block.bbox.max_y <= page_height * ratio {
                return BlockRole::Footer;
            }
        }
        // OCR boxes carry no font size, only glyph box heights.
        if block.origin() == Origin::Vector
            && block.lines.len() <= 3
            && fonts.is_heading_size(block.font_size(), self.layout.heading_ratio)
        {
            return BlockRole::Heading;
        }
        BlockRole::Body
    }
}

fn ensure_space(expected: CoordinateSpace, span: &Span) -> Result<()> {
    if span.bbox().space == expected {
        Ok(())
    } else {
        Err(Error::SpaceMismatch {
            expected,
            found: span.bbox().space,
        })
    }
}

/// Map OCR spans into document space through the inverted chain.
///
/// Without a chain the spans must already be in document space.
fn back_map(spans: Vec<Span>, transform: Option<&TransformChain>) -> Result<Vec<Span>> {
    if spans.is_empty() {
        return Ok(spans);
    }
    let Some(chain) = transform else {
        for span in &spans {
            ensure_space(CoordinateSpace::Document, span)?;
        }
        return Ok(spans);
    };
    if chain.source() != CoordinateSpace::Document {
        return Err(Error::SpaceMismatch {
            expected: CoordinateSpace::Document,
            found: chain.source(),
        });
    }
    let inverse = chain.invert()?;
    spans
        .into_iter()
        .map(|span| {
            ensure_space(chain.target(), &span)?;
            span.map(&inverse)
        })
        .collect()
}
