//! Trusted masking.
//!
//! On MIXED pages the vector layer is authoritative wherever it is
//! trustworthy. The masker turns trusted vector spans into a set of padded
//! regions; OCR spans falling mostly inside those regions are dropped so
//! the same words never appear twice. With [`MaskStrategy::Blank`] the
//! regions are also painted white before recognition.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::config::MaskingConfig;
use crate::detect::text_quality_score;
use crate::error::{Error, Result};
use crate::extract::PageContent;
use crate::geometry::{union_area, BBox, CoordinateSpace, TransformChain, DOCUMENT_DPI};
use crate::model::{Origin, Span};

/// What the masker does besides filtering OCR output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Drop OCR spans that fall inside trusted regions.
    #[default]
    Filter,
    /// Also paint trusted regions white so OCR skips them.
    Blank,
}

/// A set of boxes in one coordinate space.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSet {
    regions: Vec<BBox>,
    space: CoordinateSpace,
}

impl RegionSet {
    pub fn new(space: CoordinateSpace) -> Self {
        Self {
            regions: Vec::new(),
            space,
        }
    }

    /// Build from boxes that must all be in `space`.
    pub fn from_boxes(boxes: impl IntoIterator<Item = BBox>, space: CoordinateSpace) -> Result<Self> {
        let mut set = Self::new(space);
        for bbox in boxes {
            set.push(bbox)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, bbox: BBox) -> Result<()> {
        if bbox.space != self.space {
            return Err(Error::SpaceMismatch {
                expected: self.space,
                found: bbox.space,
            });
        }
        if !bbox.is_empty() {
            self.regions.push(bbox);
        }
        Ok(())
    }

    pub fn regions(&self) -> &[BBox] {
        &self.regions
    }

    pub fn space(&self) -> CoordinateSpace {
        self.space
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Area of the union of all regions.
    pub fn area(&self) -> f64 {
        union_area(&self.regions)
    }

    /// Fraction of `bbox` covered by the union of the regions.
    ///
    /// Boxes in another space are never covered. A zero-area box counts as
    /// covered when its center lies inside a region.
    pub fn covered_fraction(&self, bbox: &BBox) -> f64 {
        if bbox.space != self.space || self.regions.is_empty() {
            return 0.0;
        }
        let area = bbox.area();
        if area <= 0.0 {
            let (cx, cy) = bbox.center();
            return if self.regions.iter().any(|r| r.contains_point(cx, cy)) {
                1.0
            } else {
                0.0
            };
        }
        let pieces: Vec<BBox> = self
            .regions
            .iter()
            .filter_map(|r| r.intersection(bbox))
            .collect();
        (union_area(&pieces) / area).clamp(0.0, 1.0)
    }

    /// Map every region through `chain`.
    pub fn to_space(&self, chain: &TransformChain) -> Result<RegionSet> {
        let regions = self
            .regions
            .iter()
            .map(|r| chain.apply_bbox(r))
            .collect::<Result<Vec<_>>>()?;
        Ok(RegionSet {
            regions,
            space: chain.target(),
        })
    }

    /// Paint the regions white. The set must be in a pixel space.
    pub fn paint(&self, image: &mut GrayImage) -> Result<usize> {
        if !self.space.is_pixel_space() {
            return Err(Error::SpaceMismatch {
                expected: CoordinateSpace::Raster,
                found: self.space,
            });
        }
        let (w, h) = (image.width() as f64, image.height() as f64);
        let mut painted = 0;
        for r in &self.regions {
            let x0 = r.min_x.floor().max(0.0);
            let y0 = r.min_y.floor().max(0.0);
            let x1 = r.max_x.ceil().min(w);
            let y1 = r.max_y.ceil().min(h);
            if x1 <= x0 || y1 <= y0 {
                continue;
            }
            let rect = Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32);
            draw_filled_rect_mut(image, rect, Luma([255]));
            painted += 1;
        }
        Ok(painted)
    }
}

/// OCR spans split by the mask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskOutcome {
    pub kept: Vec<Span>,
    pub suppressed: Vec<Span>,
}

/// Builds trusted regions from vector text and filters OCR output.
#[derive(Debug, Clone)]
pub struct TrustedMasker {
    config: MaskingConfig,
    dpi: u32,
}

impl TrustedMasker {
    /// `dpi` is the render resolution, used to express the expansion
    /// margin in raster pixels.
    pub fn new(config: MaskingConfig, dpi: u32) -> Self {
        Self {
            config,
            dpi: dpi.max(1),
        }
    }

    pub fn strategy(&self) -> MaskStrategy {
        self.config.strategy
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Expansion margin in points.
    pub fn expansion_pt(&self) -> f64 {
        self.config.expansion_px.max(0.0) * DOCUMENT_DPI / self.dpi as f64
    }

    /// Trust score of a vector span.
    pub fn trust(&self, span: &Span) -> f64 {
        text_quality_score(span.text())
    }

    /// Trusted regions (document space) for a page.
    pub fn mask(&self, page: &PageContent, spans: &[Span]) -> RegionSet {
        let mut set = RegionSet::new(CoordinateSpace::Document);
        if !self.config.enabled {
            return set;
        }
        let page_box = page.page_box();
        let pad = self.expansion_pt();
        for span in spans {
            if span.origin() != Origin::Vector || span.bbox().space != CoordinateSpace::Document {
                continue;
            }
            if self.trust(span) < self.config.trust_threshold {
                log::trace!("untrusted vector span {:?} not masked", span.text());
                continue;
            }
            if let Some(region) = span.bbox().pad(pad).clip(&page_box) {
                set.regions.push(region);
            }
        }
        log::debug!(
            "page {}: {} trusted regions from {} vector spans",
            page.number,
            set.len(),
            spans.len()
        );
        set
    }

    /// Split OCR spans into kept and suppressed.
    ///
    /// Applying this again to the kept spans keeps all of them.
    pub fn suppress(&self, spans: Vec<Span>, regions: &RegionSet) -> MaskOutcome {
        let mut outcome = MaskOutcome::default();
        for span in spans {
            let covered = span.origin() == Origin::Ocr
                && regions.covered_fraction(span.bbox()) >= self.config.overlap_threshold;
            if covered {
                outcome.suppressed.push(span);
            } else {
                outcome.kept.push(span);
            }
        }
        outcome
    }

    /// Paint document-space `regions` white in an image reached by `chain`.
    pub fn blank(&self, image: &mut GrayImage, regions: &RegionSet, chain: &TransformChain) -> Result<usize> {
        if regions.is_empty() {
            return Ok(0);
        }
        regions.to_space(chain)?.paint(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::AffineTransform;

    const DOC: CoordinateSpace = CoordinateSpace::Document;

    fn masker() -> TrustedMasker {
        TrustedMasker::new(MaskingConfig::default(), 72)
    }

    fn page() -> PageContent {
        PageContent::new(1, 612.0, 792.0)
    }

    #[test]
    fn test_mask_pads_and_clips() {
        let spans = vec![
            Span::vector("Invoice", BBox::new(100.0, 700.0, 200.0, 712.0, DOC)),
            Span::vector("Edge", BBox::new(0.0, 780.0, 30.0, 792.0, DOC)),
        ];
        let regions = masker().mask(&page(), &spans);
        assert_eq!(regions.len(), 2);
        // 2 px at 72 dpi is 2 pt.
        assert_eq!(regions.regions()[0].to_array(), [98.0, 698.0, 202.0, 714.0]);
        assert_eq!(regions.regions()[1].to_array(), [0.0, 778.0, 32.0, 792.0]);
    }

    #[test]
    fn test_untrusted_spans_not_masked() {
        let spans = vec![Span::vector("\u{FFFD}\u{FFFD}##", BBox::new(0.0, 0.0, 50.0, 10.0, DOC))];
        assert!(masker().mask(&page(), &spans).is_empty());
    }

    #[test]
    fn test_disabled_masking() {
        let config = MaskingConfig {
            enabled: false,
            ..Default::default()
        };
        let spans = vec![Span::vector("Hello", BBox::new(0.0, 0.0, 50.0, 10.0, DOC))];
        assert!(TrustedMasker::new(config, 300).mask(&page(), &spans).is_empty());
    }

    #[test]
    fn test_covered_fraction() {
        let set = RegionSet::from_boxes(
            [
                BBox::new(0.0, 0.0, 10.0, 10.0, DOC),
                BBox::new(5.0, 0.0, 15.0, 10.0, DOC),
            ],
            DOC,
        )
        .unwrap();
        let probe = BBox::new(0.0, 0.0, 20.0, 10.0, DOC);
        assert!((set.covered_fraction(&probe) - 0.75).abs() < 1e-9);
        let raster = BBox::new(0.0, 0.0, 20.0, 10.0, CoordinateSpace::Raster);
        assert_eq!(set.covered_fraction(&raster), 0.0);
        assert!(RegionSet::from_boxes([raster], DOC).is_err());
    }

    #[test]
    fn test_suppress_threshold_and_idempotence() {
        let regions = RegionSet::from_boxes([BBox::new(0.0, 0.0, 100.0, 20.0, DOC)], DOC).unwrap();
        let spans = vec![
            Span::ocr("inside", BBox::new(10.0, 5.0, 50.0, 15.0, DOC), 0.9),
            Span::ocr("half", BBox::new(80.0, 5.0, 120.0, 15.0, DOC), 0.9),
            Span::ocr("outside", BBox::new(10.0, 50.0, 50.0, 60.0, DOC), 0.9),
        ];
        let m = masker();
        let first = m.suppress(spans, &regions);
        let kept: Vec<&str> = first.kept.iter().map(|s| s.text()).collect();
        assert_eq!(kept, vec!["outside"]);
        assert_eq!(first.suppressed.len(), 2);

        let second = m.suppress(first.kept.clone(), &regions);
        assert_eq!(second.kept, first.kept);
        assert!(second.suppressed.is_empty());
    }

    #[test]
    fn test_vector_spans_pass_through() {
        let regions = RegionSet::from_boxes([BBox::new(0.0, 0.0, 100.0, 20.0, DOC)], DOC).unwrap();
        let span = Span::vector("kept", BBox::new(10.0, 5.0, 50.0, 15.0, DOC));
        let outcome = masker().suppress(vec![span], &regions);
        assert_eq!(outcome.kept.len(), 1);
    }

    #[test]
    fn test_blank_paints_raster_regions() {
        let chain = TransformChain::from_links([
            AffineTransform::flip_y(20.0, DOC).unwrap(),
            AffineTransform::document_to_raster(72.0).unwrap(),
        ])
        .unwrap();
        let regions = RegionSet::from_boxes([BBox::new(0.0, 10.0, 10.0, 20.0, DOC)], DOC).unwrap();
        let mut image = GrayImage::from_pixel(20, 20, Luma([0]));
        let config = MaskingConfig {
            strategy: MaskStrategy::Blank,
            ..Default::default()
        };
        let painted = TrustedMasker::new(config, 72)
            .blank(&mut image, &regions, &chain)
            .unwrap();
        assert_eq!(painted, 1);
        // Top of the page is the top of the raster.
        assert_eq!(image.get_pixel(5, 5)[0], 255);
        assert_eq!(image.get_pixel(5, 15)[0], 0);
    }

    #[test]
    fn test_paint_requires_pixel_space() {
        let regions = RegionSet::from_boxes([BBox::new(0.0, 0.0, 1.0, 1.0, DOC)], DOC).unwrap();
        let mut image = GrayImage::new(2, 2);
        assert!(regions.paint(&mut image).is_err());
    }
}
