//! Page extraction: vector text, image placements and rasterization.
//!
//! A page source is any iterator of `Result<P>` where `P: SourcePage`. It is
//! consumed once, in order; nothing here seeks back. [`LopdfSource`] reads
//! PDF files; [`MemoryPage`] wraps content a caller already holds.

mod interpreter;
mod raster;
mod source;

use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::config::RenderConfig;
use crate::error::Result;
use crate::geometry::{BBox, CoordinateSpace, Matrix};
use crate::model::Span;

pub use interpreter::{interpret_content, ContentInterpreter, MAX_FORM_DEPTH};
pub use raster::{composite, decode_image_stream, effective_dpi, page_chain, render_page, RasterPage};
pub use source::{LopdfPage, LopdfPages, LopdfSource, MemoryPage};

/// Everything extracted from one page before OCR.
///
/// Coordinates are in document space with the page's lower-left corner at
/// the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContent {
    /// Page number (1-indexed)
    pub number: u32,
    /// Page width in points
    pub width: f64,
    /// Page height in points
    pub height: f64,
    /// Page rotation in degrees (0, 90, 180, 270)
    pub rotation: u16,
    /// Vector text spans
    pub spans: Vec<Span>,
    /// Raster images drawn on the page
    #[serde(skip)]
    pub images: Vec<ImagePlacement>,
}

impl PageContent {
    pub fn new(number: u32, width: f64, height: f64) -> Self {
        Self {
            number,
            width,
            height,
            rotation: 0,
            spans: Vec::new(),
            images: Vec::new(),
        }
    }

    /// The page rectangle in document space.
    pub fn page_box(&self) -> BBox {
        BBox::new(0.0, 0.0, self.width, self.height, CoordinateSpace::Document)
    }

    /// Vector text joined with spaces, in content stream order.
    pub fn text(&self) -> String {
        self.spans
            .iter()
            .map(|s| s.text())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_text(&self) -> bool {
        !self.spans.is_empty()
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// An image drawn on the page.
#[derive(Debug, Clone)]
pub struct ImagePlacement {
    /// Document-space envelope of the placed image
    pub bbox: BBox,
    /// Maps the image unit square into document space
    pub matrix: Matrix,
    /// Where the samples come from
    pub data: ImageData,
}

impl ImagePlacement {
    /// Placement that stretches an image over `bbox`.
    pub fn filling(bbox: BBox, data: ImageData) -> Self {
        Self {
            matrix: Matrix::from_pdf(bbox.width(), 0.0, 0.0, bbox.height(), bbox.min_x, bbox.min_y),
            bbox,
            data,
        }
    }
}

/// Image sample source.
#[derive(Debug, Clone)]
pub enum ImageData {
    /// An image XObject in the source document
    XObject(lopdf::ObjectId),
    /// An inline image (`BI ... ID ... EI`)
    Inline(Arc<lopdf::Stream>),
    /// Already decoded samples
    Decoded(Arc<GrayImage>),
    /// Samples are not available
    Missing,
}

/// One page of a document that can be extracted and rendered.
pub trait SourcePage: Send {
    /// Page number (1-indexed).
    fn number(&self) -> u32;

    /// Extract vector spans and image placements.
    fn extract(&self) -> Result<PageContent>;

    /// Decode the samples of an image placement, `None` if unsupported.
    fn load_image(&self, placement: &ImagePlacement) -> Result<Option<GrayImage>> {
        Ok(match &placement.data {
            ImageData::Decoded(image) => Some(image.as_ref().clone()),
            ImageData::Inline(stream) => decode_image_stream(stream, None)?,
            ImageData::XObject(_) | ImageData::Missing => None,
        })
    }

    /// Rasterize the page's images onto a white canvas.
    fn render(&self, content: &PageContent, config: &RenderConfig) -> Result<RasterPage> {
        render_page(content, config, |placement| self.load_image(placement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_content_text() {
        let mut content = PageContent::new(1, 612.0, 792.0);
        assert!(!content.has_text());
        content.spans.push(Span::vector(
            "Hello",
            BBox::new(0.0, 0.0, 10.0, 10.0, CoordinateSpace::Document),
        ));
        content.spans.push(Span::vector(
            "world",
            BBox::new(12.0, 0.0, 22.0, 10.0, CoordinateSpace::Document),
        ));
        assert_eq!(content.text(), "Hello world");
        assert_eq!(content.page_box().to_array(), [0.0, 0.0, 612.0, 792.0]);
    }

    #[test]
    fn test_filling_placement() {
        let bbox = BBox::new(72.0, 72.0, 540.0, 650.0, CoordinateSpace::Document);
        let p = ImagePlacement::filling(bbox, ImageData::Missing);
        assert_eq!(p.matrix.apply(0.0, 0.0), (72.0, 72.0));
        assert_eq!(p.matrix.apply(1.0, 1.0), (540.0, 650.0));
    }
}
