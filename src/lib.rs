//! # pdfir
//!
//! Turns PDF pages into a positioned, provenance-tagged intermediate
//! representation, reading vector text directly and raster content
//! through OCR.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pdfir::{process_file, render};
//!
//! fn main() -> pdfir::Result<()> {
//!     let doc = process_file("scan.pdf")?;
//!
//!     for page in &doc.pages {
//!         println!("page {}: {:?}", page.number, page.metadata.pdf_type);
//!     }
//!     println!("{}", render::to_text(&doc, &render::TextOptions::default()));
//!     Ok(())
//! }
//! ```
//!
//! ## How a page is processed
//!
//! 1. Vector spans and image placements are extracted in document space.
//! 2. The page is classified TEXT, SCANNED or MIXED from coverage.
//! 3. SCANNED and MIXED pages are rendered, deskewed and sent to OCR; on
//!    MIXED pages trusted vector text masks the OCR result.
//! 4. OCR boxes are mapped back to document space through the inverse of
//!    the page's transform chain, merged with the vector spans, grouped
//!    into blocks and ordered by XY-cut.
//!
//! Pages are independent and are processed in parallel; see
//! [`Pipeline::process`] for the streaming interface.

pub mod assemble;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod mask;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod preprocess;
pub mod render;

// Re-export commonly used types
pub use assemble::{AssemblyInput, PageAssembler, ReadingOrder};
pub use config::{Config, PageSelection, Preset};
pub use detect::{detect_format_from_bytes, detect_format_from_path, is_pdf, Classification, PdfFormat, PdfType};
pub use error::{Error, Result};
pub use extract::{LopdfSource, MemoryPage, PageContent, SourcePage};
pub use geometry::{AffineTransform, BBox, CoordinateSpace, Matrix, TransformChain};
pub use mask::{MaskStrategy, RegionSet, TrustedMasker};
pub use model::{BlockRole, DocumentIR, Metadata, OcrStats, Origin, PageIR, Span, TextBlock, TextLine};
pub use ocr::{BackendKind, LanguageHints, OcrBackend, OcrRegistry, OcrRequest, OcrSpan};
pub use pipeline::{PageStream, Pipeline};
pub use render::{JsonFormat, PageSink};

use std::io::Read;
use std::path::Path;

/// Process a PDF file with the default configuration.
///
/// # Example
///
/// ```no_run
/// use pdfir::process_file;
///
/// let doc = process_file("document.pdf").unwrap();
/// println!("Pages: {}", doc.page_count());
/// ```
pub fn process_file<P: AsRef<Path>>(path: P) -> Result<DocumentIR> {
    process_file_with_config(path, Config::default())
}

/// Process a PDF file.
///
/// # Example
///
/// ```no_run
/// use pdfir::{process_file_with_config, Config, Preset};
///
/// let config = Config::from_preset(Preset::Fast).with_dpi(200);
/// let doc = process_file_with_config("document.pdf", config).unwrap();
/// ```
pub fn process_file_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<DocumentIR> {
    let source = LopdfSource::open(path)?;
    process_source(source, config)
}

/// Process a PDF held in memory with the default configuration.
pub fn process_bytes(data: &[u8]) -> Result<DocumentIR> {
    process_bytes_with_config(data, Config::default())
}

/// Process a PDF held in memory.
pub fn process_bytes_with_config(data: &[u8], config: Config) -> Result<DocumentIR> {
    let source = LopdfSource::from_bytes(data)?;
    process_source(source, config)
}

/// Process a PDF read from `reader`.
pub fn process_reader<R: Read>(reader: R, config: Config) -> Result<DocumentIR> {
    let source = LopdfSource::from_reader(reader)?;
    process_source(source, config)
}

/// Text of a PDF file in reading order.
///
/// # Example
///
/// ```no_run
/// let text = pdfir::extract_text("document.pdf").unwrap();
/// println!("{}", text);
/// ```
pub fn extract_text<P: AsRef<Path>>(path: P) -> Result<String> {
    let doc = process_file(path)?;
    Ok(doc.full_text())
}

fn process_source(source: LopdfSource, config: Config) -> Result<DocumentIR> {
    let pipeline = Pipeline::new(config)?;
    let source = source.with_pages(pipeline.config().pages.clone());
    let metadata = source.metadata();
    pipeline.process_document(source, metadata)
}
