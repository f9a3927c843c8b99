//! PDF format sniffing and per-page type detection.
//!
//! Format detection checks the `%PDF-x.y` header before a document is
//! loaded. Page type detection measures how much of a page is covered by
//! vector text and by raster images and classifies the page as
//! [`PdfType::Text`], [`PdfType::Scanned`] or [`PdfType::Mixed`].

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::extract::PageContent;
use crate::geometry::{union_area, BBox};

/// PDF format information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFormat {
    /// PDF version (e.g., "1.7", "2.0")
    pub version: String,
}

impl std::fmt::Display for PdfFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PDF {}", self.version)
    }
}

/// PDF magic bytes: %PDF-
const PDF_MAGIC: &[u8] = b"%PDF-";
const PDF_MAGIC_LEN: usize = 5;
const VERSION_LEN: usize = 3; // e.g., "1.7"

/// Detect PDF format from a file path.
///
/// # Example
/// ```no_run
/// use pdfir::detect::detect_format_from_path;
///
/// let format = detect_format_from_path("document.pdf").unwrap();
/// println!("PDF version: {}", format.version);
/// ```
pub fn detect_format_from_path<P: AsRef<Path>>(path: P) -> Result<PdfFormat> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut header = [0u8; 16];
    let read = reader.read(&mut header)?;
    detect_format_from_bytes(&header[..read])
}

/// Detect PDF format from the first bytes of a file.
///
/// Fails with [`Error::UnknownFormat`] when the header is missing and
/// [`Error::UnsupportedVersion`] when the version is malformed.
pub fn detect_format_from_bytes(data: &[u8]) -> Result<PdfFormat> {
    if data.len() < PDF_MAGIC_LEN + VERSION_LEN || !data.starts_with(PDF_MAGIC) {
        return Err(Error::UnknownFormat);
    }

    let version_bytes = &data[PDF_MAGIC_LEN..PDF_MAGIC_LEN + VERSION_LEN];
    let version = String::from_utf8_lossy(version_bytes).to_string();
    if !is_valid_version(&version) {
        return Err(Error::UnsupportedVersion(version));
    }

    Ok(PdfFormat { version })
}

fn is_valid_version(version: &str) -> bool {
    let bytes = version.as_bytes();
    bytes.len() == 3 && bytes[0].is_ascii_digit() && bytes[1] == b'.' && bytes[2].is_ascii_digit()
}

/// Check if a file is a valid PDF.
pub fn is_pdf<P: AsRef<Path>>(path: P) -> bool {
    detect_format_from_path(path).is_ok()
}

/// Check if bytes start with a valid PDF header.
pub fn is_pdf_bytes(data: &[u8]) -> bool {
    detect_format_from_bytes(data).is_ok()
}

/// Kind of page, deciding whether OCR runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfType {
    /// Vector text only; no OCR.
    Text,
    /// Image only; OCR the whole page.
    Scanned,
    /// Both; OCR with trusted masking over vector text.
    Mixed,
}

impl PdfType {
    /// Whether pages of this type go through OCR.
    pub fn needs_ocr(&self) -> bool {
        !matches!(self, PdfType::Text)
    }
}

impl std::fmt::Display for PdfType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PdfType::Text => "TEXT",
            PdfType::Scanned => "SCANNED",
            PdfType::Mixed => "MIXED",
        })
    }
}

/// Result of classifying one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub pdf_type: PdfType,
    /// Fraction of the page covered by vector text boxes
    pub vector_coverage: f64,
    /// Fraction of the page covered by image placements
    pub image_coverage: f64,
    /// Quality score of the extracted text, when it was measured
    pub text_quality: Option<f64>,
}

/// Classifies pages from their extracted content.
#[derive(Debug, Clone)]
pub struct PageTypeDetector {
    config: DetectionConfig,
}

impl PageTypeDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Classify a page from its vector spans and image placements.
    pub fn detect(&self, page: &PageContent) -> Classification {
        let page_box = page.page_box();
        let text_boxes: Vec<BBox> = page.spans.iter().map(|s| *s.bbox()).collect();
        let image_boxes: Vec<BBox> = page.images.iter().map(|i| i.bbox).collect();
        let mut vector_coverage = coverage(&text_boxes, &page_box);
        let image_coverage = coverage(&image_boxes, &page_box);

        let mut text_quality = None;
        if self.config.quality_gate {
            let text = page.text();
            if text.chars().count() >= self.config.min_text_length {
                let score = text_quality_score(&text);
                text_quality = Some(score);
                if score < self.config.quality_score_threshold {
                    log::debug!(
                        "page {}: text layer quality {:.2} below threshold, ignoring vector text",
                        page.number,
                        score
                    );
                    vector_coverage = 0.0;
                }
            }
        }

        let pdf_type = self.classify(vector_coverage, image_coverage);
        log::debug!(
            "page {}: vector {:.3}, image {:.3} -> {}",
            page.number,
            vector_coverage,
            image_coverage,
            pdf_type
        );
        Classification {
            pdf_type,
            vector_coverage,
            image_coverage,
            text_quality,
        }
    }

    /// Apply the threshold policy to coverage fractions.
    pub fn classify(&self, vector_coverage: f64, image_coverage: f64) -> PdfType {
        let c = &self.config;
        if vector_coverage >= c.vector_coverage_high && image_coverage <= c.image_coverage_negligible
        {
            PdfType::Text
        } else if image_coverage >= c.image_coverage_high
            && vector_coverage <= c.vector_coverage_negligible
        {
            PdfType::Scanned
        } else if image_coverage <= 0.0 {
            // No raster content: sparse text or a blank page.
            PdfType::Text
        } else {
            PdfType::Mixed
        }
    }
}

/// Union area of `boxes` inside `page`, as a fraction of the page area.
fn coverage(boxes: &[BBox], page: &BBox) -> f64 {
    let area = page.area();
    if area <= 0.0 {
        return 0.0;
    }
    let clipped: Vec<BBox> = boxes.iter().filter_map(|b| b.clip(page)).collect();
    (union_area(&clipped) / area).clamp(0.0, 1.0)
}

fn sane_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^[("'\[$€£#]?[\p{L}\p{N}][\p{L}\p{N}\p{M}'’.,\-/&%$€£]*[)"'\].,;:!?%]*$"#)
            .expect("static regex is valid")
    })
}

/// Score in `0.0..=1.0`: share of printable characters times share of
/// plausible words. Empty text scores 0.
pub fn text_quality_score(text: &str) -> f64 {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let printable = chars
        .iter()
        .filter(|&&c| !c.is_control() && c != '\u{FFFD}' && !('\u{E000}'..='\u{F8FF}').contains(&c))
        .count();
    let printable_ratio = printable as f64 / chars.len() as f64;

    let re = sane_word_regex();
    let words: Vec<&str> = text.split_whitespace().collect();
    let sane = words
        .iter()
        .filter(|w| w.chars().count() <= 30 && re.is_match(w))
        .count();
    let word_ratio = sane as f64 / words.len() as f64;

    printable_ratio * word_ratio
}
