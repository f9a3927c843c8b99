//! Document-level IR.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PageIR;
use crate::detect::PdfType;

/// All processed pages of a document, in page order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentIR {
    /// Document metadata (title, author, etc.)
    pub metadata: Metadata,

    /// Pages sorted by page number
    pub pages: Vec<PageIR>,
}

impl DocumentIR {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pages in any order.
    pub fn from_pages(metadata: Metadata, mut pages: Vec<PageIR>) -> Self {
        pages.sort_by_key(|p| p.number);
        Self { metadata, pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Get a page by number (1-indexed).
    pub fn get_page(&self, number: u32) -> Option<&PageIR> {
        self.pages.iter().find(|p| p.number == number)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Overall type: uniform page types carry over, anything else is MIXED.
    /// Failed pages are ignored. `None` when no page was classified.
    pub fn pdf_type(&self) -> Option<PdfType> {
        let mut types = self.pages.iter().filter_map(|p| p.metadata.pdf_type);
        let first = types.next()?;
        if types.all(|t| t == first) {
            Some(first)
        } else {
            Some(PdfType::Mixed)
        }
    }

    /// Pages that failed processing.
    pub fn failed_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| p.is_error())
            .map(|p| p.number)
            .collect()
    }

    /// Pages where OCR was needed and failed.
    pub fn degraded_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| p.metadata.degraded)
            .map(|p| p.number)
            .collect()
    }

    /// Plain text of all pages, separated by blank lines.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(PageIR::plain_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Document metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Document title
    pub title: Option<String>,

    /// Document author
    pub author: Option<String>,

    /// Document subject
    pub subject: Option<String>,

    /// Keywords
    pub keywords: Option<String>,

    /// Creator application
    pub creator: Option<String>,

    /// PDF producer
    pub producer: Option<String>,

    /// Creation date
    pub created: Option<DateTime<Utc>>,

    /// Last modification date
    pub modified: Option<DateTime<Utc>>,

    /// PDF version (e.g., "1.7")
    pub pdf_version: String,

    /// Total number of pages in the source, selected or not
    pub page_count: u32,

    /// Whether the document is encrypted
    pub encrypted: bool,
}

impl Metadata {
    /// Create new metadata with PDF version.
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            pdf_version: version.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, pdf_type: Option<PdfType>) -> PageIR {
        let mut page = PageIR::new(number, 612.0, 792.0);
        page.metadata.pdf_type = pdf_type;
        page
    }

    #[test]
    fn test_pages_sorted() {
        let doc = DocumentIR::from_pages(
            Metadata::with_version("1.7"),
            vec![page(3, None), page(1, None), page(2, None)],
        );
        let numbers: Vec<u32> = doc.pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(doc.get_page(2).is_some());
        assert!(doc.get_page(9).is_none());
    }

    #[test]
    fn test_overall_type() {
        let uniform = DocumentIR::from_pages(
            Metadata::default(),
            vec![page(1, Some(PdfType::Scanned)), page(2, Some(PdfType::Scanned))],
        );
        assert_eq!(uniform.pdf_type(), Some(PdfType::Scanned));

        let mixed = DocumentIR::from_pages(
            Metadata::default(),
            vec![page(1, Some(PdfType::Text)), page(2, Some(PdfType::Scanned)), page(3, None)],
        );
        assert_eq!(mixed.pdf_type(), Some(PdfType::Mixed));

        assert_eq!(DocumentIR::new().pdf_type(), None);
    }

    #[test]
    fn test_failed_and_degraded() {
        let mut degraded = page(2, Some(PdfType::Scanned));
        degraded.metadata.degraded = true;
        let doc = DocumentIR::from_pages(
            Metadata::default(),
            vec![PageIR::failed(1, "bad"), degraded],
        );
        assert_eq!(doc.failed_pages(), vec![1]);
        assert_eq!(doc.degraded_pages(), vec![2]);
    }
}
