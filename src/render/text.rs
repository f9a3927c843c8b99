//! Plain text output.

use std::io::Write;

use super::PageSink;
use crate::error::Result;
use crate::model::{DocumentIR, PageIR};

/// Plain text settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOptions {
    /// Leave out header and footer blocks
    pub body_only: bool,
    /// Written between pages
    pub page_separator: String,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            body_only: false,
            page_separator: "\n\n".to_string(),
        }
    }
}

impl TextOptions {
    fn page_text(&self, page: &PageIR) -> String {
        if self.body_only {
            page.body_text()
        } else {
            page.plain_text()
        }
    }
}

/// Convert a document to plain text.
pub fn to_text(doc: &DocumentIR, options: &TextOptions) -> String {
    doc.pages
        .iter()
        .map(|p| options.page_text(p))
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join(&options.page_separator)
        .trim()
        .to_string()
}

/// Streams page text to a writer.
pub struct TextSink<W: Write> {
    writer: W,
    options: TextOptions,
    written: usize,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, TextOptions::default())
    }

    pub fn with_options(writer: W, options: TextOptions) -> Self {
        Self {
            writer,
            options,
            written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PageSink for TextSink<W> {
    fn write_page(&mut self, page: &PageIR) -> Result<()> {
        let text = self.options.page_text(page);
        if text.trim().is_empty() {
            return Ok(());
        }
        if self.written > 0 {
            self.writer.write_all(self.options.page_separator.as_bytes())?;
        }
        self.writer.write_all(text.trim().as_bytes())?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.written > 0 {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, CoordinateSpace};
    use crate::model::{BlockRole, Metadata, Origin, Span, TextBlock, TextLine};
    use crate::render::write_pages;

    fn block(text: &str, y: f64, role: BlockRole) -> TextBlock {
        let span = Span::vector(text, BBox::new(72.0, y, 300.0, y + 12.0, CoordinateSpace::Document));
        TextBlock::new(vec![TextLine::from_spans(vec![span]).unwrap()], Origin::Vector)
            .unwrap()
            .with_role(role)
    }

    fn page(number: u32) -> PageIR {
        let mut page = PageIR::new(number, 612.0, 792.0);
        page.blocks = vec![
            block("Running head", 770.0, BlockRole::Header),
            block("Hello, world!", 600.0, BlockRole::Body),
            block("Second paragraph.", 500.0, BlockRole::Body),
        ];
        page
    }

    #[test]
    fn test_to_text() {
        let doc = DocumentIR::from_pages(Metadata::default(), vec![page(1), PageIR::new(2, 1.0, 1.0)]);
        let result = to_text(&doc, &TextOptions::default());
        assert!(result.starts_with("Running head"));
        assert!(result.contains("Hello, world!\n\nSecond paragraph."));

        let body = to_text(
            &doc,
            &TextOptions {
                body_only: true,
                ..Default::default()
            },
        );
        assert!(!body.contains("Running head"));
    }

    #[test]
    fn test_text_sink_separates_pages() {
        let mut sink = TextSink::with_options(
            Vec::new(),
            TextOptions {
                body_only: true,
                page_separator: "\n\x0c\n".to_string(),
            },
        );
        write_pages(vec![page(1), PageIR::new(2, 1.0, 1.0), page(3)], &mut sink).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.matches('\x0c').count(), 1);
        assert!(out.ends_with("Second paragraph.\n"));
    }
}
