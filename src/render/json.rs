//! JSON output.

use std::io::Write;

use serde::Serialize;

use super::PageSink;
use crate::error::{Error, Result};
use crate::model::PageIR;

/// JSON output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonFormat {
    /// Pretty-printed JSON with indentation
    #[default]
    Pretty,
    /// Compact JSON without extra whitespace
    Compact,
}

/// Serialize a page or document to JSON.
pub fn to_json<T: Serialize + ?Sized>(value: &T, format: JsonFormat) -> Result<String> {
    let result = match format {
        JsonFormat::Pretty => serde_json::to_string_pretty(value),
        JsonFormat::Compact => serde_json::to_string(value),
    };

    result.map_err(|e| Error::Render(format!("JSON serialization error: {}", e)))
}

/// Writes one compact JSON object per page, one page per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    pages: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, pages: 0 }
    }

    /// Pages written so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PageSink for JsonLinesSink<W> {
    fn write_page(&mut self, page: &PageIR) -> Result<()> {
        serde_json::to_writer(&mut self.writer, page)?;
        self.writer.write_all(b"\n")?;
        self.pages += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
