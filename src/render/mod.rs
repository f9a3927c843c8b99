//! Page IR consumption.
//!
//! Output writers receive pages one at a time through [`PageSink`], in the
//! order the pipeline emits them. JSON and plain-text sinks are provided.

mod json;
mod text;

use crate::error::Result;
use crate::model::PageIR;

pub use json::{to_json, JsonFormat, JsonLinesSink};
pub use text::{to_text, TextOptions, TextSink};

/// Receives finished pages.
pub trait PageSink {
    /// Consume one page. Sinks only read the page.
    fn write_page(&mut self, page: &PageIR) -> Result<()>;

    /// Called once after the last page.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects pages in memory.
impl PageSink for Vec<PageIR> {
    fn write_page(&mut self, page: &PageIR) -> Result<()> {
        self.push(page.clone());
        Ok(())
    }
}

/// Feed every page to `sink`, then finish it. Returns the page count.
pub fn write_pages<I, S>(pages: I, sink: &mut S) -> Result<usize>
where
    I: IntoIterator<Item = PageIR>,
    S: PageSink + ?Sized,
{
    let mut count = 0;
    for page in pages {
        sink.write_page(&page)?;
        count += 1;
    }
    sink.finish()?;
    Ok(count)
}
