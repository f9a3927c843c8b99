//! Page IR model types.
//!
//! This module defines the intermediate representation produced by the
//! pipeline: positioned [`Span`]s grouped into [`TextLine`]s and
//! [`TextBlock`]s, collected per page in a [`PageIR`]. Every box in a
//! finished `PageIR` is in document space.

mod block;
mod document;
mod page;
mod span;

pub(crate) use block::is_spaceless_script_char;
pub use block::{BlockRole, TextBlock, TextLine};
pub use document::{DocumentIR, Metadata};
pub use page::{OcrStats, PageIR, PageMetadata};
pub use span::{Origin, Span};
