//! Lines and blocks of spans.

use serde::{Deserialize, Serialize};

use super::{Origin, Span};
use crate::geometry::{BBox, CoordinateSpace};

/// Role of a block on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockRole {
    #[default]
    Body,
    Heading,
    Header,
    Footer,
}

/// Spans sharing a baseline band, ordered left to right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub spans: Vec<Span>,
    pub bbox: BBox,
}

impl TextLine {
    /// Build a line; spans are sorted by their left edge.
    ///
    /// Returns `None` for an empty span list.
    pub fn from_spans(mut spans: Vec<Span>) -> Option<Self> {
        spans.sort_by(|a, b| a.bbox().min_x.total_cmp(&b.bbox().min_x));
        let bbox = enclosing(spans.iter().map(Span::bbox))?;
        Some(Self { spans, bbox })
    }

    /// Text of all spans, with a space where the gap between two spans is
    /// wider than a fifth of a character.
    pub fn text(&self) -> String {
        let mut result = String::new();
        for (i, span) in self.spans.iter().enumerate() {
            if i > 0 {
                let prev = &self.spans[i - 1];
                let gap = span.bbox().min_x - prev.bbox().max_x;
                let chars = span.text().chars().count().max(1) as f64;
                let char_width = if span.bbox().width() > 0.0 {
                    span.bbox().width() / chars
                } else {
                    span.effective_size() * 0.5
                };
                let spaceless = prev
                    .text()
                    .chars()
                    .last()
                    .map(is_spaceless_script_char)
                    .unwrap_or(false)
                    && span
                        .text()
                        .chars()
                        .next()
                        .map(is_spaceless_script_char)
                        .unwrap_or(false);
                let has_space = prev.text().ends_with([' ', '\u{00A0}'])
                    || span.text().starts_with([' ', '\u{00A0}']);
                if gap > char_width * 0.2 && !spaceless && !has_space {
                    result.push(' ');
                }
            }
            result.push_str(span.text());
        }
        result
    }

    /// Character-weighted mean font size.
    pub fn font_size(&self) -> f64 {
        let total: usize = self.spans.iter().map(|s| s.text().chars().count()).sum();
        if total == 0 {
            return self.bbox.height();
        }
        self.spans
            .iter()
            .map(|s| s.effective_size() * s.text().chars().count() as f64)
            .sum::<f64>()
            / total as f64
    }

    /// Whether most characters are in a bold face.
    pub fn is_bold(&self) -> bool {
        let total: usize = self.spans.iter().map(|s| s.text().len()).sum();
        let bold: usize = self
            .spans
            .iter()
            .filter(|s| s.is_bold())
            .map(|s| s.text().len())
            .sum();
        total > 0 && bold * 2 > total
    }
}

/// A group of vertically adjacent lines sharing one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub lines: Vec<TextLine>,
    pub bbox: BBox,
    pub role: BlockRole,
    origin: Origin,
}

impl TextBlock {
    /// Build a block from lines. All spans must share `origin`; returns
    /// `None` when `lines` is empty.
    pub fn new(lines: Vec<TextLine>, origin: Origin) -> Option<Self> {
        let bbox = enclosing(lines.iter().map(|l| &l.bbox))?;
        Some(Self {
            lines,
            bbox,
            role: BlockRole::Body,
            origin,
        })
    }

    /// Set the block role.
    pub fn with_role(mut self, role: BlockRole) -> Self {
        self.role = role;
        self
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(TextLine::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.lines.iter().flat_map(|l| l.spans.iter())
    }

    pub fn span_count(&self) -> usize {
        self.lines.iter().map(|l| l.spans.len()).sum()
    }

    /// Mean span confidence.
    pub fn avg_confidence(&self) -> f64 {
        let count = self.span_count();
        if count == 0 {
            return 0.0;
        }
        self.spans().map(Span::confidence).sum::<f64>() / count as f64
    }

    /// Mean line font size.
    pub fn font_size(&self) -> f64 {
        if self.lines.is_empty() {
            return 0.0;
        }
        self.lines.iter().map(TextLine::font_size).sum::<f64>() / self.lines.len() as f64
    }

    pub fn is_empty(&self) -> bool {
        self.text().trim().is_empty()
    }
}

/// Enclosing box of same-space boxes; `None` for an empty iterator.
fn enclosing<'a>(mut boxes: impl Iterator<Item = &'a BBox>) -> Option<BBox> {
    let first = *boxes.next()?;
    Some(boxes.fold(first, |acc, b| {
        BBox::new(
            acc.min_x.min(b.min_x),
            acc.min_y.min(b.min_y),
            acc.max_x.max(b.max_x),
            acc.max_y.max(b.max_y),
            acc.space,
        )
    }))
}

/// Scripts written without spaces between words (Han, Kana, CJK punctuation).
/// Hangul is excluded: Korean separates words with spaces.
pub(crate) fn is_spaceless_script_char(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x20000..=0x2EBEF
        | 0x3040..=0x309F
        | 0x30A0..=0x30FF
        | 0x3000..=0x303F)
}

/// Document-space box shorthand.
pub(crate) fn doc_box(x0: f64, y0: f64, x1: f64, y1: f64) -> BBox {
    BBox::new(x0, y0, x1, y1, CoordinateSpace::Document)
}
