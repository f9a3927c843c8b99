//! Span grouping: spans into lines, lines into blocks.

use std::collections::HashMap;

use crate::config::LayoutConfig;
use crate::geometry::BBox;
use crate::model::{Origin, Span, TextBlock, TextLine};

/// Font size statistics for heading detection.
#[derive(Debug, Clone, Default)]
pub struct FontStatistics {
    /// Most common size, weighted by characters
    pub body_size: f64,
    /// Observed sizes (tenths of a point) and character counts
    pub size_histogram: HashMap<i64, usize>,
}

impl FontStatistics {
    /// Collect sizes from vector spans.
    pub fn from_spans<'a>(spans: impl IntoIterator<Item = &'a Span>) -> Self {
        let mut stats = Self::default();
        for span in spans {
            if span.origin() == Origin::Vector {
                stats.add_size(span.effective_size(), span.text().chars().count());
            }
        }
        stats.analyze();
        stats
    }

    /// Add `weight` characters of a font size.
    pub fn add_size(&mut self, size: f64, weight: usize) {
        if !(size.is_finite() && size > 0.0) || weight == 0 {
            return;
        }
        let key = (size * 10.0).round() as i64;
        *self.size_histogram.entry(key).or_insert(0) += weight;
    }

    /// Derive the body size. Ties go to the smaller size.
    pub fn analyze(&mut self) {
        self.body_size = self
            .size_histogram
            .iter()
            .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then(kb.cmp(ka)))
            .map(|(k, _)| *k as f64 / 10.0)
            .unwrap_or(0.0);
    }

    pub fn is_empty(&self) -> bool {
        self.size_histogram.is_empty()
    }

    /// Whether `size` is at least `ratio` times the body size.
    pub fn is_heading_size(&self, size: f64, ratio: f64) -> bool {
        self.body_size > 0.0 && size >= self.body_size * ratio
    }
}

/// Group spans into lines.
///
/// Spans whose vertical extents overlap by at least half the smaller
/// height share a band; a band is split into separate lines wherever the
/// horizontal gap exceeds `word_gap_factor` times the band height.
/// Lines come out top to bottom, left to right.
pub fn group_lines(spans: Vec<Span>, config: &LayoutConfig) -> Vec<TextLine> {
    let mut spans = spans;
    spans.sort_by(|a, b| {
        center_y(b.bbox())
            .total_cmp(&center_y(a.bbox()))
            .then(a.bbox().min_x.total_cmp(&b.bbox().min_x))
    });

    let mut bands: Vec<(BBox, Vec<Span>)> = Vec::new();
    for span in spans {
        let joins = bands.last().is_some_and(|(band, _)| {
            let overlap = band.y_overlap(span.bbox());
            let min_h = band.height().min(span.bbox().height());
            min_h > 0.0 && overlap >= 0.5 * min_h
        });
        match bands.last_mut() {
            Some((band, members)) if joins => {
                *band = band.union(span.bbox()).unwrap_or(*band);
                members.push(span);
            }
            _ => bands.push((*span.bbox(), vec![span])),
        }
    }

    let mut lines = Vec::new();
    for (band, mut members) in bands {
        members.sort_by(|a, b| a.bbox().min_x.total_cmp(&b.bbox().min_x));
        let max_gap = config.word_gap_factor * band.height().max(1.0);
        let mut current: Vec<Span> = Vec::new();
        let mut right = f64::NEG_INFINITY;
        for span in members {
            if !current.is_empty() && span.bbox().min_x - right > max_gap {
                lines.extend(TextLine::from_spans(std::mem::take(&mut current)));
                right = f64::NEG_INFINITY;
            }
            right = right.max(span.bbox().max_x);
            current.push(span);
        }
        lines.extend(TextLine::from_spans(current));
    }
    lines
}

/// Group lines of one origin into blocks.
///
/// A line joins the most recent block it continues: horizontal overlap
/// with the block, a vertical gap of at most `line_gap_factor` line
/// heights below the block, and a height within 1.5x of the block's last
/// line. Lines are visited top to bottom.
pub fn group_blocks(lines: Vec<TextLine>, origin: Origin, config: &LayoutConfig) -> Vec<TextBlock> {
    let mut lines = lines;
    lines.sort_by(|a, b| {
        b.bbox
            .max_y
            .total_cmp(&a.bbox.max_y)
            .then(a.bbox.min_x.total_cmp(&b.bbox.min_x))
    });

    let mut blocks: Vec<Vec<TextLine>> = Vec::new();
    for line in lines {
        let target = blocks
            .iter()
            .enumerate()
            .rev()
            .find(|(_, block)| continues(block, &line, config))
            .map(|(i, _)| i);
        match target {
            Some(i) => blocks[i].push(line),
            None => blocks.push(vec![line]),
        }
    }

    blocks
        .into_iter()
        .filter_map(|lines| TextBlock::new(lines, origin))
        .collect()
}

fn continues(block: &[TextLine], line: &TextLine, config: &LayoutConfig) -> bool {
    let Some(last) = block.last() else {
        return false;
    };
    let block_box = block
        .iter()
        .skip(1)
        .fold(block[0].bbox, |acc, l| acc.union(&l.bbox).unwrap_or(acc));

    let h_line = line.bbox.height().max(f64::EPSILON);
    let h_last = last.bbox.height().max(f64::EPSILON);
    let ratio = h_line / h_last;
    if !(1.0 / 1.5..=1.5).contains(&ratio) {
        return false;
    }

    if block_box.x_overlap(&line.bbox) <= 0.0 {
        return false;
    }

    // Gap from the block's bottom edge down to the line's top edge.
    let gap = block_box.min_y - line.bbox.max_y;
    gap >= -0.5 * h_line && gap <= config.line_gap_factor * h_line.max(h_last)
}

fn center_y(bbox: &BBox) -> f64 {
    (bbox.min_y + bbox.max_y) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CoordinateSpace;

    fn span(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Span {
        Span::vector(text, BBox::new(x0, y0, x1, y1, CoordinateSpace::Document))
            .with_font("Helvetica", y1 - y0)
    }

    #[test]
    fn test_font_statistics() {
        let mut stats = FontStatistics::default();
        stats.add_size(12.0, 100);
        stats.add_size(18.0, 5);
        stats.add_size(24.0, 3);
        stats.analyze();
        assert!((stats.body_size - 12.0).abs() < 1e-9);
        assert!(!stats.is_heading_size(12.0, 1.2));
        assert!(stats.is_heading_size(18.0, 1.2));
        assert!(FontStatistics::default().body_size == 0.0);
    }

    #[test]
    fn test_spans_form_lines() {
        let spans = vec![
            span("world", 60.0, 700.0, 100.0, 712.0),
            span("Hello", 20.0, 701.0, 55.0, 713.0),
            span("Next", 20.0, 680.0, 50.0, 692.0),
        ];
        let lines = group_lines(spans, &LayoutConfig::default());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "Hello world");
        assert_eq!(lines[1].text(), "Next");
    }

    #[test]
    fn test_column_gap_splits_line() {
        let spans = vec![
            span("left", 20.0, 700.0, 60.0, 712.0),
            span("right", 320.0, 700.0, 360.0, 712.0),
        ];
        let lines = group_lines(spans, &LayoutConfig::default());
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_lines_form_blocks() {
        let config = LayoutConfig::default();
        let spans = vec![
            span("First line", 20.0, 700.0, 200.0, 712.0),
            span("second line", 20.0, 686.0, 200.0, 698.0),
            // Paragraph break: 40pt gap.
            span("New paragraph", 20.0, 634.0, 200.0, 646.0),
            // Much larger text does not join.
            span("Big", 20.0, 600.0, 200.0, 630.0),
        ];
        let lines = group_lines(spans, &config);
        let blocks = group_blocks(lines, Origin::Vector, &config);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text(), "First line\nsecond line");
    }

    #[test]
    fn test_two_columns_stay_separate() {
        let config = LayoutConfig::default();
        let spans = vec![
            span("a1", 20.0, 700.0, 200.0, 712.0),
            span("b1", 320.0, 700.0, 500.0, 712.0),
            span("a2", 20.0, 686.0, 200.0, 698.0),
            span("b2", 320.0, 686.0, 500.0, 698.0),
        ];
        let lines = group_lines(spans, &config);
        let blocks = group_blocks(lines, Origin::Vector, &config);
        let texts: Vec<String> = blocks.iter().map(|b| b.text()).collect();
        assert_eq!(texts, vec!["a1\na2", "b1\nb2"]);
    }
}
