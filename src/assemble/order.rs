//! Reading order for positioned blocks.

use crate::geometry::BBox;

/// Rows whose tops differ by at most this many points sort as one row.
const ROW_TOLERANCE: f64 = 5.0;

/// Recursion guard; deeper groups fall back to row order.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    /// Cut along a horizontal whitespace band (splits rows)
    Rows,
    /// Cut along a vertical whitespace band (splits columns)
    Columns,
}

/// Recursive XY-cut over document-space boxes (y up).
///
/// At each level the group is split at its widest vertical whitespace
/// band of at least `min_col_gap`, left part first; failing that at its
/// widest horizontal band of at least `min_row_gap`, upper part first. A
/// full-width block blocks every vertical band, so titles above columns
/// are still cut off first. A group with no qualifying band falls back to
/// [`row_order`]. Returns indices into `boxes`.
pub fn xy_cut(boxes: &[BBox], min_row_gap: f64, min_col_gap: f64) -> Vec<usize> {
    let mut order = Vec::with_capacity(boxes.len());
    let all: Vec<usize> = (0..boxes.len()).collect();
    cut(boxes, all, min_row_gap, min_col_gap, 0, &mut order);
    order
}

fn cut(
    boxes: &[BBox],
    group: Vec<usize>,
    min_row_gap: f64,
    min_col_gap: f64,
    depth: usize,
    out: &mut Vec<usize>,
) {
    if group.len() <= 1 || depth >= MAX_DEPTH {
        out.extend(row_order_of(boxes, group));
        return;
    }

    let split = split_at_gap(boxes, &group, Axis::Columns, min_col_gap)
        .or_else(|| split_at_gap(boxes, &group, Axis::Rows, min_row_gap));

    match split {
        Some((first, second)) => {
            cut(boxes, first, min_row_gap, min_col_gap, depth + 1, out);
            cut(boxes, second, min_row_gap, min_col_gap, depth + 1, out);
        }
        None => out.extend(row_order_of(boxes, group)),
    }
}

/// Split a group in two at the widest empty band on `axis`.
///
/// Intervals are swept in ascending order while tracking the furthest
/// end seen, so a band is empty only if no box crosses it. For rows the
/// part with larger y comes first.
fn split_at_gap(
    boxes: &[BBox],
    group: &[usize],
    axis: Axis,
    min_gap: f64,
) -> Option<(Vec<usize>, Vec<usize>)> {
    let interval = |i: usize| match axis {
        Axis::Rows => (boxes[i].min_y, boxes[i].max_y),
        Axis::Columns => (boxes[i].min_x, boxes[i].max_x),
    };

    let mut sorted = group.to_vec();
    sorted.sort_by(|&a, &b| interval(a).0.total_cmp(&interval(b).0));

    let mut reach = interval(sorted[0]).1;
    let mut best: Option<(f64, usize)> = None;
    for (pos, &i) in sorted.iter().enumerate().skip(1) {
        let (start, end) = interval(i);
        let gap = start - reach;
        if gap >= min_gap && best.map_or(true, |(g, _)| gap > g) {
            best = Some((gap, pos));
        }
        reach = reach.max(end);
    }

    let (_, pos) = best?;
    let high = sorted.split_off(pos);
    let low = sorted;
    Some(match axis {
        Axis::Rows => (high, low),
        Axis::Columns => (low, high),
    })
}

/// Top-to-bottom, left-to-right order with a small row tolerance.
pub fn row_order(boxes: &[BBox]) -> Vec<usize> {
    row_order_of(boxes, (0..boxes.len()).collect())
}

fn row_order_of(boxes: &[BBox], group: Vec<usize>) -> Vec<usize> {
    let mut sorted = group;
    sorted.sort_by(|&a, &b| {
        boxes[b]
            .max_y
            .total_cmp(&boxes[a].max_y)
            .then(boxes[a].min_x.total_cmp(&boxes[b].min_x))
    });

    let mut rows: Vec<Vec<usize>> = Vec::new();
    let mut row_top = f64::NAN;
    for i in sorted {
        let top = boxes[i].max_y;
        match rows.last_mut() {
            Some(row) if (row_top - top).abs() <= ROW_TOLERANCE => row.push(i),
            _ => {
                row_top = top;
                rows.push(vec![i]);
            }
        }
    }

    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by(|&a, &b| boxes[a].min_x.total_cmp(&boxes[b].min_x));
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CoordinateSpace;

    fn b(x0: f64, y0: f64, x1: f64, y1: f64) -> BBox {
        BBox::new(x0, y0, x1, y1, CoordinateSpace::Document)
    }

    #[test]
    fn test_two_columns_read_column_major() {
        // Title across the top, then two columns of two blocks each.
        let boxes = vec![
            b(320.0, 500.0, 560.0, 640.0), // right top
            b(50.0, 700.0, 560.0, 740.0),  // title
            b(50.0, 300.0, 290.0, 480.0),  // left bottom
            b(50.0, 500.0, 290.0, 640.0),  // left top
            b(320.0, 300.0, 560.0, 480.0), // right bottom
        ];
        assert_eq!(xy_cut(&boxes, 2.0, 5.0), vec![1, 3, 2, 0, 4]);

        let staggered = vec![
            b(50.0, 700.0, 560.0, 740.0),  // title
            b(50.0, 500.0, 290.0, 640.0),  // left top
            b(50.0, 300.0, 290.0, 499.0),  // left bottom
            b(320.0, 450.0, 560.0, 660.0), // right top
            b(320.0, 280.0, 560.0, 449.0), // right bottom
        ];
        assert_eq!(xy_cut(&staggered, 2.0, 5.0), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_aligned_paragraphs_read_by_column() {
        // Paragraph breaks line up across the columns.
        let boxes = vec![
            b(50.0, 500.0, 290.0, 640.0),
            b(50.0, 300.0, 290.0, 480.0),
            b(320.0, 500.0, 560.0, 640.0),
            b(320.0, 300.0, 560.0, 480.0),
        ];
        assert_eq!(xy_cut(&boxes, 2.0, 5.0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_full_width_block_prevents_column_cut() {
        let boxes = vec![
            b(300.0, 100.0, 400.0, 120.0),
            b(10.0, 100.0, 100.0, 120.0),
            b(10.0, 500.0, 400.0, 520.0),
        ];
        assert_eq!(xy_cut(&boxes, 2.0, 5.0), vec![2, 1, 0]);
    }

    #[test]
    fn test_overlapping_boxes_fall_back() {
        let boxes = vec![
            b(0.0, 0.0, 100.0, 100.0),
            b(50.0, 50.0, 150.0, 150.0),
            b(90.0, 20.0, 200.0, 98.0),
        ];
        let order = xy_cut(&boxes, 2.0, 5.0);
        assert_eq!(order, row_order(&boxes));
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_no_box_spans_a_cut() {
        // The wide box bridges the gap between the two narrow ones.
        let boxes = vec![
            b(0.0, 0.0, 50.0, 10.0),
            b(0.0, 5.0, 300.0, 30.0),
            b(200.0, 20.0, 300.0, 40.0),
        ];
        let mut order = xy_cut(&boxes, 2.0, 5.0);
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(xy_cut(&boxes, 2.0, 5.0), row_order(&boxes));
    }

    #[test]
    fn test_row_tolerance() {
        let boxes = vec![b(200.0, 0.0, 300.0, 98.0), b(0.0, 0.0, 100.0, 100.0)];
        assert_eq!(row_order(&boxes), vec![1, 0]);
        let boxes = vec![b(200.0, 0.0, 300.0, 110.0), b(0.0, 0.0, 100.0, 100.0)];
        assert_eq!(row_order(&boxes), vec![0, 1]);
    }

    #[test]
    fn test_empty_and_single() {
        assert!(xy_cut(&[], 2.0, 5.0).is_empty());
        assert_eq!(xy_cut(&[b(0.0, 0.0, 1.0, 1.0)], 2.0, 5.0), vec![0]);
    }
}
