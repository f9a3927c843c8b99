//! Axis-aligned bounding boxes tagged with a coordinate space.

use serde::{Deserialize, Serialize};

use super::CoordinateSpace;
use crate::error::{Error, Result};

/// An axis-aligned rectangle `(min_x, min_y, max_x, max_y)` in a named space.
///
/// The constructor normalizes swapped corners, so `min <= max` always holds
/// on both axes. Zero-width or zero-height boxes are allowed and reported by
/// [`BBox::is_empty`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub space: CoordinateSpace,
}

impl BBox {
    /// Create a box from two corners in any order.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64, space: CoordinateSpace) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
            space,
        }
    }

    /// Create a box from origin and size.
    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64, space: CoordinateSpace) -> Self {
        Self::new(x, y, x + width, y + height, space)
    }

    /// Create a box from a `[x0, y0, x1, y1]` slice (PDF rectangle order).
    pub fn from_slice(values: &[f64], space: CoordinateSpace) -> Option<Self> {
        match values {
            [x0, y0, x1, y1] => Some(Self::new(*x0, *y0, *x1, *y1, space)),
            _ => None,
        }
    }

    /// `[min_x, min_y, max_x, max_y]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Whether the box has zero area.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Whether every coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Corners in order: (min,min), (max,min), (max,max), (min,max).
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    /// Same coordinates, relabelled into another space.
    pub fn with_space(&self, space: CoordinateSpace) -> Self {
        Self { space, ..*self }
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Whether `other` lies entirely inside this box (same space only).
    pub fn contains(&self, other: &BBox) -> bool {
        self.space == other.space
            && other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Whether the interiors overlap (touching edges do not count).
    pub fn intersects(&self, other: &BBox) -> bool {
        self.space == other.space
            && self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Overlapping region, `None` when disjoint or in different spaces.
    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
            self.space,
        ))
    }

    /// Smallest box enclosing both.
    pub fn union(&self, other: &BBox) -> Result<BBox> {
        if self.space != other.space {
            return Err(Error::SpaceMismatch {
                expected: self.space,
                found: other.space,
            });
        }
        Ok(BBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
            self.space,
        ))
    }

    /// Enclosing box of an iterator of boxes, all in `space`.
    pub fn enclosing<'a>(
        boxes: impl IntoIterator<Item = &'a BBox>,
        space: CoordinateSpace,
    ) -> Result<Option<BBox>> {
        let mut acc: Option<BBox> = None;
        for b in boxes {
            if b.space != space {
                return Err(Error::SpaceMismatch {
                    expected: space,
                    found: b.space,
                });
            }
            acc = Some(match acc {
                Some(a) => a.union(b)?,
                None => *b,
            });
        }
        Ok(acc)
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection(other).map(|b| b.area()).unwrap_or(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Fraction of this box's area that `other` covers.
    pub fn overlap_fraction(&self, other: &BBox) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection(other)
            .map(|b| b.area() / area)
            .unwrap_or(0.0)
    }

    /// Grow by `amount` on every side.
    pub fn pad(&self, amount: f64) -> BBox {
        self.pad_xy(amount, amount)
    }

    /// Grow by `dx` horizontally and `dy` vertically on each side.
    pub fn pad_xy(&self, dx: f64, dy: f64) -> BBox {
        BBox::new(
            self.min_x - dx,
            self.min_y - dy,
            self.max_x + dx,
            self.max_y + dy,
            self.space,
        )
    }

    pub fn scale_about_center(&self, factor: f64) -> BBox {
        let (cx, cy) = self.center();
        let hw = self.width() * factor / 2.0;
        let hh = self.height() * factor / 2.0;
        BBox::new(cx - hw, cy - hh, cx + hw, cy + hh, self.space)
    }

    /// Clamp into `bounds`. Returns `None` if nothing remains.
    pub fn clip(&self, bounds: &BBox) -> Option<BBox> {
        self.intersection(bounds)
    }

    /// Horizontal overlap length with another box.
    pub fn x_overlap(&self, other: &BBox) -> f64 {
        (self.max_x.min(other.max_x) - self.min_x.max(other.min_x)).max(0.0)
    }

    /// Vertical overlap length with another box.
    pub fn y_overlap(&self, other: &BBox) -> f64 {
        (self.max_y.min(other.max_y) - self.min_y.max(other.min_y)).max(0.0)
    }
}

/// Area covered by the union of `boxes`, counting overlaps once.
///
/// Uses coordinate compression on x and sweeps the covered y intervals per
/// slab, so the result is exact for axis-aligned rectangles.
pub fn union_area(boxes: &[BBox]) -> f64 {
    let boxes: Vec<&BBox> = boxes
        .iter()
        .filter(|b| !b.is_empty() && b.is_finite())
        .collect();
    if boxes.is_empty() {
        return 0.0;
    }

    let mut xs: Vec<f64> = boxes.iter().flat_map(|b| [b.min_x, b.max_x]).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    xs.dedup();

    let mut total = 0.0;
    let mut intervals: Vec<(f64, f64)> = Vec::new();
    for w in xs.windows(2) {
        let (x0, x1) = (w[0], w[1]);
        if x1 <= x0 {
            continue;
        }
        intervals.clear();
        intervals.extend(
            boxes
                .iter()
                .filter(|b| b.min_x <= x0 && b.max_x >= x1)
                .map(|b| (b.min_y, b.max_y)),
        );
        if intervals.is_empty() {
            continue;
        }
        intervals.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut covered = 0.0;
        let (mut start, mut end) = intervals[0];
        for &(s, e) in &intervals[1..] {
            if s > end {
                covered += end - start;
                start = s;
                end = e;
            } else if e > end {
                end = e;
            }
        }
        covered += end - start;
        total += covered * (x1 - x0);
    }
    total
}
