//! Space-tagged affine transforms and transform chains.

use serde::{Deserialize, Serialize};

use super::{BBox, CoordinateSpace, Matrix, DOCUMENT_DPI};
use crate::error::{Error, Result};

/// Tolerance used by [`AffineTransform::is_identity`].
const IDENTITY_TOLERANCE: f64 = 1e-9;

/// One affine mapping from a source space into a target space.
///
/// Construction validates the matrix: non-finite entries or a determinant
/// with magnitude at or below `1e-12` fail with
/// [`Error::DegenerateTransform`]. Once built, a transform is immutable and
/// always invertible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    matrix: Matrix,
    source: CoordinateSpace,
    target: CoordinateSpace,
}

impl AffineTransform {
    /// Wrap a matrix, rejecting degenerate ones.
    pub fn new(matrix: Matrix, source: CoordinateSpace, target: CoordinateSpace) -> Result<Self> {
        if !matrix.is_finite() {
            return Err(Error::DegenerateTransform(format!(
                "non-finite matrix {:?}",
                matrix.to_rows()
            )));
        }
        if !matrix.is_invertible() {
            return Err(Error::DegenerateTransform(format!(
                "singular matrix (det = {:e})",
                matrix.determinant()
            )));
        }
        Ok(Self {
            matrix,
            source,
            target,
        })
    }

    /// Identity within a single space.
    pub fn identity(space: CoordinateSpace) -> Self {
        Self {
            matrix: Matrix::IDENTITY,
            source: space,
            target: space,
        }
    }

    pub fn scale(
        sx: f64,
        sy: f64,
        source: CoordinateSpace,
        target: CoordinateSpace,
    ) -> Result<Self> {
        Self::new(Matrix::scale(sx, sy), source, target)
    }

    pub fn translate(
        dx: f64,
        dy: f64,
        source: CoordinateSpace,
        target: CoordinateSpace,
    ) -> Result<Self> {
        Self::new(Matrix::translate(dx, dy), source, target)
    }

    /// Rotation by `angle_deg` about `center`, measured from +x toward +y
    /// of the frame it is applied in.
    pub fn rotate(
        angle_deg: f64,
        center: (f64, f64),
        source: CoordinateSpace,
        target: CoordinateSpace,
    ) -> Result<Self> {
        Self::new(
            Matrix::rotate_about(angle_deg, center.0, center.1),
            source,
            target,
        )
    }

    /// Mirror the y axis within a frame of the given height (`y -> height - y`).
    pub fn flip_y(height: f64, space: CoordinateSpace) -> Result<Self> {
        Self::new(Matrix::from_pdf(1.0, 0.0, 0.0, -1.0, 0.0, height), space, space)
    }

    /// Document points to raster pixels at `dst_dpi` (uniform scale
    /// `dst_dpi / src_dpi`, no flip).
    pub fn from_dpi_scale(src_dpi: f64, dst_dpi: f64) -> Result<Self> {
        Self::rescale(
            src_dpi,
            dst_dpi,
            CoordinateSpace::Document,
            CoordinateSpace::Raster,
        )
    }

    /// Uniform resolution change between two spaces.
    pub fn rescale(
        src_dpi: f64,
        dst_dpi: f64,
        source: CoordinateSpace,
        target: CoordinateSpace,
    ) -> Result<Self> {
        if !(src_dpi > 0.0 && dst_dpi > 0.0) {
            return Err(Error::DegenerateTransform(format!(
                "invalid resolution {} -> {}",
                src_dpi, dst_dpi
            )));
        }
        let k = dst_dpi / src_dpi;
        Self::scale(k, k, source, target)
    }

    /// Document points to raster pixels at `dpi`.
    pub fn document_to_raster(dpi: f64) -> Result<Self> {
        Self::from_dpi_scale(DOCUMENT_DPI, dpi)
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn source(&self) -> CoordinateSpace {
        self.source
    }

    pub fn target(&self) -> CoordinateSpace {
        self.target
    }

    /// Inverse mapping, target back to source.
    pub fn inverse(&self) -> Result<Self> {
        let inv = self.matrix.inverse().ok_or_else(|| {
            Error::DegenerateTransform("matrix became singular".to_string())
        })?;
        Self::new(inv, self.target, self.source)
    }

    /// Length of the transformed unit x and y axes.
    pub fn scale_factors(&self) -> (f64, f64) {
        let m = &self.matrix;
        (m.a.hypot(m.b), m.c.hypot(m.d))
    }

    /// Rotation angle of the x axis, in degrees.
    pub fn rotation_deg(&self) -> f64 {
        self.matrix.b.atan2(self.matrix.a).to_degrees()
    }

    pub fn translation(&self) -> (f64, f64) {
        (self.matrix.e, self.matrix.f)
    }

    pub fn is_identity(&self) -> bool {
        self.matrix.approx_eq(&Matrix::IDENTITY, IDENTITY_TOLERANCE)
    }

    pub fn apply_point(&self, x: f64, y: f64) -> (f64, f64) {
        self.matrix.apply(x, y)
    }
}

/// An ordered sequence of transforms, applied first to last.
///
/// Each link's source must equal the previous link's target. The chain keeps
/// its composite matrix, so applying it costs one matrix product per point
/// regardless of length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformChain {
    links: Vec<AffineTransform>,
    source: CoordinateSpace,
    target: CoordinateSpace,
    matrix: Matrix,
}

impl TransformChain {
    /// Empty chain mapping a space onto itself.
    pub fn identity(space: CoordinateSpace) -> Self {
        Self {
            links: Vec::new(),
            source: space,
            target: space,
            matrix: Matrix::IDENTITY,
        }
    }

    /// Chain of one link.
    pub fn from_link(link: AffineTransform) -> Self {
        Self {
            source: link.source,
            target: link.target,
            matrix: link.matrix,
            links: vec![link],
        }
    }

    /// Build from links in application order.
    pub fn from_links(links: impl IntoIterator<Item = AffineTransform>) -> Result<Self> {
        let mut iter = links.into_iter();
        let mut chain = match iter.next() {
            Some(first) => Self::from_link(first),
            None => {
                return Err(Error::DegenerateTransform(
                    "transform chain needs at least one link".to_string(),
                ))
            }
        };
        for link in iter {
            chain = chain.then(link)?;
        }
        Ok(chain)
    }

    /// Append a link applied after the current chain.
    pub fn then(mut self, link: AffineTransform) -> Result<Self> {
        if link.source != self.target {
            return Err(Error::SpaceMismatch {
                expected: self.target,
                found: link.source,
            });
        }
        self.matrix = self.matrix.then(&link.matrix);
        self.target = link.target;
        self.links.push(link);
        Ok(self)
    }

    /// `self` followed by `next`.
    pub fn compose(&self, next: &TransformChain) -> Result<Self> {
        if self.target != next.source {
            return Err(Error::SpaceMismatch {
                expected: self.target,
                found: next.source,
            });
        }
        let mut links = self.links.clone();
        links.extend(next.links.iter().copied());
        Ok(Self {
            links,
            source: self.source,
            target: next.target,
            matrix: self.matrix.then(&next.matrix),
        })
    }

    /// Reverse chain: links in reverse order, each inverted.
    pub fn invert(&self) -> Result<Self> {
        let links = self
            .links
            .iter()
            .rev()
            .map(AffineTransform::inverse)
            .collect::<Result<Vec<_>>>()?;
        let matrix = self.matrix.inverse().ok_or_else(|| {
            Error::DegenerateTransform("composite matrix is singular".to_string())
        })?;
        Ok(Self {
            links,
            source: self.target,
            target: self.source,
            matrix,
        })
    }

    pub fn source(&self) -> CoordinateSpace {
        self.source
    }

    pub fn target(&self) -> CoordinateSpace {
        self.target
    }

    /// Composite matrix of the whole chain.
    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn links(&self) -> &[AffineTransform] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Map a point from the chain's source space to its target space.
    pub fn apply_point(&self, x: f64, y: f64) -> (f64, f64) {
        self.matrix.apply(x, y)
    }

    /// Map a box by transforming its four corners and taking their
    /// axis-aligned envelope.
    pub fn apply_bbox(&self, bbox: &BBox) -> Result<BBox> {
        if bbox.space != self.source {
            return Err(Error::SpaceMismatch {
                expected: self.source,
                found: bbox.space,
            });
        }
        let (x0, y0, x1, y1) = self
            .matrix
            .map_rect(bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y);
        Ok(BBox::new(x0, y0, x1, y1, self.target))
    }

    /// Distance between `p` and `p` mapped forward then back.
    pub fn round_trip_error(&self, x: f64, y: f64) -> Result<f64> {
        let inverse = self.invert()?;
        let (fx, fy) = self.apply_point(x, y);
        let (bx, by) = inverse.apply_point(fx, fy);
        Ok((bx - x).hypot(by - y))
    }

    /// Short human-readable description, e.g. `DOCUMENT -> RASTER (2 links)`.
    pub fn describe(&self) -> String {
        format!("{} -> {} ({} links)", self.source, self.target, self.len())
    }
}

impl From<AffineTransform> for TransformChain {
    fn from(link: AffineTransform) -> Self {
        Self::from_link(link)
    }
}

/// `a` followed by `b`; fails unless `a.target == b.source`.
pub fn compose(a: &TransformChain, b: &TransformChain) -> Result<TransformChain> {
    a.compose(b)
}

/// Inverse of `chain`.
pub fn invert(chain: &TransformChain) -> Result<TransformChain> {
    chain.invert()
}

/// Map a point through `chain`.
pub fn apply_point(chain: &TransformChain, point: (f64, f64)) -> (f64, f64) {
    chain.apply_point(point.0, point.1)
}

/// Map a box through `chain`.
pub fn apply_bbox(chain: &TransformChain, bbox: &BBox) -> Result<BBox> {
    chain.apply_bbox(bbox)
}
