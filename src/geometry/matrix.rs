//! 3x3 affine matrices in double precision.

use serde::{Deserialize, Serialize};

/// Determinants at or below this magnitude are treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// A 2D affine transform stored as a 3x3 matrix, column-vector convention:
///
/// ```text
/// | a  c  e |   | x |
/// | b  d  f | * | y |
/// | 0  0  1 |   | 1 |
/// ```
///
/// The bottom row is always `[0, 0, 1]`, so only the six free entries are
/// stored. Naming follows the PDF `a b c d e f` operands of `cm` and `Tm`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    /// The identity matrix.
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// Build from PDF operand order (`a b c d e f`).
    pub fn from_pdf(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Build from the first two rows of a row-major 3x3 array.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self {
            a: rows[0][0],
            c: rows[0][1],
            e: rows[0][2],
            b: rows[1][0],
            d: rows[1][1],
            f: rows[1][2],
        }
    }

    /// Row-major 3x3 representation.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        [
            [self.a, self.c, self.e],
            [self.b, self.d, self.f],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Scaling matrix.
    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_pdf(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Translation matrix.
    pub fn translate(dx: f64, dy: f64) -> Self {
        Self::from_pdf(1.0, 0.0, 0.0, 1.0, dx, dy)
    }

    /// Counter-clockwise rotation (in a y-up frame) about `(cx, cy)`.
    pub fn rotate_about(angle_deg: f64, cx: f64, cy: f64) -> Self {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: cx - cx * cos + cy * sin,
            f: cy - cx * sin - cy * cos,
        }
    }

    /// `self * other`: applies `other` first, then `self`.
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    /// Matrix that applies `self` first, then `next`.
    pub fn then(&self, next: &Matrix) -> Matrix {
        next.multiply(self)
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Whether all entries are finite.
    pub fn is_finite(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Whether the matrix can be inverted.
    pub fn is_invertible(&self) -> bool {
        self.is_finite() && self.determinant().abs() > SINGULAR_EPSILON
    }

    /// Inverse matrix, or `None` when singular.
    pub fn inverse(&self) -> Option<Matrix> {
        if !self.is_invertible() {
            return None;
        }
        let det = self.determinant();
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Matrix {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }

    /// Transform a point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Transform a rectangle and return the axis-aligned envelope of its
    /// four transformed corners as `(min_x, min_y, max_x, max_y)`.
    pub fn map_rect(&self, x0: f64, y0: f64, x1: f64, y1: f64) -> (f64, f64, f64, f64) {
        let corners = [
            self.apply(x0, y0),
            self.apply(x1, y0),
            self.apply(x1, y1),
            self.apply(x0, y1),
        ];
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        (min_x, min_y, max_x, max_y)
    }

    /// Largest absolute difference between corresponding entries.
    pub fn max_abs_diff(&self, other: &Matrix) -> f64 {
        [
            self.a - other.a,
            self.b - other.b,
            self.c - other.c,
            self.d - other.d,
            self.e - other.e,
            self.f - other.f,
        ]
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// Entry-wise comparison within a tolerance.
    pub fn approx_eq(&self, other: &Matrix, tolerance: f64) -> bool {
        self.max_abs_diff(other) <= tolerance
    }

    /// Single-precision row-major array, as `imageproc` projections expect.
    pub fn to_f32_array(&self) -> [f32; 9] {
        [
            self.a as f32,
            self.c as f32,
            self.e as f32,
            self.b as f32,
            self.d as f32,
            self.f as f32,
            0.0,
            0.0,
            1.0,
        ]
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiply_order() {
        // Scale first, then translate.
        let m = Matrix::scale(2.0, 2.0).then(&Matrix::translate(10.0, 0.0));
        assert_eq!(m.apply(1.0, 1.0), (12.0, 2.0));

        // Translate first, then scale.
        let m = Matrix::translate(10.0, 0.0).then(&Matrix::scale(2.0, 2.0));
        assert_eq!(m.apply(1.0, 1.0), (22.0, 2.0));
    }

    #[test]
    fn test_inverse() {
        let m = Matrix::from_pdf(2.0, 0.5, -0.3, 1.5, 40.0, -7.0);
        let inv = m.inverse().unwrap();
        assert!(m.multiply(&inv).approx_eq(&Matrix::IDENTITY, 1e-12));
    }

    #[test]
    fn test_singular() {
        assert!(Matrix::scale(0.0, 1.0).inverse().is_none());
        assert!(Matrix::scale(f64::NAN, 1.0).inverse().is_none());
    }

    #[test]
    fn test_rotate_about_center() {
        let m = Matrix::rotate_about(90.0, 10.0, 10.0);
        let (x, y) = m.apply(20.0, 10.0);
        assert!((x - 10.0).abs() < 1e-12);
        assert!((y - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_rows_round_trip() {
        let m = Matrix::from_pdf(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        assert_eq!(Matrix::from_rows(m.to_rows()), m);
    }
}
