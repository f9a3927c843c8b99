//! Coordinate spaces, boxes and affine transforms.
//!
//! Every box and point the crate produces is tagged with the
//! [`CoordinateSpace`] it lives in. Moving between spaces always goes through
//! a [`TransformChain`]; combining values from different spaces directly is an
//! error ([`Error::SpaceMismatch`](crate::Error::SpaceMismatch)).
//!
//! ```
//! use pdfir::geometry::{AffineTransform, TransformChain};
//!
//! let chain = TransformChain::from(AffineTransform::from_dpi_scale(72.0, 300.0).unwrap());
//! let (x, y) = chain.apply_point(72.0, 72.0);
//! assert!((x - 300.0).abs() < 1e-9 && (y - 300.0).abs() < 1e-9);
//! ```

mod bbox;
mod matrix;
mod space;
mod transform;

pub use bbox::{union_area, BBox};
pub use matrix::{Matrix, SINGULAR_EPSILON};
pub use space::{CoordinateSpace, DOCUMENT_DPI};
pub use transform::{apply_bbox, apply_point, compose, invert, AffineTransform, TransformChain};
