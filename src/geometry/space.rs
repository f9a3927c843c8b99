//! Coordinate space tags.

use serde::{Deserialize, Serialize};

/// Reference DPI of document space (one PDF point is 1/72 inch).
pub const DOCUMENT_DPI: f64 = 72.0;

/// A named frame of reference for point and box coordinates.
///
/// Values in different spaces are never combined directly; a
/// [`TransformChain`](super::TransformChain) must map one into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    /// PDF user space: points at 72 DPI, origin bottom-left, y grows upward.
    Document,
    /// Rendered page pixels at the render DPI, origin top-left, y grows downward.
    Raster,
    /// Raster pixels after preprocessing (deskew, crop).
    Preprocessed,
}

impl CoordinateSpace {
    /// Whether this is a pixel space (y grows downward).
    pub fn is_pixel_space(&self) -> bool {
        !matches!(self, CoordinateSpace::Document)
    }
}

impl std::fmt::Display for CoordinateSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoordinateSpace::Document => "DOCUMENT",
            CoordinateSpace::Raster => "RASTER",
            CoordinateSpace::Preprocessed => "PREPROCESSED",
        };
        f.write_str(name)
    }
}
