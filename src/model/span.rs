//! Positioned text spans.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::{BBox, TransformChain};

/// Where a span's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Text drawn by the PDF content stream.
    Vector,
    /// Text recognized from pixels.
    Ocr,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Vector => f.write_str("VECTOR"),
            Origin::Ocr => f.write_str("OCR"),
        }
    }
}

/// A run of text with a box, an origin and a confidence in `0.0..=1.0`.
///
/// Spans are immutable once built; mapping into another space produces a
/// new span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    text: String,
    bbox: BBox,
    origin: Origin,
    confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    font_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    font_size: Option<f64>,
}

impl Span {
    /// A vector span. Vector text is exact, so confidence is 1.
    pub fn vector(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
            origin: Origin::Vector,
            confidence: 1.0,
            font_name: None,
            font_size: None,
        }
    }

    /// An OCR span; confidence is clamped to `0.0..=1.0`.
    pub fn ocr(text: impl Into<String>, bbox: BBox, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            text: text.into(),
            bbox,
            origin: Origin::Ocr,
            confidence,
            font_name: None,
            font_size: None,
        }
    }

    /// Attach font information.
    pub fn with_font(mut self, name: impl Into<String>, size: f64) -> Self {
        self.font_name = Some(name.into());
        self.font_size = Some(size);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn font_name(&self) -> Option<&str> {
        self.font_name.as_deref()
    }

    pub fn font_size(&self) -> Option<f64> {
        self.font_size
    }

    /// Font size if known, else the box height.
    pub fn effective_size(&self) -> f64 {
        self.font_size.unwrap_or_else(|| self.bbox.height())
    }

    /// Whether the font name suggests a bold face.
    pub fn is_bold(&self) -> bool {
        self.font_name
            .as_deref()
            .map(|n| {
                let n = n.to_lowercase();
                n.contains("bold") || n.contains("black") || n.contains("heavy")
            })
            .unwrap_or(false)
    }

    /// Copy of this span with its box mapped through `chain`.
    pub fn map(&self, chain: &TransformChain) -> Result<Span> {
        Ok(Span {
            bbox: chain.apply_bbox(&self.bbox)?,
            ..self.clone()
        })
    }
}
