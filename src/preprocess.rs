//! Raster preprocessing before OCR.
//!
//! Deskewing rotates the page image so text rows are horizontal. The same
//! rotation is appended to the page's transform chain as a
//! `RASTER -> PREPROCESSED` link, and the pixels are warped with a
//! projection built from that link's matrix, so OCR boxes found on the
//! corrected image map back to the page exactly.

use image::imageops::{thumbnail, FilterType};
use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use serde::{Deserialize, Serialize};

use crate::config::DeskewConfig;
use crate::error::{Error, Result};
use crate::extract::RasterPage;
use crate::geometry::{AffineTransform, CoordinateSpace, TransformChain};

/// Longest side of the image used for angle estimation.
const ANALYSIS_SIZE: u32 = 1000;

/// Luma at or below which a pixel counts as ink.
const INK_THRESHOLD: u8 = 128;

/// Skew estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeskewMethod {
    /// No correction.
    None,
    /// Row projection profile search.
    #[default]
    Projection,
    /// Hough transform over Canny edges.
    Hough,
}

/// Output of [`Deskewer::apply`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Image handed to OCR
    pub image: GrayImage,
    /// Document -> OCR image space
    pub chain: TransformChain,
    /// Applied correction in degrees, 0 when nothing was done
    pub angle: f64,
}

impl Preprocessed {
    /// Space OCR boxes will be reported in.
    pub fn space(&self) -> CoordinateSpace {
        self.chain.target()
    }
}

/// Estimates and corrects page skew.
#[derive(Debug, Clone)]
pub struct Deskewer {
    config: DeskewConfig,
}

impl Deskewer {
    pub fn new(config: DeskewConfig) -> Self {
        Self { config }
    }

    /// Rotation in degrees that straightens the text in `image`, `None`
    /// when there is too little ink to tell.
    pub fn estimate(&self, image: &GrayImage) -> Option<f64> {
        match self.config.method {
            DeskewMethod::None => None,
            DeskewMethod::Projection => self.estimate_projection(image),
            DeskewMethod::Hough => self.estimate_hough(image),
        }
    }

    /// Deskew a rendered page.
    pub fn apply(&self, page: RasterPage) -> Result<Preprocessed> {
        let angle = self.estimate(&page.image).unwrap_or(0.0);
        if angle.abs() < self.config.min_angle.max(f64::EPSILON) {
            return Ok(Preprocessed {
                image: page.image,
                chain: page.chain,
                angle: 0.0,
            });
        }

        let center = (page.image.width() as f64 / 2.0, page.image.height() as f64 / 2.0);
        let link = AffineTransform::rotate(
            angle,
            center,
            CoordinateSpace::Raster,
            CoordinateSpace::Preprocessed,
        )?;
        let projection = Projection::from_matrix(link.matrix().to_f32_array()).ok_or_else(|| {
            Error::DegenerateTransform(format!("cannot build projection for {:.2} deg", angle))
        })?;
        let image = warp(&page.image, &projection, Interpolation::Bilinear, Luma([255]));
        let chain = page.chain.then(link)?;
        log::debug!("deskewed by {:.2} deg", angle);

        Ok(Preprocessed {
            image,
            chain,
            angle,
        })
    }

    fn estimate_projection(&self, image: &GrayImage) -> Option<f64> {
        let small = downsample(image);
        let points: Vec<(f64, f64)> = small
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] <= INK_THRESHOLD)
            .map(|(x, y, _)| (x as f64, y as f64))
            .collect();
        if points.len() < 50 {
            return None;
        }

        let max = self.config.max_angle.abs();
        let step = self.config.angle_resolution.max(0.01);
        let steps = (max / step).floor() as i64;
        let mut best: Option<(f64, f64)> = None;
        for i in -steps..=steps {
            let theta = i as f64 * step;
            let score = profile_score(&points, theta);
            // Strict comparison keeps the smallest |theta| on ties.
            let better = match best {
                None => true,
                Some((best_theta, best_score)) => {
                    score > best_score || (score == best_score && theta.abs() < best_theta.abs())
                }
            };
            if better {
                best = Some((theta, score));
            }
        }
        best.map(|(theta, _)| theta)
    }

    fn estimate_hough(&self, image: &GrayImage) -> Option<f64> {
        let small = downsample(image);
        let edges = canny(&small, 50.0, 150.0);
        let diagonal = (small.width() as f64).hypot(small.height() as f64);
        let options = LineDetectionOptions {
            vote_threshold: (diagonal * 0.15).max(40.0) as u32,
            suppression_radius: 8,
        };
        let max = self.config.max_angle.abs();
        // Normal angle 90 is a horizontal line; a tilt of d degrees shows up
        // as 90 + d.
        let mut tilts: Vec<f64> = detect_lines(&edges, options)
            .iter()
            .map(|line| line.angle_in_degrees as f64 - 90.0)
            .filter(|tilt| tilt.abs() <= max)
            .collect();
        if tilts.is_empty() {
            return None;
        }
        tilts.sort_by(|a, b| a.total_cmp(b));
        Some(-tilts[tilts.len() / 2])
    }
}

fn downsample(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= ANALYSIS_SIZE {
        return image.clone();
    }
    let k = ANALYSIS_SIZE as f64 / longest as f64;
    let (sw, sh) = (((w as f64 * k) as u32).max(1), ((h as f64 * k) as u32).max(1));
    if w > 4 * sw {
        thumbnail(image, sw, sh)
    } else {
        image::imageops::resize(image, sw, sh, FilterType::Triangle)
    }
}

/// Sharpness of the row histogram of ink after rotating by `theta`.
fn profile_score(points: &[(f64, f64)], theta: f64) -> f64 {
    let (sin, cos) = theta.to_radians().sin_cos();
    let rows: Vec<i64> = points
        .iter()
        .map(|&(x, y)| (sin * x + cos * y).round() as i64)
        .collect();
    let (Some(&lo), Some(&hi)) = (rows.iter().min(), rows.iter().max()) else {
        return 0.0;
    };
    let mut hist = vec![0u64; (hi - lo + 1) as usize];
    for r in rows {
        hist[(r - lo) as usize] += 1;
    }
    hist.iter().map(|&c| (c * c) as f64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Matrix;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    /// White page with dark text-like bars, rotated by `angle` degrees.
    fn skewed_page(angle: f64) -> GrayImage {
        let mut page = GrayImage::from_pixel(600, 600, Luma([255]));
        for row in 0..12 {
            let y = 60 + row * 40;
            draw_filled_rect_mut(&mut page, Rect::at(80, y).of_size(440, 6), Luma([0]));
        }
        if angle == 0.0 {
            return page;
        }
        let m = Matrix::rotate_about(angle, 300.0, 300.0);
        let projection = Projection::from_matrix(m.to_f32_array()).unwrap();
        warp(&page, &projection, Interpolation::Bilinear, Luma([255]))
    }

    fn raster(image: GrayImage) -> RasterPage {
        RasterPage {
            chain: TransformChain::from_links([
                AffineTransform::flip_y(600.0, CoordinateSpace::Document).unwrap(),
                AffineTransform::document_to_raster(72.0).unwrap(),
            ])
            .unwrap(),
            image,
            dpi: 72,
        }
    }

    #[test]
    fn test_projection_estimate() {
        let deskewer = Deskewer::new(DeskewConfig::default());
        let estimate = deskewer.estimate(&skewed_page(2.0)).unwrap();
        assert!((estimate + 2.0).abs() <= 0.2 + 1e-9, "estimate {}", estimate);
        let straight = deskewer.estimate(&skewed_page(0.0)).unwrap();
        assert!(straight.abs() < 0.1);
    }

    #[test]
    fn test_apply_appends_link() {
        let deskewer = Deskewer::new(DeskewConfig::default());
        let result = deskewer.apply(raster(skewed_page(-1.5))).unwrap();
        assert!((result.angle - 1.5).abs() <= 0.2 + 1e-9);
        assert_eq!(result.space(), CoordinateSpace::Preprocessed);
        assert_eq!(result.chain.len(), 3);
        assert_eq!(result.image.dimensions(), (600, 600));
        // The chain still inverts back to the page.
        assert!(result.chain.round_trip_error(100.0, 500.0).unwrap() < 1e-6);
    }

    #[test]
    fn test_small_angles_left_alone() {
        let deskewer = Deskewer::new(DeskewConfig::default());
        let result = deskewer.apply(raster(skewed_page(0.0))).unwrap();
        assert_eq!(result.angle, 0.0);
        assert_eq!(result.space(), CoordinateSpace::Raster);
        assert_eq!(result.chain.len(), 2);
    }

    #[test]
    fn test_disabled_and_blank() {
        let off = Deskewer::new(DeskewConfig {
            method: DeskewMethod::None,
            ..Default::default()
        });
        assert!(off.estimate(&skewed_page(3.0)).is_none());

        let blank = GrayImage::from_pixel(100, 100, Luma([255]));
        assert!(Deskewer::new(DeskewConfig::default()).estimate(&blank).is_none());
    }
}
