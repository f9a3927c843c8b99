//! Tesseract command-line backend.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Command;

use image::imageops::crop_imm;
use image::ImageFormat;

use super::{OcrBackend, OcrRequest, OcrSpan};
use crate::config::OcrConfig;
use crate::error::{Error, Result};
use crate::geometry::{BBox, CoordinateSpace};

const NAME: &str = "tesseract";

/// Runs the `tesseract` executable on a temporary PNG and parses its TSV
/// output into line-level spans.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    command: String,
    psm: u8,
}

impl TesseractBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            psm: 3,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            command: config.tesseract_cmd.clone(),
            psm: config.tesseract_psm,
        }
    }

    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    /// Arguments after the input path.
    fn args(&self, request: &OcrRequest) -> Vec<String> {
        let mut args = vec!["stdout".to_string()];
        if !request.hints.is_empty() {
            args.push("-l".to_string());
            args.push(request.hints.joined());
        }
        args.push("--psm".to_string());
        args.push(self.psm.to_string());
        args.push("tsv".to_string());
        args
    }
}

impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn recognize(&self, request: &OcrRequest) -> Result<Vec<OcrSpan>> {
        let Some((x, y, w, h)) = request.pixel_window() else {
            return Ok(Vec::new());
        };
        let crop = crop_imm(request.image.as_ref(), x, y, w, h).to_image();

        let file = tempfile::Builder::new()
            .prefix("pdfir-ocr-")
            .suffix(".png")
            .tempfile()?;
        crop.save_with_format(file.path(), ImageFormat::Png)?;

        let output = Command::new(&self.command)
            .arg(file.path())
            .args(self.args(request))
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    Error::backend(NAME, format!("executable '{}' not found", self.command))
                }
                _ => Error::backend(NAME, e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::backend(
                NAME,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let spans = parse_tsv(&tsv, (x as f64, y as f64), request.space);
        log::debug!("tesseract recognized {} lines", spans.len());
        Ok(spans)
    }
}

/// Parse Tesseract TSV output into one span per text line.
///
/// Word rows (level 5) are grouped by block, paragraph and line; the line
/// box is the union of its word boxes shifted by `offset`, and its
/// confidence the mean word confidence scaled to `0.0..=1.0`.
pub fn parse_tsv(tsv: &str, offset: (f64, f64), space: CoordinateSpace) -> Vec<OcrSpan> {
    struct Line {
        words: Vec<String>,
        bbox: BBox,
        confidence_sum: f64,
    }

    let mut lines: BTreeMap<(u32, u32, u32, u32), Line> = BTreeMap::new();
    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.splitn(12, '\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        let Ok(conf) = cols[10].trim().parse::<f64>() else {
            continue;
        };
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let nums: Vec<u32> = cols[1..10]
            .iter()
            .filter_map(|c| c.trim().parse().ok())
            .collect();
        let [page, block, par, line, _word, left, top, width, height] = nums[..] else {
            continue;
        };
        let bbox = BBox::from_xywh(
            left as f64 + offset.0,
            top as f64 + offset.1,
            width as f64,
            height as f64,
            space,
        );
        lines
            .entry((page, block, par, line))
            .and_modify(|l| {
                l.words.push(text.to_string());
                l.bbox = l.bbox.union(&bbox).unwrap_or(l.bbox);
                l.confidence_sum += conf;
            })
            .or_insert_with(|| Line {
                words: vec![text.to_string()],
                bbox,
                confidence_sum: conf,
            });
    }

    lines
        .into_values()
        .map(|l| {
            let confidence = l.confidence_sum / l.words.len() as f64 / 100.0;
            OcrSpan::new(l.words.join(" "), l.bbox, confidence.clamp(0.0, 1.0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::LanguageHints;
    use image::GrayImage;
    use std::sync::Arc;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t2550\t3300\t-1\t
4\t1\t1\t1\t1\t0\t400\t1500\t500\t100\t-1\t
5\t1\t1\t1\t1\t1\t400\t1500\t200\t100\t96.5\tTotal:
5\t1\t1\t1\t1\t2\t650\t1510\t250\t90\t91.5\t$100
5\t1\t1\t1\t2\t1\t400\t1700\t100\t80\t-1\t
5\t1\t1\t1\t2\t2\t520\t1700\t100\t80\t88\t
5\t1\t2\t1\t1\t1\t100\t100\t50\t40\t70\tHeader
";

    #[test]
    fn test_parse_tsv_groups_lines() {
        let spans = parse_tsv(TSV, (0.0, 0.0), CoordinateSpace::Raster);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Total: $100");
        assert_eq!(spans[0].bbox.to_array(), [400.0, 1500.0, 900.0, 1600.0]);
        assert!((spans[0].confidence - 0.94).abs() < 1e-9);
        assert_eq!(spans[1].text, "Header");
    }

    #[test]
    fn test_parse_tsv_offset_and_space() {
        let spans = parse_tsv(TSV, (10.0, 20.0), CoordinateSpace::Preprocessed);
        assert_eq!(spans[1].bbox.to_array(), [110.0, 120.0, 160.0, 160.0]);
        assert_eq!(spans[1].bbox.space, CoordinateSpace::Preprocessed);
    }

    #[test]
    fn test_parse_tsv_garbage() {
        assert!(parse_tsv("", (0.0, 0.0), CoordinateSpace::Raster).is_empty());
        assert!(parse_tsv("header\nnot\ta\trow", (0.0, 0.0), CoordinateSpace::Raster).is_empty());
    }

    #[test]
    fn test_args() {
        let backend = TesseractBackend::new("tesseract").with_psm(6);
        let request = OcrRequest::new(Arc::new(GrayImage::new(4, 4)), CoordinateSpace::Raster)
            .with_hints(LanguageHints::new(["eng", "fra"]));
        assert_eq!(
            backend.args(&request),
            vec!["stdout", "-l", "eng+fra", "--psm", "6", "tsv"]
        );
    }

    #[test]
    fn test_missing_executable_is_backend_error() {
        let backend = TesseractBackend::new("pdfir-no-such-tesseract");
        let request = OcrRequest::new(Arc::new(GrayImage::new(4, 4)), CoordinateSpace::Raster);
        let err = backend.recognize(&request).unwrap_err();
        assert!(err.is_backend_failure());
    }
}
