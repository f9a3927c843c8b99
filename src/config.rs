//! Pipeline configuration.
//!
//! A [`Config`] is a plain value passed into every component. It can be built
//! from a [`Preset`], adjusted with `with_*` builders, or loaded from YAML
//! where file values override the preset key by key.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assemble::ReadingOrder;
use crate::error::{Error, Result};
use crate::mask::MaskStrategy;
use crate::ocr::BackendKind;
use crate::preprocess::DeskewMethod;

/// Named configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Balanced settings for local Tesseract OCR.
    #[default]
    Default,
    /// Higher DPI, finer deskew search, stricter confidence.
    HighQuality,
    /// Lower DPI, no deskew, no fallback.
    Fast,
    /// Cloud OCR primary with local Tesseract fallback.
    Cloud,
}

impl std::str::FromStr for Preset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Preset::Default),
            "high_quality" | "hq" => Ok(Preset::HighQuality),
            "fast" => Ok(Preset::Fast),
            "cloud" => Ok(Preset::Cloud),
            other => Err(Error::Config(format!("unknown preset '{}'", other))),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub render: RenderConfig,
    pub detection: DetectionConfig,
    pub masking: MaskingConfig,
    pub preprocessing: PreprocessConfig,
    pub ocr: OcrConfig,
    pub layout: LayoutConfig,
    /// Which pages to process
    pub pages: PageSelection,
}

/// Worker and failure policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on concurrently processed pages
    pub max_workers: usize,
    /// Process pages in parallel
    pub parallel: bool,
    /// Stop admitting pages after the first failed page
    pub fail_fast: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            parallel: true,
            fail_fast: false,
        }
    }
}

/// Rasterization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Render resolution in dots per inch
    pub dpi: u32,
    /// Pixel budget per page; DPI is lowered to fit (0 = unlimited)
    pub max_pixels: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_pixels: 40_000_000,
        }
    }
}

/// Page classification thresholds (fractions of page area).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Vector coverage at or above which a page counts as text-bearing
    pub vector_coverage_high: f64,
    /// Vector coverage at or below which vector text is ignored
    pub vector_coverage_negligible: f64,
    /// Image coverage at or above which a page counts as scanned
    pub image_coverage_high: f64,
    /// Image coverage at or below which images are ignored
    pub image_coverage_negligible: f64,
    /// Treat a garbled text layer as absent
    pub quality_gate: bool,
    /// Minimum extracted characters before the quality gate applies
    pub min_text_length: usize,
    /// Quality score below which the text layer is considered garbage
    pub quality_score_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            vector_coverage_high: 0.02,
            vector_coverage_negligible: 0.01,
            image_coverage_high: 0.30,
            image_coverage_negligible: 0.05,
            quality_gate: true,
            min_text_length: 100,
            quality_score_threshold: 0.6,
        }
    }
}

/// Trusted masking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    pub enabled: bool,
    /// Minimum span trust score for its box to be masked
    pub trust_threshold: f64,
    /// Mask expansion in raster pixels
    pub expansion_px: f64,
    /// Covered fraction at which an OCR span is suppressed
    pub overlap_threshold: f64,
    pub strategy: MaskStrategy,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_threshold: 0.75,
            expansion_px: 2.0,
            overlap_threshold: 0.5,
            strategy: MaskStrategy::Filter,
        }
    }
}

/// Raster preprocessing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub deskew: DeskewConfig,
}

/// Skew detection and correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskewConfig {
    pub method: DeskewMethod,
    /// Largest angle searched, in degrees
    pub max_angle: f64,
    /// Search step for the projection method, in degrees
    pub angle_resolution: f64,
    /// Angles smaller than this are left uncorrected
    pub min_angle: f64,
}

impl Default for DeskewConfig {
    fn default() -> Self {
        Self {
            method: DeskewMethod::Projection,
            max_angle: 5.0,
            angle_resolution: 0.2,
            min_angle: 0.1,
        }
    }
}

/// OCR backend selection and call policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub primary: BackendKind,
    pub fallback: Option<BackendKind>,
    /// Language codes passed to the backend (Tesseract style, e.g. `eng`)
    pub languages: Vec<String>,
    /// Mean confidence (0-100) below which the fallback is tried
    pub min_confidence: f64,
    /// Spans below this confidence (0-100) are discarded
    pub span_confidence_floor: f64,
    /// Deadline per backend call in seconds
    pub timeout_secs: u64,
    /// Concurrent backend calls across all page workers
    pub max_concurrent: usize,
    /// Tesseract executable
    pub tesseract_cmd: String,
    /// Tesseract page segmentation mode
    pub tesseract_psm: u8,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            primary: BackendKind::Tesseract,
            fallback: None,
            languages: vec!["eng".to_string()],
            min_confidence: 60.0,
            span_confidence_floor: 0.0,
            timeout_secs: 120,
            max_concurrent: 4,
            tesseract_cmd: "tesseract".to_string(),
            tesseract_psm: 3,
        }
    }
}

/// Span grouping and reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub reading_order: ReadingOrder,
    /// Fraction of an OCR span covered by vector text at which it is dropped
    pub conflict_overlap: f64,
    /// Minimum horizontal whitespace band (points) for an XY-cut row split
    pub min_row_gap: f64,
    /// Minimum vertical whitespace band (points) for an XY-cut column split
    pub min_col_gap: f64,
    /// Top and bottom fraction of the page treated as header/footer zones
    pub region_ratio: f64,
    /// Font size ratio to body text at which a block is a heading
    pub heading_ratio: f64,
    /// Horizontal gap, in multiples of line height, that splits a line
    pub word_gap_factor: f64,
    /// Vertical gap, in multiples of line height, that splits a block
    pub line_gap_factor: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            reading_order: ReadingOrder::XyCut,
            conflict_overlap: 0.8,
            min_row_gap: 2.0,
            min_col_gap: 5.0,
            region_ratio: 0.1,
            heading_ratio: 1.2,
            word_gap_factor: 3.0,
            line_gap_factor: 1.0,
        }
    }
}

impl Config {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a named preset.
    pub fn from_preset(preset: Preset) -> Self {
        let mut config = Self::default();
        match preset {
            Preset::Default => {}
            Preset::HighQuality => {
                config.render.dpi = 400;
                config.render.max_pixels = 80_000_000;
                config.preprocessing.deskew.angle_resolution = 0.05;
                config.ocr.min_confidence = 70.0;
                config.masking.expansion_px = 3.0;
            }
            Preset::Fast => {
                config.render.dpi = 200;
                config.preprocessing.deskew.method = DeskewMethod::None;
                config.ocr.fallback = None;
                config.ocr.timeout_secs = 60;
                config.masking.strategy = MaskStrategy::Blank;
            }
            Preset::Cloud => {
                config.ocr.primary = BackendKind::DocumentAi;
                config.ocr.fallback = Some(BackendKind::Tesseract);
                config.ocr.max_concurrent = 8;
                config.ocr.timeout_secs = 60;
            }
        }
        config
    }

    /// Parse a YAML document; missing keys take default values.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file; missing keys take default values.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Start from `preset` and overlay the YAML file at `path`, if any.
    pub fn load(preset: Preset, path: Option<&Path>) -> Result<Self> {
        let base = Self::from_preset(preset);
        let Some(path) = path else {
            base.validate()?;
            return Ok(base);
        };
        let text = std::fs::read_to_string(path)?;
        base.merge_yaml(&text)
    }

    /// Overlay a YAML document on this configuration.
    pub fn merge_yaml(&self, yaml: &str) -> Result<Self> {
        let mut base = serde_yaml::to_value(self)?;
        let overlay: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        merge_values(&mut base, overlay);
        let config: Config = serde_yaml::from_value(base)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values outside their valid range.
    pub fn validate(&self) -> Result<()> {
        if self.render.dpi == 0 {
            return Err(Error::Config("render.dpi must be positive".into()));
        }
        if self.runtime.max_workers == 0 {
            return Err(Error::Config("runtime.max_workers must be positive".into()));
        }
        if self.ocr.max_concurrent == 0 {
            return Err(Error::Config("ocr.max_concurrent must be positive".into()));
        }
        if self.ocr.timeout_secs == 0 {
            return Err(Error::Config("ocr.timeout_secs must be positive".into()));
        }
        if self.ocr.languages.is_empty() {
            return Err(Error::Config("ocr.languages must not be empty".into()));
        }
        for (name, value) in [
            ("ocr.min_confidence", self.ocr.min_confidence),
            ("ocr.span_confidence_floor", self.ocr.span_confidence_floor),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within 0-100", name)));
            }
        }
        for (name, value) in [
            ("detection.vector_coverage_high", self.detection.vector_coverage_high),
            (
                "detection.vector_coverage_negligible",
                self.detection.vector_coverage_negligible,
            ),
            ("detection.image_coverage_high", self.detection.image_coverage_high),
            (
                "detection.image_coverage_negligible",
                self.detection.image_coverage_negligible,
            ),
            (
                "detection.quality_score_threshold",
                self.detection.quality_score_threshold,
            ),
            ("masking.trust_threshold", self.masking.trust_threshold),
            ("masking.overlap_threshold", self.masking.overlap_threshold),
            ("layout.conflict_overlap", self.layout.conflict_overlap),
            ("layout.region_ratio", self.layout.region_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within 0-1", name)));
            }
        }
        if self.masking.expansion_px < 0.0 {
            return Err(Error::Config("masking.expansion_px must not be negative".into()));
        }
        let deskew = &self.preprocessing.deskew;
        if deskew.max_angle < 0.0 || deskew.min_angle < 0.0 {
            return Err(Error::Config("deskew angles must not be negative".into()));
        }
        if deskew.method == DeskewMethod::Projection && deskew.angle_resolution <= 0.0 {
            return Err(Error::Config(
                "preprocessing.deskew.angle_resolution must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Set render DPI.
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.render.dpi = dpi;
        self
    }

    /// Set the worker limit.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.runtime.max_workers = workers;
        self
    }

    /// Process pages one at a time on the calling thread's worker.
    pub fn sequential(mut self) -> Self {
        self.runtime.parallel = false;
        self
    }

    /// Stop after the first failed page.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.runtime.fail_fast = fail_fast;
        self
    }

    /// Set the primary OCR backend.
    pub fn with_primary_backend(mut self, kind: BackendKind) -> Self {
        self.ocr.primary = kind;
        self
    }

    /// Set the fallback OCR backend.
    pub fn with_fallback_backend(mut self, kind: BackendKind) -> Self {
        self.ocr.fallback = Some(kind);
        self
    }

    /// Set OCR languages.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ocr.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-call OCR deadline.
    pub fn with_ocr_timeout(mut self, secs: u64) -> Self {
        self.ocr.timeout_secs = secs;
        self
    }

    /// Set the deskew method.
    pub fn with_deskew(mut self, method: DeskewMethod) -> Self {
        self.preprocessing.deskew.method = method;
        self
    }

    /// Set the mask strategy.
    pub fn with_mask_strategy(mut self, strategy: MaskStrategy) -> Self {
        self.masking.strategy = strategy;
        self
    }

    /// Set the reading order algorithm.
    pub fn with_reading_order(mut self, order: ReadingOrder) -> Self {
        self.layout.reading_order = order;
        self
    }

    /// Set page selection.
    pub fn with_pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }
}

/// Recursively overlay `overlay` onto `base`; mappings merge, everything
/// else replaces.
fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Page selection (1-indexed page numbers).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PageSelection {
    /// All pages
    #[default]
    All,
    /// An inclusive range of pages
    Range(RangeInclusive<u32>),
    /// Specific pages, sorted and deduplicated
    Pages(Vec<u32>),
}

impl PageSelection {
    /// Check if a page number should be included.
    pub fn includes(&self, page: u32) -> bool {
        match self {
            PageSelection::All => true,
            PageSelection::Range(range) => range.contains(&page),
            PageSelection::Pages(pages) => pages.binary_search(&page).is_ok(),
        }
    }

    /// Parse a selection string such as `all`, `1-10` or `1,3,5-7`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }

        let number = |part: &str| -> Result<u32> {
            part.trim()
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("invalid page number '{}'", part.trim())))
        };

        if !s.contains(',') {
            if let Some((start, end)) = s.split_once('-') {
                return Ok(PageSelection::Range(number(start)?..=number(end)?));
            }
        }

        let mut pages = Vec::new();
        for part in s.split(',') {
            match part.split_once('-') {
                Some((start, end)) => pages.extend(number(start)?..=number(end)?),
                None => pages.push(number(part)?),
            }
        }
        pages.sort_unstable();
        pages.dedup();
        Ok(PageSelection::Pages(pages))
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSelection::All => f.write_str("all"),
            PageSelection::Range(range) => write!(f, "{}-{}", range.start(), range.end()),
            PageSelection::Pages(pages) => {
                let parts: Vec<String> = pages.iter().map(|p| p.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

impl TryFrom<String> for PageSelection {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        PageSelection::parse(&value)
    }
}

impl From<PageSelection> for String {
    fn from(value: PageSelection) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.dpi, 300);
        assert_eq!(config.detection.image_coverage_high, 0.30);
        assert_eq!(config.masking.overlap_threshold, 0.5);
        assert_eq!(config.layout.conflict_overlap, 0.8);
    }

    #[test]
    fn test_presets() {
        for preset in [Preset::Default, Preset::HighQuality, Preset::Fast, Preset::Cloud] {
            assert!(Config::from_preset(preset).validate().is_ok());
        }
        assert_eq!(Config::from_preset(Preset::HighQuality).render.dpi, 400);
        assert_eq!(
            Config::from_preset(Preset::Fast).preprocessing.deskew.method,
            DeskewMethod::None
        );
        let cloud = Config::from_preset(Preset::Cloud);
        assert_eq!(cloud.ocr.primary, BackendKind::DocumentAi);
        assert_eq!(cloud.ocr.fallback, Some(BackendKind::Tesseract));
        assert_eq!("high-quality".parse::<Preset>().unwrap(), Preset::HighQuality);
        assert!("turbo".parse::<Preset>().is_err());
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .with_dpi(150)
            .with_max_workers(2)
            .sequential()
            .with_fallback_backend(BackendKind::VisionApi)
            .with_languages(["eng", "deu"]);
        assert_eq!(config.render.dpi, 150);
        assert_eq!(config.runtime.max_workers, 2);
        assert!(!config.runtime.parallel);
        assert_eq!(config.ocr.fallback, Some(BackendKind::VisionApi));
        assert_eq!(config.ocr.languages, vec!["eng", "deu"]);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(Config::new().with_dpi(0).validate().is_err());
        assert!(Config::new().with_max_workers(0).validate().is_err());

        let mut config = Config::new();
        config.ocr.min_confidence = 150.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::new();
        config.masking.overlap_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::from_yaml_str("render:\n  dpi: 150\npages: \"2-4\"\n").unwrap();
        assert_eq!(config.render.dpi, 150);
        assert_eq!(config.render.max_pixels, RenderConfig::default().max_pixels);
        assert_eq!(config.pages, PageSelection::Range(2..=4));
    }

    #[test]
    fn test_yaml_overrides_preset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ocr:\n  timeout_secs: 5\nlayout:\n  reading_order: simple").unwrap();

        let config = Config::load(Preset::Cloud, Some(file.path())).unwrap();
        assert_eq!(config.ocr.timeout_secs, 5);
        // Untouched preset values survive the merge.
        assert_eq!(config.ocr.primary, BackendKind::DocumentAi);
        assert_eq!(config.ocr.max_concurrent, 8);
        assert_eq!(config.layout.reading_order, ReadingOrder::Simple);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::from_preset(Preset::Fast).with_pages(PageSelection::Pages(vec![1, 3]));
        let yaml = config.to_yaml().unwrap();
        let back = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_page_selection_includes() {
        let range = PageSelection::Range(5..=10);
        assert!(!range.includes(4));
        assert!(range.includes(10));
        let pages = PageSelection::Pages(vec![1, 3, 5]);
        assert!(pages.includes(3));
        assert!(!pages.includes(2));
        assert!(PageSelection::All.includes(99));
    }

    #[test]
    fn test_page_selection_parse() {
        assert_eq!(PageSelection::parse("all").unwrap(), PageSelection::All);
        assert_eq!(PageSelection::parse("1-10").unwrap(), PageSelection::Range(1..=10));
        assert_eq!(
            PageSelection::parse("7-8,1,3,3").unwrap(),
            PageSelection::Pages(vec![1, 3, 7, 8])
        );
        assert!(PageSelection::parse("x-3").is_err());
        assert_eq!(PageSelection::Pages(vec![1, 2]).to_string(), "1,2");
    }
}
