//! OCR fallback, deadline and admission behaviour seen through the pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::{GrayImage, Luma};

use pdfir::extract::MemoryPage;
use pdfir::{
    BBox, BackendKind, Config, CoordinateSpace, Error, OcrBackend, OcrRegistry, OcrRequest,
    OcrSpan, Pipeline, Result,
};

fn scanned(number: u32) -> MemoryPage {
    MemoryPage::new(number, 612.0, 792.0).with_image(
        BBox::new(0.0, 0.0, 612.0, 792.0, CoordinateSpace::Document),
        GrayImage::from_pixel(8, 8, Luma([255])),
    )
}

fn config() -> Config {
    Config::default()
        .with_dpi(72)
        .with_primary_backend(BackendKind::DocumentAi)
        .with_fallback_backend(BackendKind::Tesseract)
}

struct Engine {
    name: &'static str,
    text: &'static str,
    confidence: f64,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl Engine {
    fn new(name: &'static str, text: &'static str, confidence: f64) -> Self {
        Self {
            name,
            text,
            confidence,
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, "", 0.0)
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl OcrBackend for Engine {
    fn name(&self) -> &str {
        self.name
    }

    fn recognize(&self, request: &OcrRequest) -> Result<Vec<OcrSpan>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if self.fail {
            return Err(Error::backend(self.name, "503 service unavailable"));
        }
        Ok(vec![OcrSpan::new(
            self.text,
            BBox::new(72.0, 72.0, 300.0, 90.0, request.space),
            self.confidence,
        )])
    }
}

fn registry(primary: Engine, fallback: Engine) -> (OcrRegistry, Arc<Engine>, Arc<Engine>) {
    let primary = Arc::new(primary);
    let fallback = Arc::new(fallback);
    let mut registry = OcrRegistry::new();
    registry.register(BackendKind::DocumentAi, primary.clone());
    registry.register(BackendKind::Tesseract, fallback.clone());
    (registry, primary, fallback)
}

#[test]
fn test_primary_failure_falls_back() {
    let (registry, primary, fallback) =
        registry(Engine::failing("cloud"), Engine::new("local", "from fallback", 0.8));
    let ir = Pipeline::new(config())
        .unwrap()
        .with_registry(registry)
        .process_page(&scanned(1));

    assert_eq!(ir.plain_text(), "from fallback");
    assert!(ir.metadata.ocr.fallback_used);
    assert_eq!(ir.metadata.ocr.backend.as_deref(), Some("local"));
    assert!(!ir.metadata.degraded);
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_confident_primary_skips_fallback() {
    let (registry, _, fallback) =
        registry(Engine::new("cloud", "from primary", 0.95), Engine::new("local", "x", 0.99));
    let ir = Pipeline::new(config())
        .unwrap()
        .with_registry(registry)
        .process_page(&scanned(1));

    assert_eq!(ir.plain_text(), "from primary");
    assert!(!ir.metadata.ocr.fallback_used);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_low_confidence_primary_replaced_by_better_fallback() {
    let (registry, _, _) =
        registry(Engine::new("cloud", "blurry", 0.3), Engine::new("local", "sharp", 0.85));
    let ir = Pipeline::new(config())
        .unwrap()
        .with_registry(registry)
        .process_page(&scanned(1));
    assert_eq!(ir.plain_text(), "sharp");
    assert!(ir.metadata.ocr.fallback_used);
}

#[test]
fn test_timeout_counts_as_failure() {
    let mut config = config();
    config.ocr.timeout_secs = 1;
    let (registry, _, _) = registry(
        Engine::new("cloud", "too late", 0.99).slow(Duration::from_millis(1500)),
        Engine::new("local", "in time", 0.8),
    );
    let ir = Pipeline::new(config)
        .unwrap()
        .with_registry(registry)
        .process_page(&scanned(1));
    assert_eq!(ir.plain_text(), "in time");
    assert!(ir.metadata.ocr.fallback_used);
}

#[test]
fn test_all_backends_failing_degrades_not_fails() {
    let (registry, _, _) = registry(Engine::failing("cloud"), Engine::failing("local"));
    let ir = Pipeline::new(config())
        .unwrap()
        .with_registry(registry)
        .process_page(&scanned(7));
    assert!(!ir.is_error());
    assert!(ir.metadata.degraded);
    assert!(ir.blocks.is_empty());
    assert_eq!(ir.number, 7);
}

#[test]
fn test_hung_primary_bounded_by_deadline() {
    let mut config = config().sequential();
    config.ocr.timeout_secs = 1;
    config.ocr.max_concurrent = 1;
    let (registry, _, fallback) = registry(
        Engine::new("cloud", "never", 0.99).slow(Duration::from_secs(10)),
        Engine::new("local", "local", 0.8),
    );
    let pipeline = Pipeline::new(config).unwrap().with_registry(registry);

    let started = Instant::now();
    let first = pipeline.process_page(&scanned(1));
    // The hung call still holds the only cloud slot.
    let second = pipeline.process_page(&scanned(2));
    let elapsed = started.elapsed();

    assert_eq!(first.plain_text(), "local");
    assert_eq!(second.plain_text(), "local");
    assert!(second.metadata.ocr.fallback_used);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 2);
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
}

struct Counting {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl OcrBackend for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn recognize(&self, _request: &OcrRequest) -> Result<Vec<OcrSpan>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[test]
fn test_backend_calls_bounded_across_pages() {
    let backend = Arc::new(Counting {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut config = Config::default().with_dpi(72).with_max_workers(6);
    config.ocr.max_concurrent = 2;
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_backend(BackendKind::Tesseract, backend.clone());

    let pages: Vec<Result<MemoryPage>> = (1..=8).map(|n| Ok(scanned(n))).collect();
    let doc = pipeline
        .process_document(pages, pdfir::Metadata::default())
        .unwrap();

    assert_eq!(doc.page_count(), 8);
    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
}
