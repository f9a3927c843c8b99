//! Caller-side OCR policy: deadlines, fallback and confidence filtering.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};

use super::{mean_confidence, BackendKind, BackendLimiters, LanguageHints, OcrRegistry, OcrRequest, OcrSpan};
use crate::config::OcrConfig;
use crate::error::{Error, Result};

/// Result of running one region through the backends.
#[derive(Debug, Clone, Default)]
pub struct RegionOutcome {
    /// Spans that passed the confidence floor, in request space
    pub spans: Vec<OcrSpan>,
    /// Backend whose result was used
    pub backend: Option<String>,
    pub fallback_used: bool,
    /// Every backend failed; the region contributes no spans
    pub degraded: bool,
    /// Spans dropped by the confidence floor
    pub low_confidence: usize,
    /// Failure messages, one per failed call
    pub errors: Vec<String>,
}

/// Runs OCR requests against the configured backends.
#[derive(Debug, Clone)]
pub struct OcrRunner {
    registry: Arc<OcrRegistry>,
    limiters: BackendLimiters,
    primary: BackendKind,
    fallback: Option<BackendKind>,
    timeout: Option<Duration>,
    min_confidence: f64,
    confidence_floor: f64,
    hints: LanguageHints,
}

impl OcrRunner {
    pub fn new(config: &OcrConfig, registry: Arc<OcrRegistry>) -> Self {
        Self {
            registry,
            limiters: BackendLimiters::new(config.max_concurrent),
            primary: config.primary,
            fallback: config.fallback.filter(|f| *f != config.primary),
            timeout: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
            min_confidence: (config.min_confidence / 100.0).clamp(0.0, 1.0),
            confidence_floor: (config.span_confidence_floor / 100.0).clamp(0.0, 1.0),
            hints: LanguageHints::new(config.languages.iter().cloned()),
        }
    }

    /// Share admission limits with other runners.
    pub fn with_limiters(mut self, limiters: BackendLimiters) -> Self {
        self.limiters = limiters;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn hints(&self) -> &LanguageHints {
        &self.hints
    }

    pub fn limiters(&self) -> &BackendLimiters {
        &self.limiters
    }

    /// One backend call under the backend's limiter and the deadline.
    ///
    /// Waiting for a slot counts against the deadline. The call runs on its
    /// own thread, which keeps the permit until the backend actually
    /// returns, even after the deadline has passed.
    pub fn call(&self, kind: BackendKind, request: &Arc<OcrRequest>) -> Result<Vec<OcrSpan>> {
        let backend = self.registry.require(kind)?;
        let name = backend.name().to_string();
        let limiter = self.limiters.get(kind);
        let deadline = self.timeout.map(|t| (t, Instant::now() + t));
        let permit = match deadline {
            Some((timeout, _)) => match limiter.acquire_timeout(timeout) {
                Some(permit) => permit,
                None => {
                    return Err(Error::OcrTimeout {
                        backend: name,
                        timeout,
                    })
                }
            },
            None => limiter.acquire(),
        };

        let (tx, rx) = bounded(1);
        let request = Arc::clone(request);
        thread::Builder::new()
            .name(format!("ocr-{}", name))
            .spawn(move || {
                let result = backend.recognize(&request);
                drop(permit);
                let _ = tx.send(result);
            })?;

        let received = match deadline {
            Some((_, at)) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(result) => result.map_err(|e| match e {
                e @ (Error::OcrBackend { .. } | Error::OcrTimeout { .. }) => e,
                other => Error::backend(&name, other.to_string()),
            }),
            Err(RecvTimeoutError::Timeout) => Err(Error::OcrTimeout {
                backend: name,
                timeout: self.timeout.unwrap_or_default(),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::backend(name, "backend call ended without a result"))
            }
        }
    }

    /// Recognize a region with fallback.
    ///
    /// The secondary backend runs when the primary fails or its mean
    /// confidence is below the minimum; a low-confidence primary result is
    /// replaced only if the secondary does better.
    pub fn run(&self, request: OcrRequest) -> RegionOutcome {
        let mut request = request;
        if request.hints.is_empty() {
            request.hints = self.hints.clone();
        }
        let request = Arc::new(request);
        let mut outcome = RegionOutcome::default();

        let mut chosen: Option<(BackendKind, Vec<OcrSpan>)> = None;
        match self.call(self.primary, &request) {
            Ok(spans) => chosen = Some((self.primary, spans)),
            Err(e) => {
                log::warn!("primary OCR backend {} failed: {}", self.primary, e);
                outcome.errors.push(e.to_string());
            }
        }

        let primary_confidence = chosen
            .as_ref()
            .and_then(|(_, spans)| mean_confidence(spans));
        let needs_fallback = match (&chosen, primary_confidence) {
            (None, _) => true,
            (Some(_), Some(conf)) => conf < self.min_confidence,
            (Some(_), None) => false,
        };

        if let (true, Some(fallback)) = (needs_fallback, self.fallback) {
            match self.call(fallback, &request) {
                Ok(spans) => {
                    let better = match (primary_confidence, mean_confidence(&spans)) {
                        _ if chosen.is_none() => true,
                        (Some(p), Some(f)) => f > p,
                        _ => false,
                    };
                    if better {
                        log::debug!("using fallback OCR backend {}", fallback);
                        chosen = Some((fallback, spans));
                        outcome.fallback_used = true;
                    }
                }
                Err(e) => {
                    log::warn!("fallback OCR backend {} failed: {}", fallback, e);
                    outcome.errors.push(e.to_string());
                }
            }
        }

        match chosen {
            Some((kind, spans)) => {
                let before = spans.len();
                outcome.spans = spans
                    .into_iter()
                    .filter(|s| s.confidence >= self.confidence_floor && !s.text.trim().is_empty())
                    .collect();
                outcome.low_confidence = before - outcome.spans.len();
                outcome.backend = self.registry.get(kind).map(|b| b.name().to_string());
            }
            None => outcome.degraded = true,
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, CoordinateSpace};
    use crate::ocr::OcrBackend;
    use image::GrayImage;

    struct Mock {
        name: &'static str,
        confidence: f64,
        fail: bool,
        delay: Duration,
    }

    impl Mock {
        fn ok(name: &'static str, confidence: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                confidence,
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                confidence: 0.0,
                fail: true,
                delay: Duration::ZERO,
            })
        }
    }

    impl OcrBackend for Mock {
        fn name(&self) -> &str {
            self.name
        }

        fn recognize(&self, request: &OcrRequest) -> Result<Vec<OcrSpan>> {
            thread::sleep(self.delay);
            if self.fail {
                return Err(Error::backend(self.name, "service unavailable"));
            }
            Ok(vec![OcrSpan::new(
                self.name,
                BBox::new(0.0, 0.0, 10.0, 10.0, request.space),
                self.confidence,
            )])
        }
    }

    fn request() -> OcrRequest {
        OcrRequest::new(Arc::new(GrayImage::new(20, 20)), CoordinateSpace::Raster)
    }

    fn runner(registry: OcrRegistry, fallback: Option<BackendKind>) -> OcrRunner {
        let config = OcrConfig {
            primary: BackendKind::DocumentAi,
            fallback,
            ..Default::default()
        };
        OcrRunner::new(&config, Arc::new(registry))
    }

    #[test]
    fn test_primary_success() {
        let mut registry = OcrRegistry::new();
        registry.register(BackendKind::DocumentAi, Mock::ok("docai", 0.95));
        let outcome = runner(registry, None).run(request());
        assert_eq!(outcome.spans.len(), 1);
        assert_eq!(outcome.backend.as_deref(), Some("docai"));
        assert!(!outcome.fallback_used && !outcome.degraded);
    }

    #[test]
    fn test_fallback_on_failure() {
        let mut registry = OcrRegistry::new();
        registry.register(BackendKind::DocumentAi, Mock::failing("docai"));
        registry.register(BackendKind::Tesseract, Mock::ok("tess", 0.8));
        let outcome = runner(registry, Some(BackendKind::Tesseract)).run(request());
        assert!(outcome.fallback_used);
        assert_eq!(outcome.spans[0].text, "tess");
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_fallback_on_low_confidence_keeps_better() {
        let mut registry = OcrRegistry::new();
        registry.register(BackendKind::DocumentAi, Mock::ok("docai", 0.3));
        registry.register(BackendKind::Tesseract, Mock::ok("tess", 0.2));
        let outcome = runner(registry, Some(BackendKind::Tesseract)).run(request());
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.spans[0].text, "docai");

        let mut registry = OcrRegistry::new();
        registry.register(BackendKind::DocumentAi, Mock::ok("docai", 0.3));
        registry.register(BackendKind::Tesseract, Mock::ok("tess", 0.9));
        let outcome = runner(registry, Some(BackendKind::Tesseract)).run(request());
        assert!(outcome.fallback_used);
        assert_eq!(outcome.spans[0].text, "tess");
    }

    #[test]
    fn test_all_backends_exhausted() {
        let mut registry = OcrRegistry::new();
        registry.register(BackendKind::DocumentAi, Mock::failing("docai"));
        let outcome = runner(registry, Some(BackendKind::VisionApi)).run(request());
        assert!(outcome.degraded);
        assert!(outcome.spans.is_empty());
        // Unregistered fallback counts as a failed call.
        assert_eq!(outcome.errors.len(), 2);
    }

    #[test]
    fn test_timeout_is_backend_failure() {
        let mut registry = OcrRegistry::new();
        registry.register(
            BackendKind::DocumentAi,
            Arc::new(Mock {
                name: "slow",
                confidence: 0.9,
                fail: false,
                delay: Duration::from_millis(300),
            }),
        );
        let runner = runner(registry, None).with_timeout(Some(Duration::from_millis(20)));
        let err = runner
            .call(BackendKind::DocumentAi, &Arc::new(request()))
            .unwrap_err();
        assert!(matches!(err, Error::OcrTimeout { .. }));
        assert!(err.is_backend_failure());
        // The abandoned call still holds its permit.
        let limiter = runner.limiters().get(BackendKind::DocumentAi);
        assert!(limiter.available() < limiter.capacity());
    }

    #[test]
    fn test_stalled_primary_does_not_starve_fallback() {
        let mut registry = OcrRegistry::new();
        registry.register(
            BackendKind::DocumentAi,
            Arc::new(Mock {
                name: "stalled",
                confidence: 0.9,
                fail: false,
                delay: Duration::from_secs(5),
            }),
        );
        registry.register(BackendKind::Tesseract, Mock::ok("tess", 0.8));
        let config = OcrConfig {
            primary: BackendKind::DocumentAi,
            fallback: Some(BackendKind::Tesseract),
            max_concurrent: 1,
            ..Default::default()
        };
        let runner = OcrRunner::new(&config, Arc::new(registry))
            .with_timeout(Some(Duration::from_millis(50)));

        let started = Instant::now();
        let first = runner.run(request());
        assert_eq!(first.spans[0].text, "tess");

        // The stalled call still holds the only primary slot; waiting for
        // it is bounded by the same deadline.
        let second = runner.run(request());
        assert!(second.fallback_used);
        assert!(second.errors[0].contains("stalled"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_confidence_floor() {
        let mut registry = OcrRegistry::new();
        registry.register(BackendKind::DocumentAi, Mock::ok("docai", 0.4));
        let config = OcrConfig {
            primary: BackendKind::DocumentAi,
            span_confidence_floor: 50.0,
            ..Default::default()
        };
        let outcome = OcrRunner::new(&config, Arc::new(registry)).run(request());
        assert!(outcome.spans.is_empty());
        assert_eq!(outcome.low_confidence, 1);
        assert!(!outcome.degraded);
    }

    #[test]
    fn test_default_hints_applied() {
        let runner = runner(OcrRegistry::new(), None);
        assert_eq!(runner.hints().joined(), "eng");
    }
}
