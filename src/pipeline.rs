//! Page pipeline: detection, extraction, rendering, OCR and assembly.
//!
//! Pages are independent. Within a page the steps run strictly in order;
//! across pages they run on a bounded rayon pool, and finished pages are
//! handed to the caller as soon as each one completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;

use crate::assemble::{AssemblyInput, PageAssembler};
use crate::config::Config;
use crate::detect::{Classification, PageTypeDetector, PdfType};
use crate::error::{Error, Result};
use crate::extract::{PageContent, SourcePage};
use crate::geometry::{BBox, CoordinateSpace, TransformChain};
use crate::mask::{MaskStrategy, RegionSet, TrustedMasker};
use crate::model::{DocumentIR, Metadata, OcrStats, PageIR, Span};
use crate::ocr::{BackendKind, BackendLimiters, OcrBackend, OcrRegistry, OcrRequest, OcrRunner, OcrSpan};
use crate::preprocess::Deskewer;

/// Processes pages into [`PageIR`]s.
///
/// Cloning is cheap enough to hand a pipeline to another thread; clones
/// share the OCR backends and the per-backend admission limits.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    registry: Arc<OcrRegistry>,
    limiters: BackendLimiters,
    detector: PageTypeDetector,
    deskewer: Deskewer,
    assembler: PageAssembler,
}

impl Pipeline {
    /// Build a pipeline with the built-in backends registered.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(OcrRegistry::with_defaults(&config.ocr)),
            limiters: BackendLimiters::new(config.ocr.max_concurrent),
            detector: PageTypeDetector::new(config.detection.clone()),
            deskewer: Deskewer::new(config.preprocessing.deskew.clone()),
            assembler: PageAssembler::new(&config),
            config,
        })
    }

    /// Replace the backend registry.
    pub fn with_registry(mut self, registry: OcrRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Register (or replace) one backend.
    pub fn with_backend(mut self, kind: BackendKind, backend: Arc<dyn OcrBackend>) -> Self {
        Arc::make_mut(&mut self.registry).register(kind, backend);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &OcrRegistry {
        &self.registry
    }

    /// Process one page.
    ///
    /// Never fails: a page that cannot be processed comes back empty with
    /// its error recorded in the metadata.
    pub fn process_page<P: SourcePage + ?Sized>(&self, page: &P) -> PageIR {
        let number = page.number();
        let content = match page.extract() {
            Ok(content) => content,
            Err(e) => return failed_page(number, None, e),
        };
        let dims = (content.width, content.height, content.rotation);
        match self.build_page(page, content) {
            Ok(ir) => ir,
            Err(e) => failed_page(number, Some(dims), e),
        }
    }

    fn build_page<P: SourcePage + ?Sized>(&self, page: &P, mut content: PageContent) -> Result<PageIR> {
        let classification = self.detector.detect(&content);
        if self.text_layer_rejected(&classification) {
            log::debug!(
                "page {}: dropping {} vector spans from an unusable text layer",
                content.number,
                content.spans.len()
            );
            content.spans.clear();
        }

        // Only placed images are rendered, so a page without any has
        // nothing to read.
        if !classification.pdf_type.needs_ocr() || !content.has_images() {
            return self
                .assembler
                .assemble(AssemblyInput::new(content).with_classification(classification));
        }

        let raster = page.render(&content, &self.config.render)?;
        let dpi = raster.dpi;
        let mixed = classification.pdf_type == PdfType::Mixed;

        let masker = TrustedMasker::new(self.config.masking.clone(), dpi);
        let regions = if mixed {
            masker.mask(&content, &content.spans)
        } else {
            RegionSet::new(CoordinateSpace::Document)
        };

        let pre = self.deskewer.apply(raster)?;
        let space = pre.space();
        let chain = pre.chain;
        let mut image = pre.image;
        if mixed && masker.is_enabled() && masker.strategy() == MaskStrategy::Blank {
            let painted = masker.blank(&mut image, &regions, &chain)?;
            log::debug!("page {}: blanked {} trusted regions", content.number, painted);
        }
        let image = Arc::new(image);

        let runner = OcrRunner::new(&self.config.ocr, Arc::clone(&self.registry))
            .with_limiters(self.limiters.clone());
        let mut stats = OcrStats::default();
        let mut spans: Vec<Span> = Vec::new();
        for region in ocr_regions(&content, classification.pdf_type, &chain)? {
            let mut request = OcrRequest::new(Arc::clone(&image), space);
            if let Some(region) = region {
                request = request.with_region(region)?;
            }
            let outcome = runner.run(request);
            stats.regions += 1;
            if outcome.degraded {
                stats.failed_regions += 1;
            }
            stats.recognized += outcome.spans.len() + outcome.low_confidence;
            stats.low_confidence += outcome.low_confidence;
            stats.fallback_used |= outcome.fallback_used;
            if outcome.backend.is_some() {
                stats.backend = outcome.backend;
            }
            spans.extend(outcome.spans.into_iter().map(OcrSpan::into_span));
        }

        let degraded = stats.failed_regions > 0;
        if degraded {
            log::warn!(
                "page {}: OCR failed for {} of {} regions",
                content.number,
                stats.failed_regions,
                stats.regions
            );
        }

        let mut input = AssemblyInput::new(content)
            .with_classification(classification)
            .with_ocr(spans, chain)
            .with_dpi(dpi)
            .with_deskew_angle(pre.angle)
            .with_ocr_stats(stats)
            .degraded(degraded);
        if mixed {
            input = input.with_mask(regions);
        }
        self.assembler.assemble(input)
    }

    /// Whether the detector measured the text layer and found it unusable.
    fn text_layer_rejected(&self, classification: &Classification) -> bool {
        classification
            .text_quality
            .is_some_and(|q| q < self.config.detection.quality_score_threshold)
    }

    /// Process a page source, yielding pages as they complete.
    ///
    /// The source is consumed once, on a background thread. Pages are
    /// processed on a pool of `runtime.max_workers` threads (or one at a
    /// time when `runtime.parallel` is off) and arrive in completion order.
    /// With `runtime.fail_fast`, no new page is started after a page fails.
    /// Dropping the stream stops the run after the pages in flight.
    pub fn process<S, P>(&self, source: S) -> Result<PageStream>
    where
        S: IntoIterator<Item = Result<P>>,
        S::IntoIter: Send + 'static,
        P: SourcePage + 'static,
    {
        let workers = self.config.runtime.max_workers.max(1);
        let parallel = self.config.runtime.parallel && workers > 1;
        let (tx, rx) = bounded(workers * 2);
        let pipeline = self.clone();
        let pages = source.into_iter();

        let handle = thread::Builder::new()
            .name("pdfir-pages".to_string())
            .spawn(move || {
                let stop = AtomicBool::new(false);
                if parallel {
                    match rayon::ThreadPoolBuilder::new()
                        .num_threads(workers)
                        .thread_name(|i| format!("pdfir-worker-{}", i))
                        .build()
                    {
                        Ok(pool) => {
                            pool.install(|| {
                                pages
                                    .par_bridge()
                                    .for_each(|item| pipeline.run_item(item, &tx, &stop))
                            });
                            return;
                        }
                        Err(e) => log::warn!("worker pool unavailable, running sequentially: {}", e),
                    }
                }
                for item in pages {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    pipeline.run_item(item, &tx, &stop);
                }
            })?;

        Ok(PageStream {
            receiver: rx,
            handle: Some(handle),
        })
    }

    fn run_item<P: SourcePage>(&self, item: Result<P>, tx: &Sender<PageIR>, stop: &AtomicBool) {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let page = match item {
            Ok(page) if !self.config.pages.includes(page.number()) => return,
            Ok(page) => self.process_page(&page),
            Err(e) => {
                let number = match &e {
                    Error::PageExtraction { page, .. } => *page,
                    _ => 0,
                };
                failed_page(number, None, e)
            }
        };
        if page.is_error() && self.config.runtime.fail_fast {
            log::warn!("page {} failed, not starting further pages", page.number);
            stop.store(true, Ordering::Relaxed);
        }
        if tx.send(page).is_err() {
            // Receiver gone.
            stop.store(true, Ordering::Relaxed);
        }
    }

    /// Process a whole source and collect the pages in page order.
    pub fn process_document<S, P>(&self, source: S, metadata: Metadata) -> Result<DocumentIR>
    where
        S: IntoIterator<Item = Result<P>>,
        S::IntoIter: Send + 'static,
        P: SourcePage + 'static,
    {
        let mut stream = self.process(source)?;
        let pages: Vec<PageIR> = stream.by_ref().collect();
        stream.join()?;
        let doc = DocumentIR::from_pages(metadata, pages);
        log::info!(
            "processed {} pages ({} failed, {} degraded)",
            doc.page_count(),
            doc.failed_pages().len(),
            doc.degraded_pages().len()
        );
        Ok(doc)
    }
}

/// Pages in completion order.
#[derive(Debug)]
pub struct PageStream {
    receiver: Receiver<PageIR>,
    handle: Option<JoinHandle<()>>,
}

impl PageStream {
    /// Wait for the producer thread after the stream is drained.
    pub fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Other("page worker panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Iterator for PageStream {
    type Item = PageIR;

    fn next(&mut self) -> Option<PageIR> {
        self.receiver.recv().ok()
    }
}

fn failed_page(number: u32, dims: Option<(f64, f64, u16)>, error: Error) -> PageIR {
    log::warn!("page {} failed: {}", number, error);
    let mut page = PageIR::failed(number, error.to_string());
    if let Some((width, height, rotation)) = dims {
        page.width = width;
        page.height = height;
        page.rotation = rotation;
    }
    page
}

/// Regions to OCR, in the chain's target space. `None` is the whole image.
///
/// SCANNED pages are read whole. MIXED pages are read where images were
/// placed, with overlapping placements merged so no pixel is read twice.
fn ocr_regions(
    content: &PageContent,
    pdf_type: PdfType,
    chain: &TransformChain,
) -> Result<Vec<Option<BBox>>> {
    if pdf_type != PdfType::Mixed {
        return Ok(vec![None]);
    }
    let page_box = content.page_box();
    let boxes: Vec<BBox> = content
        .images
        .iter()
        .filter_map(|placement| placement.bbox.clip(&page_box))
        .collect();
    merge_overlapping(boxes)
        .iter()
        .map(|b| chain.apply_bbox(b).map(Some))
        .collect()
}

fn merge_overlapping(boxes: Vec<BBox>) -> Vec<BBox> {
    let mut merged: Vec<BBox> = Vec::with_capacity(boxes.len());
    for bbox in boxes {
        let mut current = bbox;
        loop {
            let Some(pos) = merged.iter().position(|m| m.intersects(&current)) else {
                break;
            };
            let other = merged.swap_remove(pos);
            current = current.union(&other).unwrap_or(current);
        }
        merged.push(current);
    }
    merged
}
