//! Backend registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::{BackendKind, OcrBackend, TesseractBackend};
use crate::config::OcrConfig;
use crate::error::{Error, Result};

/// Maps configured backend kinds to engine instances.
///
/// Only Tesseract has a built-in engine; cloud backends are registered by
/// the caller with whatever client and credentials they use.
#[derive(Clone, Default)]
pub struct OcrRegistry {
    backends: HashMap<BackendKind, Arc<dyn OcrBackend>>,
}

impl OcrRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Tesseract backend.
    pub fn with_defaults(config: &OcrConfig) -> Self {
        let mut registry = Self::new();
        registry.register(
            BackendKind::Tesseract,
            Arc::new(TesseractBackend::from_config(config)),
        );
        registry
    }

    /// Register (or replace) the engine for `kind`.
    pub fn register(&mut self, kind: BackendKind, backend: Arc<dyn OcrBackend>) {
        log::debug!("registered OCR backend '{}' as {}", backend.name(), kind);
        self.backends.insert(kind, backend);
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn OcrBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// Engine for `kind`, or a backend error naming the missing kind.
    pub fn require(&self, kind: BackendKind) -> Result<Arc<dyn OcrBackend>> {
        self.get(kind)
            .ok_or_else(|| Error::backend(kind.name(), "no backend registered"))
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Registered kinds.
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }
}

impl std::fmt::Debug for OcrRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<(String, String)> = self
            .backends
            .iter()
            .map(|(k, b)| (k.to_string(), b.name().to_string()))
            .collect();
        entries.sort();
        f.debug_struct("OcrRegistry")
            .field("backends", &entries)
            .finish()
    }
}
