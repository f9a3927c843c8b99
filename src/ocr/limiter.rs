//! Admission control for backend calls.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::BackendKind;

/// Bounded-concurrency semaphore shared by all page workers.
///
/// Permits are tokens in a bounded channel; a permit returns its token when
/// dropped, wherever that happens.
#[derive(Debug, Clone)]
pub struct OcrLimiter {
    release: Sender<()>,
    acquire: Receiver<()>,
    capacity: usize,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct OcrPermit {
    release: Sender<()>,
}

impl Drop for OcrPermit {
    fn drop(&mut self) {
        let _ = self.release.try_send(());
    }
}

impl OcrLimiter {
    /// Limiter admitting `capacity` concurrent calls (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (release, acquire) = bounded(capacity);
        for _ in 0..capacity {
            let _ = release.try_send(());
        }
        Self {
            release,
            acquire,
            capacity,
        }
    }

    /// Block until a slot is free.
    pub fn acquire(&self) -> OcrPermit {
        // Both channel ends live in `self`, so the channel cannot disconnect.
        let _ = self.acquire.recv();
        OcrPermit {
            release: self.release.clone(),
        }
    }

    /// Wait at most `timeout` for a slot.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<OcrPermit> {
        self.acquire.recv_timeout(timeout).ok().map(|_| OcrPermit {
            release: self.release.clone(),
        })
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> Option<OcrPermit> {
        self.acquire.try_recv().ok().map(|_| OcrPermit {
            release: self.release.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.acquire.len()
    }
}

/// One limiter per backend kind, so a stalled engine only holds its own
/// slots.
#[derive(Debug, Clone)]
pub struct BackendLimiters {
    /// Indexed by `BackendKind as usize`
    limiters: Vec<OcrLimiter>,
    capacity: usize,
}

impl BackendLimiters {
    /// Each backend admits `capacity` concurrent calls (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            limiters: BackendKind::ALL
                .iter()
                .map(|_| OcrLimiter::new(capacity))
                .collect(),
            capacity,
        }
    }

    pub fn get(&self, kind: BackendKind) -> &OcrLimiter {
        &self.limiters[kind as usize]
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_permits_return_on_drop() {
        let limiter = OcrLimiter::new(2);
        let a = limiter.acquire();
        let _b = limiter.acquire();
        assert_eq!(limiter.available(), 0);
        assert!(limiter.try_acquire().is_none());
        drop(a);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_acquire_timeout_expires_when_full() {
        let limiter = OcrLimiter::new(1);
        let held = limiter.acquire();
        assert!(limiter.acquire_timeout(Duration::from_millis(20)).is_none());
        drop(held);
        assert!(limiter.acquire_timeout(Duration::from_millis(20)).is_some());
    }

    #[test]
    fn test_backends_do_not_share_slots() {
        let limiters = BackendLimiters::new(1);
        let _held = limiters.get(BackendKind::DocumentAi).acquire();
        assert_eq!(limiters.get(BackendKind::DocumentAi).available(), 0);
        assert!(limiters.get(BackendKind::Tesseract).try_acquire().is_some());
        assert_eq!(limiters.capacity(), 1);
    }

    #[test]
    fn test_zero_capacity_admits_one() {
        let limiter = OcrLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_bounds_concurrency() {
        let limiter = OcrLimiter::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _permit = limiter.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.available(), 2);
    }
}
