//! Recording mock of the native engine.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use ndbuf_core::{AllocationRequest, EngineError, NativeEngine, NativeHandle};

/// Records allocate/free calls without touching real memory.
///
/// Freeing a handle that is not live returns `UnknownHandle` and bumps
/// [`double_frees`](MockEngine::double_frees), so tests can assert that
/// no path ever frees twice.
#[derive(Debug, Default)]
pub struct MockEngine {
    next: AtomicU64,
    live: Mutex<HashSet<u64>>,
    allocations: AtomicUsize,
    frees: AtomicUsize,
    double_frees: AtomicUsize,
    /// Fail every allocation once this many have succeeded.
    fail_after: Mutex<Option<usize>>,
    /// Fail every `free` call.
    fail_frees: Mutex<bool>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more allocations succeed, then fail the rest.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(self.allocations() + n);
    }

    /// Stop failing allocations.
    pub fn heal(&self) {
        *self.fail_after.lock() = None;
    }

    /// Make `free` fail (the handle is still forgotten).
    pub fn fail_frees(&self, fail: bool) {
        *self.fail_frees.lock() = fail;
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    pub fn double_frees(&self) -> usize {
        self.double_frees.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, handle: NativeHandle) -> bool {
        self.live.lock().contains(&handle.raw())
    }
}

impl NativeEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn allocate(&self, request: &AllocationRequest) -> Result<NativeHandle, EngineError> {
        let bytes = request
            .byte_len()
            .ok_or(EngineError::InvalidSize { len: request.len })?;
        if let Some(limit) = *self.fail_after.lock() {
            if self.allocations() >= limit {
                return Err(EngineError::OutOfMemory {
                    requested: bytes,
                    available: Some(0),
                });
            }
        }
        let raw = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.lock().insert(raw);
        self.allocations.fetch_add(1, Ordering::SeqCst);
        NativeHandle::new(raw).ok_or(EngineError::Backend {
            reason: "handle counter wrapped".into(),
        })
    }

    fn free(&self, handle: NativeHandle) -> Result<(), EngineError> {
        if !self.live.lock().remove(&handle.raw()) {
            self.double_frees.fetch_add(1, Ordering::SeqCst);
            return Err(EngineError::UnknownHandle { raw: handle.raw() });
        }
        self.frees.fetch_add(1, Ordering::SeqCst);
        if *self.fail_frees.lock() {
            return Err(EngineError::Backend {
                reason: "injected free failure".into(),
            });
        }
        Ok(())
    }
}
