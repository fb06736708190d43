//! Heap-backed [`NativeEngine`] for host memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use ndbuf_core::{AllocationRequest, EngineError, MemoryKind, NativeEngine, NativeHandle};

/// Native engine that serves every request from the system heap.
///
/// Blocks are zero-initialised and keyed by an opaque handle, so freeing
/// an unknown or already-freed handle is detected and reported as
/// [`EngineError::UnknownHandle`]. An optional byte limit makes
/// out-of-memory reproducible.
#[derive(Debug, Default)]
pub struct HostEngine {
    blocks: Mutex<HashMap<u64, Box<[u8]>>>,
    next: AtomicU64,
    live_bytes: AtomicUsize,
    limit: Option<usize>,
}

impl HostEngine {
    /// An engine with no byte limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine that refuses to hold more than `limit` bytes at once.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// The configured byte limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Bytes currently allocated.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Number of blocks currently allocated.
    pub fn live_allocations(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Run `f` over the bytes of a live block.
    pub fn with_bytes<R>(
        &self,
        handle: NativeHandle,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, EngineError> {
        let mut blocks = self.blocks.lock();
        let block = blocks
            .get_mut(&handle.raw())
            .ok_or(EngineError::UnknownHandle { raw: handle.raw() })?;
        Ok(f(block))
    }

    fn reserve(&self, bytes: usize) -> Result<(), EngineError> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.live_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                live.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|live| EngineError::OutOfMemory {
                requested: bytes,
                available: self.limit.map(|limit| limit.saturating_sub(live)),
            })
    }

    fn unreserve(&self, bytes: usize) {
        self.live_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// A zeroed block of `bytes`, or `None` if the heap refuses it.
fn zeroed_block(bytes: usize) -> Option<Box<[u8]>> {
    if bytes > isize::MAX as usize {
        return None;
    }
    let mut block = Vec::new();
    block.try_reserve_exact(bytes).ok()?;
    block.resize(bytes, 0u8);
    Some(block.into_boxed_slice())
}

impl NativeEngine for HostEngine {
    fn name(&self) -> &str {
        "host"
    }

    fn allocate(&self, request: &AllocationRequest) -> Result<NativeHandle, EngineError> {
        if request.memory == MemoryKind::Device {
            return Err(EngineError::Backend {
                reason: "host engine has no device memory".into(),
            });
        }
        let bytes = request
            .byte_len()
            .ok_or(EngineError::InvalidSize { len: request.len })?;
        self.reserve(bytes)?;

        let raw = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let Some(handle) = NativeHandle::new(raw) else {
            self.unreserve(bytes);
            return Err(EngineError::Backend {
                reason: "handle counter wrapped".into(),
            });
        };
        let Some(block) = zeroed_block(bytes) else {
            self.unreserve(bytes);
            tracing::debug!(bytes, "heap refused host block");
            return Err(EngineError::OutOfMemory {
                requested: bytes,
                available: None,
            });
        };
        self.blocks.lock().insert(raw, block);
        tracing::trace!(handle = %handle, bytes, "host block allocated");
        Ok(handle)
    }

    fn free(&self, handle: NativeHandle) -> Result<(), EngineError> {
        let block = self
            .blocks
            .lock()
            .remove(&handle.raw())
            .ok_or(EngineError::UnknownHandle { raw: handle.raw() })?;
        self.unreserve(block.len());
        tracing::trace!(handle = %handle, bytes = block.len(), "host block freed");
        Ok(())
    }
}
