//! Cyclic bump-allocated workspaces.
//!
//! A workspace owns one native chunk of `initial_size + SAFETY_OFFSET`
//! bytes, registered with the registry like any other wrapper. Requests
//! are carved from the chunk at 32-byte alignment. [`Workspace::reset`]
//! starts a new cycle: the offset returns to zero and the generation is
//! bumped, so slices handed out earlier resolve to
//! [`AllocError::StaleHandle`]. Requests that do not fit are spilled
//! according to the workspace's [`SpillPolicy`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ndbuf_core::{
    AllocError, AllocationKind, AllocationRequest, DataType, Deallocatable, DeallocError,
    Deallocator, EventType, InstanceId, LogEvent, NativeHandle, WorkspaceId,
};
use ndbuf_stats::WorkspaceAllocationsTracker;

use crate::buffer::{BufferInfo, DataBuffer, WorkspaceSlice};
use crate::config::{SpillPolicy, WorkspaceConfig};
use crate::metrics::counter;
use crate::shared::{Bookkeeping, NativePlan, Reclaim, ServiceCore};

/// Extra bytes allocated past `initial_size` for every chunk.
pub const SAFETY_OFFSET: usize = 1024;

/// Alignment of every slice carved from a chunk.
pub const WORKSPACE_ALIGNMENT: usize = 32;

fn align_up(bytes: usize) -> Option<usize> {
    bytes
        .checked_add(WORKSPACE_ALIGNMENT - 1)
        .map(|b| b & !(WORKSPACE_ALIGNMENT - 1))
}

#[derive(Debug, Default)]
struct Cycle {
    offset: usize,
    generation: u64,
    resets: u64,
    peak: usize,
}

/// Shared handle to a workspace. Clones refer to the same chunk.
#[derive(Clone)]
pub struct Workspace {
    inner: Arc<WorkspaceInner>,
}

struct WorkspaceInner {
    id: WorkspaceId,
    config: WorkspaceConfig,
    base: NativeHandle,
    chunk: BufferInfo,
    cycle: Mutex<Cycle>,
    destroyed: Arc<AtomicBool>,
    tracker: Arc<WorkspaceAllocationsTracker>,
    core: Arc<ServiceCore>,
    reclaim: Reclaim,
}

impl Workspace {
    pub(crate) fn create(
        core: &Arc<ServiceCore>,
        id: WorkspaceId,
        config: WorkspaceConfig,
    ) -> Result<Self, AllocError> {
        config.validate().map_err(|e| AllocError::InvalidRequest {
            reason: e.to_string(),
        })?;
        if core.registry.is_shut_down() {
            return Err(AllocError::ShuttingDown);
        }

        let device = config.device.unwrap_or(core.config.default_device);
        let bytes = config.initial_size + SAFETY_OFFSET;
        let request = AllocationRequest {
            device,
            memory: config.memory_kind,
            kind: AllocationKind::Workspace,
            ..AllocationRequest::bytes(bytes)
        };
        let base = core.allocate_handle(&request, bytes)?;

        let instance = core.registry.next_value();
        let chunk = BufferInfo {
            instance,
            len: bytes,
            dtype: DataType::Int8,
            device,
            memory: config.memory_kind,
            kind: AllocationKind::Workspace,
            workspace: Some(id.clone()),
            constant: false,
            bytes,
        };
        let inner = Arc::new(WorkspaceInner {
            id: id.clone(),
            config,
            base,
            chunk,
            cycle: Mutex::new(Cycle::default()),
            destroyed: Arc::new(AtomicBool::new(false)),
            tracker: core.book.tracker.register_workspace(id.clone()),
            core: Arc::clone(core),
            reclaim: core.reclaim_guard(instance),
        });
        core.book.record_allocation(&inner.chunk);
        if let Err(e) = core.registry.register(&inner) {
            core.book.tracker.deregister_workspace_if(&id, &inner.tracker);
            if let Err(free_err) = core.book.engine_free(base) {
                tracing::warn!(
                    workspace = %id,
                    error = %free_err,
                    "freeing unregistered workspace chunk failed"
                );
            }
            core.book
                .record_free(&inner.chunk, EventType::WorkspaceDestroyed);
            return Err(e.into());
        }
        tracing::debug!(workspace = %id, bytes, "workspace created");
        Ok(Self { inner })
    }

    /// The workspace's name.
    pub fn id(&self) -> WorkspaceId {
        self.inner.id.clone()
    }

    /// Registry identity of the chunk.
    pub fn instance_id(&self) -> InstanceId {
        self.inner.chunk.instance
    }

    /// The configuration the workspace was created with.
    pub fn config(&self) -> &WorkspaceConfig {
        &self.inner.config
    }

    /// Usable bytes per cycle.
    pub fn capacity(&self) -> usize {
        self.inner.config.initial_size
    }

    /// Bytes carved out in the current cycle, alignment included.
    pub fn used_bytes(&self) -> usize {
        self.inner.cycle.lock().offset
    }

    /// Bytes left in the current cycle.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used_bytes()
    }

    /// Highest offset reached in any cycle.
    pub fn peak_bytes(&self) -> usize {
        self.inner.cycle.lock().peak
    }

    /// Current cycle generation; starts at 0.
    pub fn generation(&self) -> u64 {
        self.inner.cycle.lock().generation
    }

    /// Number of completed cycles.
    pub fn cycles(&self) -> u64 {
        self.inner.cycle.lock().resets
    }

    /// Whether the chunk has been freed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Per-workspace accounting.
    pub fn tracker(&self) -> &Arc<WorkspaceAllocationsTracker> {
        &self.inner.tracker
    }

    /// Carve `len` elements of `dtype` from the current cycle, spilling
    /// per the workspace's policy when the cycle is full.
    pub fn alloc(&self, len: usize, dtype: DataType) -> Result<DataBuffer, AllocError> {
        let inner = &self.inner;
        if self.is_destroyed() {
            return Err(AllocError::WorkspaceDestroyed {
                workspace: self.id(),
            });
        }
        let bytes = dtype.byte_len(len).ok_or_else(|| AllocError::InvalidRequest {
            reason: format!("{len} elements of {dtype:?} overflow the address space"),
        })?;
        let aligned = align_up(bytes).ok_or_else(|| AllocError::InvalidRequest {
            reason: format!("{bytes} bytes cannot be aligned"),
        })?;

        let mut cycle = inner.cycle.lock();
        let remaining = inner.config.initial_size - cycle.offset;
        if aligned > remaining {
            drop(cycle);
            return match inner.config.spill {
                SpillPolicy::Fail => Err(AllocError::WorkspaceExhausted {
                    workspace: self.id(),
                    requested: aligned,
                    remaining,
                }),
                SpillPolicy::External => self.spill(len, dtype, bytes),
            };
        }
        let offset = cycle.offset;
        cycle.offset += aligned;
        cycle.peak = cycle.peak.max(cycle.offset);
        let generation = cycle.generation;
        drop(cycle);

        inner.tracker.allocate(dtype, inner.config.memory_kind, aligned as u64);
        let info = BufferInfo {
            instance: inner.core.registry.next_value(),
            len,
            dtype,
            device: inner.chunk.device,
            memory: inner.config.memory_kind,
            kind: AllocationKind::Workspace,
            workspace: Some(self.id()),
            constant: false,
            bytes,
        };
        tracing::trace!(
            workspace = %self.inner.id,
            offset,
            bytes,
            generation,
            "workspace slice"
        );
        Ok(DataBuffer::slice(WorkspaceSlice {
            info,
            workspace: self.clone(),
            generation,
            offset,
        }))
    }

    fn spill(&self, len: usize, dtype: DataType, bytes: usize) -> Result<DataBuffer, AllocError> {
        let inner = &self.inner;
        let plan = NativePlan {
            request: AllocationRequest {
                len,
                dtype,
                device: inner.chunk.device,
                memory: inner.config.memory_kind,
                kind: AllocationKind::Workspace,
            },
            constant: false,
            workspace: Some(self.id()),
            workspace_tracker: Some(Arc::clone(&inner.tracker)),
        };
        let buffer = inner.core.allocate_native(plan)?;
        inner
            .tracker
            .allocate_spilled(dtype, inner.config.memory_kind, bytes as u64);
        inner.tracker.allocate_external();
        inner.core.book.counters.increment(counter::SPILLS);
        tracing::debug!(workspace = %self.inner.id, bytes, "workspace request spilled");
        Ok(buffer)
    }

    /// Start a new cycle. Every slice from earlier cycles becomes stale.
    /// Spilled buffers are separate allocations and are unaffected.
    ///
    /// Returns the new generation.
    pub fn reset(&self) -> Result<u64, AllocError> {
        let inner = &self.inner;
        let mut cycle = inner.cycle.lock();
        if self.is_destroyed() {
            return Err(AllocError::WorkspaceDestroyed {
                workspace: self.id(),
            });
        }
        let released = cycle.offset;
        cycle.offset = 0;
        cycle.generation += 1;
        cycle.resets += 1;
        let generation = cycle.generation;
        drop(cycle);

        inner.tracker.release(inner.config.memory_kind, released as u64);
        inner.core.book.counters.increment(counter::WORKSPACE_RESETS);
        inner.core.book.sink.append(
            LogEvent::now(
                EventType::WorkspaceReset,
                inner.chunk.instance,
                AllocationKind::Workspace,
                released as u64,
            )
            .in_workspace(Some(self.id())),
        );
        tracing::debug!(
            workspace = %self.inner.id,
            generation,
            released,
            "workspace reset"
        );
        Ok(generation)
    }

    /// Free the chunk now. Returns `true` if this call freed it.
    ///
    /// Outstanding slices resolve to [`AllocError::WorkspaceDestroyed`]
    /// afterwards.
    pub fn destroy(&self) -> bool {
        self.inner.reclaim.reap_now().is_some()
    }

    /// Chunk handle for a slice carved in `generation`.
    pub(crate) fn resolve(&self, generation: u64) -> Result<NativeHandle, AllocError> {
        if self.is_destroyed() {
            return Err(AllocError::WorkspaceDestroyed {
                workspace: self.id(),
            });
        }
        let current = self.generation();
        if current != generation {
            return Err(AllocError::StaleHandle {
                handle_generation: generation,
                current_generation: current,
            });
        }
        Ok(self.inner.base)
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.inner.id)
            .field("capacity", &self.capacity())
            .field("used", &self.used_bytes())
            .field("generation", &self.generation())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Deallocatable for WorkspaceInner {
    fn unique_id(&self) -> InstanceId {
        self.chunk.instance
    }

    fn deallocator(&self) -> Box<dyn Deallocator> {
        Box::new(WorkspaceDeallocator {
            chunk: self.chunk.clone(),
            base: self.base,
            destroyed: Arc::clone(&self.destroyed),
            tracker: Arc::clone(&self.tracker),
            book: Arc::clone(&self.core.book),
        })
    }
}

/// Frees the chunk. Like native blocks, a failed engine free still
/// settles the gauges and emits the event.
struct WorkspaceDeallocator {
    chunk: BufferInfo,
    base: NativeHandle,
    destroyed: Arc<AtomicBool>,
    tracker: Arc<WorkspaceAllocationsTracker>,
    book: Arc<Bookkeeping>,
}

impl Deallocator for WorkspaceDeallocator {
    fn deallocate(self: Box<Self>) -> Result<(), DeallocError> {
        self.destroyed.store(true, Ordering::Release);
        if let Some(id) = &self.chunk.workspace {
            self.book.tracker.deregister_workspace_if(id, &self.tracker);
        }
        let freed = self.book.engine_free(self.base);
        self.book.record_free(&self.chunk, EventType::WorkspaceDestroyed);
        tracing::debug!(
            instance = self.chunk.instance.0,
            bytes = self.chunk.bytes,
            "workspace destroyed"
        );
        freed.map_err(DeallocError::from)
    }
}
