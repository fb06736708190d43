//! State shared by the service, its buffers, and its workspaces.
//!
//! Two layers keep the ownership graph acyclic:
//!
//! - [`Bookkeeping`] owns the engine, the event sink, and the diagnostic
//!   stores. Deallocators hold it, and deallocators live inside the
//!   registry.
//! - [`ServiceCore`] adds the registry and the service configuration.
//!   Buffers and workspaces hold it so they can register and reclaim.
//!
//! The registry never holds a `ServiceCore`, so nothing it owns can keep
//! itself alive.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use ndbuf_core::{
    AllocError, AllocationRequest, DeallocError, EngineError, EventSink, EventType, InstanceId,
    LogEvent, NativeEngine, NativeHandle, WorkspaceId,
};
use ndbuf_registry::DeallocatorRegistry;
use ndbuf_stats::{
    AllocationCounters, AllocationsTracker, TimingHolder, WorkspaceAllocationsTracker,
};

use crate::buffer::{BufferInfo, DataBuffer, NativeBlock};
use crate::config::{ReclaimMode, ServiceConfig};
use crate::metrics::{counter, LatencyCategory};

pub(crate) struct Bookkeeping {
    pub(crate) engine: Arc<dyn NativeEngine>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) tracker: AllocationsTracker,
    pub(crate) counters: AllocationCounters,
    pub(crate) timings: TimingHolder<LatencyCategory>,
}

impl Bookkeeping {
    pub(crate) fn new(engine: Arc<dyn NativeEngine>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            engine,
            sink,
            tracker: AllocationsTracker::new(),
            counters: AllocationCounters::new(),
            timings: TimingHolder::new(),
        }
    }

    /// Timed engine allocation. Failures are counted and mapped, never
    /// retried.
    pub(crate) fn engine_allocate(
        &self,
        request: &AllocationRequest,
        bytes: usize,
    ) -> Result<NativeHandle, AllocError> {
        let start = Instant::now();
        let result = self.engine.allocate(request);
        self.timings.add(LatencyCategory::Allocate, elapsed_ns(start));
        result.map_err(|source| {
            self.counters.increment(counter::ALLOCATION_FAILURES);
            tracing::warn!(
                engine = self.engine.name(),
                requested = bytes,
                error = %source,
                "native allocation failed"
            );
            AllocError::NativeAllocationFailure {
                requested: bytes,
                source,
            }
        })
    }

    /// Timed engine free.
    pub(crate) fn engine_free(&self, handle: NativeHandle) -> Result<(), EngineError> {
        let start = Instant::now();
        let result = self.engine.free(handle);
        self.timings.add(LatencyCategory::Free, elapsed_ns(start));
        if result.is_err() {
            self.counters.increment(counter::DEALLOCATION_FAILURES);
        }
        result
    }

    pub(crate) fn record_allocation(&self, info: &BufferInfo) {
        let bytes = info.bytes as u64;
        self.tracker.mark_allocated(info.kind, info.device, bytes);
        self.counters.increment(counter::ALLOCATIONS);
        self.counters.add(counter::BYTES_ALLOCATED, bytes);
        self.sink.append(
            LogEvent::now(EventType::Allocation, info.instance, info.kind, bytes)
                .in_workspace(info.workspace.clone())
                .constant(info.constant),
        );
        tracing::trace!(
            instance = info.instance.0,
            bytes,
            kind = ?info.kind,
            device = info.device.0,
            "native memory allocated"
        );
    }

    pub(crate) fn record_free(&self, info: &BufferInfo, event: EventType) {
        let bytes = info.bytes as u64;
        self.tracker.mark_released(info.kind, info.device, bytes);
        self.counters.increment(counter::DEALLOCATIONS);
        self.counters.add(counter::BYTES_FREED, bytes);
        self.sink.append(
            LogEvent::now(event, info.instance, info.kind, bytes)
                .in_workspace(info.workspace.clone())
                .constant(info.constant),
        );
        tracing::trace!(instance = info.instance.0, bytes, "native memory freed");
    }
}

fn elapsed_ns(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Everything needed to create one registered native buffer.
pub(crate) struct NativePlan {
    pub(crate) request: AllocationRequest,
    pub(crate) constant: bool,
    pub(crate) workspace: Option<WorkspaceId>,
    pub(crate) workspace_tracker: Option<Arc<WorkspaceAllocationsTracker>>,
}

pub(crate) struct ServiceCore {
    pub(crate) book: Arc<Bookkeeping>,
    pub(crate) registry: Arc<DeallocatorRegistry>,
    pub(crate) config: ServiceConfig,
}

impl ServiceCore {
    /// Engine allocation plus the failure policy: in tracked mode a
    /// refused request triggers one synchronous reap pass so later
    /// requests can succeed.
    pub(crate) fn allocate_handle(
        &self,
        request: &AllocationRequest,
        bytes: usize,
    ) -> Result<NativeHandle, AllocError> {
        self.book.engine_allocate(request, bytes).inspect_err(|_| {
            if self.config.reclaim == ReclaimMode::Tracked {
                let report = self.registry.poll_and_reap();
                tracing::debug!(
                    reaped = report.reaped,
                    failed = report.failed,
                    "reap pass after allocation failure"
                );
            }
        })
    }

    /// Allocate, register, and record one native buffer.
    pub(crate) fn allocate_native(&self, plan: NativePlan) -> Result<DataBuffer, AllocError> {
        if self.registry.is_shut_down() {
            return Err(AllocError::ShuttingDown);
        }
        let request = plan.request;
        let bytes = request.byte_len().ok_or_else(|| AllocError::InvalidRequest {
            reason: format!(
                "{} elements of {:?} overflow the address space",
                request.len, request.dtype
            ),
        })?;
        let handle = self.allocate_handle(&request, bytes)?;

        let instance = self.registry.next_value();
        let info = BufferInfo {
            instance,
            len: request.len,
            dtype: request.dtype,
            device: request.device,
            memory: request.memory,
            kind: request.kind,
            workspace: plan.workspace,
            constant: plan.constant,
            bytes,
        };
        let block = Arc::new(NativeBlock {
            info,
            handle,
            released: Arc::new(AtomicBool::new(false)),
            book: Arc::clone(&self.book),
            workspace_tracker: plan.workspace_tracker,
            reclaim: self.reclaim_guard(instance),
        });
        // Record before registering: once registered, a concurrent drain
        // may free the block.
        self.book.record_allocation(&block.info);
        if let Err(e) = self.registry.register(&block) {
            if let Err(free_err) = self.book.engine_free(handle) {
                tracing::warn!(
                    instance = instance.0,
                    error = %free_err,
                    "freeing unregistered allocation failed"
                );
            }
            self.book.record_free(&block.info, EventType::Deallocation);
            return Err(e.into());
        }
        Ok(DataBuffer::native(block))
    }

    pub(crate) fn reclaim_guard(&self, id: InstanceId) -> Reclaim {
        Reclaim {
            id,
            registry: Arc::clone(&self.registry),
            mode: self.config.reclaim,
        }
    }
}

/// Dropped together with a registered wrapper. In scoped mode it reaps
/// the wrapper's entry on the spot; in tracked mode it does nothing and
/// the entry waits for the next poll.
pub(crate) struct Reclaim {
    id: InstanceId,
    registry: Arc<DeallocatorRegistry>,
    mode: ReclaimMode,
}

impl Reclaim {
    /// Reap the wrapper's entry now, whatever the mode. `None` if some
    /// other path already did.
    pub(crate) fn reap_now(&self) -> Option<Result<(), DeallocError>> {
        self.registry.reap_now(self.id)
    }
}

impl Drop for Reclaim {
    fn drop(&mut self) {
        if self.mode == ReclaimMode::Scoped {
            // Failures are logged by the registry.
            let _ = self.reap_now();
        }
    }
}
