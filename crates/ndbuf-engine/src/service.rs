//! The allocator service: one explicitly constructed owner of the native
//! engine, the deallocator registry, the reaper, and the diagnostics.

use std::fmt;
use std::sync::Arc;

use ndbuf_core::{
    AllocError, AllocationKind, AllocationRequest, DataType, DeviceId, EventSink, MemoryKind,
    NativeEngine, WorkspaceId,
};
use ndbuf_registry::{DeallocatorRegistry, ReapReport, Reaper};
use ndbuf_stats::{AllocationsTracker, CounterSnapshot, TimingHolder};

use crate::buffer::DataBuffer;
use crate::config::{ConfigError, ServiceConfig, WorkspaceConfig};
use crate::metrics::{LatencyCategory, ServiceMetrics};
use crate::shared::{Bookkeeping, NativePlan, ServiceCore};
use crate::workspace::Workspace;

/// Parameters of one native buffer request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferRequest {
    /// Element count.
    pub len: usize,
    /// Element type.
    pub dtype: DataType,
    /// Target device. `None` uses the service default.
    pub device: Option<DeviceId>,
    /// Host or device memory.
    pub memory: MemoryKind,
    /// Purpose of the allocation.
    pub kind: AllocationKind,
    /// Whether the contents are immutable/shared.
    pub constant: bool,
}

impl BufferRequest {
    /// A general host buffer of `len` elements of `dtype`.
    pub fn new(len: usize, dtype: DataType) -> Self {
        Self {
            len,
            dtype,
            device: None,
            memory: MemoryKind::Host,
            kind: AllocationKind::General,
            constant: false,
        }
    }

    /// Target a specific device.
    pub fn on_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Allocate in `memory` instead of host memory.
    pub fn in_memory(mut self, memory: MemoryKind) -> Self {
        self.memory = memory;
        self
    }

    /// Override the allocation kind.
    pub fn with_kind(mut self, kind: AllocationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the buffer constant; its kind becomes
    /// [`AllocationKind::Constant`].
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self.kind = AllocationKind::Constant;
        self
    }
}

/// Owns native memory bookkeeping for one engine.
///
/// Every buffer and workspace created here is registered with the
/// service's [`DeallocatorRegistry`]. Dropping the service (or calling
/// [`shutdown`](Self::shutdown)) stops the reaper and frees everything
/// still outstanding; buffers that outlive it report
/// [`AllocError::Released`].
pub struct AllocatorService {
    core: Arc<ServiceCore>,
    reaper: Option<Reaper>,
}

// Compile-time assertion: AllocatorService must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<AllocatorService>();
    assert::<DataBuffer>();
    assert::<Workspace>();
};

impl AllocatorService {
    /// Validate `config`, then build the service and spawn its reaper if
    /// one is configured.
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        sink: Arc<dyn EventSink>,
        config: ServiceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(DeallocatorRegistry::new());
        let reaper = match &config.reaper {
            Some(reaper_config) => Some(
                Reaper::spawn(Arc::clone(&registry), reaper_config).map_err(|e| {
                    ConfigError::ReaperSpawnFailed {
                        reason: e.to_string(),
                    }
                })?,
            ),
            None => None,
        };
        tracing::debug!(
            engine = engine.name(),
            reclaim = ?config.reclaim,
            reaper = reaper.is_some(),
            "allocator service started"
        );
        let core = Arc::new(ServiceCore {
            book: Arc::new(Bookkeeping::new(engine, sink)),
            registry,
            config,
        });
        Ok(Self { core, reaper })
    }

    /// Allocate a general host buffer of `len` elements of `dtype`.
    ///
    /// # Errors
    ///
    /// [`AllocError::NativeAllocationFailure`] when the engine refuses;
    /// the request is not retried.
    pub fn allocate(&self, len: usize, dtype: DataType) -> Result<DataBuffer, AllocError> {
        self.allocate_with(BufferRequest::new(len, dtype))
    }

    /// Allocate a buffer described by `request`.
    pub fn allocate_with(&self, request: BufferRequest) -> Result<DataBuffer, AllocError> {
        let plan = NativePlan {
            request: AllocationRequest {
                len: request.len,
                dtype: request.dtype,
                device: request.device.unwrap_or(self.core.config.default_device),
                memory: request.memory,
                kind: request.kind,
            },
            constant: request.constant,
            workspace: None,
            workspace_tracker: None,
        };
        self.core.allocate_native(plan)
    }

    /// Allocate a workspace chunk and start its first cycle.
    pub fn create_workspace(
        &self,
        id: impl Into<WorkspaceId>,
        config: WorkspaceConfig,
    ) -> Result<Workspace, AllocError> {
        Workspace::create(&self.core, id.into(), config)
    }

    /// Reap every registered buffer that is no longer reachable.
    pub fn poll(&self) -> ReapReport {
        self.core.registry.poll_and_reap()
    }

    /// Ask the reaper for an immediate poll. Returns `false` when the
    /// service runs without one.
    pub fn wake_reaper(&self) -> bool {
        match &self.reaper {
            Some(reaper) => {
                reaper.wake();
                true
            }
            None => false,
        }
    }

    /// Whether a reaper thread is running.
    pub fn has_reaper(&self) -> bool {
        self.reaper.as_ref().is_some_and(Reaper::is_running)
    }

    /// Snapshot of registry, counter, timing, and tracker state.
    pub fn metrics(&self) -> ServiceMetrics {
        let book = &self.core.book;
        let device = self.core.config.default_device;
        ServiceMetrics {
            registry: self.core.registry.stats(),
            counters: book.counters.snapshot(),
            allocate_ns: book.timings.summary(&LatencyCategory::Allocate),
            free_ns: book.timings.summary(&LatencyCategory::Free),
            live_bytes: AllocationKind::ALL.map(|kind| book.tracker.bytes_on_device(kind, device)),
            device,
        }
    }

    /// Snapshot of the event counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.core.book.counters.snapshot()
    }

    /// Engine call latencies in nanoseconds.
    pub fn timings(&self) -> &TimingHolder<LatencyCategory> {
        &self.core.book.timings
    }

    /// Per-device and per-workspace byte accounting.
    pub fn tracker(&self) -> &AllocationsTracker {
        &self.core.book.tracker
    }

    /// The service's registry.
    pub fn registry(&self) -> &DeallocatorRegistry {
        &self.core.registry
    }

    /// The native engine.
    pub fn engine(&self) -> &dyn NativeEngine {
        self.core.book.engine.as_ref()
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &ServiceConfig {
        &self.core.config
    }

    /// Whether the service has shut down.
    pub fn is_shut_down(&self) -> bool {
        self.core.registry.is_shut_down()
    }

    /// Stop the reaper and free every outstanding buffer and workspace.
    ///
    /// Returns what the final drain freed.
    pub fn shutdown(mut self) -> ReapReport {
        self.stop()
    }

    fn stop(&mut self) -> ReapReport {
        if let Some(reaper) = self.reaper.take() {
            let lifetime = reaper.shutdown();
            tracing::debug!(
                reaped = lifetime.reaped,
                failed = lifetime.failed,
                "reaper joined"
            );
        }
        let report = self.core.registry.drain();
        if report.invoked() > 0 {
            tracing::debug!(
                reaped = report.reaped,
                failed = report.failed,
                "allocator service drained"
            );
        }
        report
    }
}

impl Drop for AllocatorService {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl fmt::Debug for AllocatorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorService")
            .field("engine", &self.core.book.engine.name())
            .field("reclaim", &self.core.config.reclaim)
            .field("reaper", &self.reaper.is_some())
            .field("registry", &self.core.registry.stats())
            .finish()
    }
}
