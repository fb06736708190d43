//! Point-in-time diagnostics for an allocator service.
//!
//! [`ServiceMetrics`] bundles registry statistics, a counter snapshot,
//! and latency summaries so telemetry can read one consistent-enough
//! value instead of querying each subsystem.

use ndbuf_core::{AllocationKind, DeviceId};
use ndbuf_registry::RegistryStats;
use ndbuf_stats::{CounterSnapshot, TimingSummary};

/// Counter category names recorded by the service.
pub mod counter {
    /// Successful native allocations (buffers, spills and workspace chunks).
    pub const ALLOCATIONS: &str = "allocations";
    /// Successful native frees.
    pub const DEALLOCATIONS: &str = "deallocations";
    /// Native allocations refused by the engine.
    pub const ALLOCATION_FAILURES: &str = "allocation_failures";
    /// Native frees that returned an error.
    pub const DEALLOCATION_FAILURES: &str = "deallocation_failures";
    /// Workspace cycle resets.
    pub const WORKSPACE_RESETS: &str = "workspace_resets";
    /// Workspace requests served outside the chunk.
    pub const SPILLS: &str = "spills";
    /// Bytes handed out by the native engine.
    pub const BYTES_ALLOCATED: &str = "bytes_allocated";
    /// Bytes returned to the native engine.
    pub const BYTES_FREED: &str = "bytes_freed";
}

/// Latency categories recorded in the service's timing holder.
///
/// Samples are wall-clock nanoseconds around the native engine call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LatencyCategory {
    /// `NativeEngine::allocate`.
    Allocate,
    /// `NativeEngine::free`.
    Free,
}

/// Snapshot of service-wide bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct ServiceMetrics {
    /// Registry counts.
    pub registry: RegistryStats,
    /// All event counters.
    pub counters: CounterSnapshot,
    /// Allocation latency in nanoseconds; `None` before the first sample.
    pub allocate_ns: Option<TimingSummary>,
    /// Free latency in nanoseconds; `None` before the first sample.
    pub free_ns: Option<TimingSummary>,
    /// Live bytes per kind on the service's default device, indexed by
    /// [`AllocationKind::index`].
    pub live_bytes: [i64; AllocationKind::COUNT],
    /// The device `live_bytes` refers to.
    pub device: DeviceId,
}

impl ServiceMetrics {
    /// Live bytes of one kind on the default device.
    pub fn live_bytes(&self, kind: AllocationKind) -> i64 {
        self.live_bytes[kind.index()]
    }

    /// Live bytes of all kinds on the default device.
    pub fn total_live_bytes(&self) -> i64 {
        self.live_bytes.iter().sum()
    }
}
