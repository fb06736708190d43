//! Per-device and per-workspace byte accounting.
//!
//! [`AllocationsTracker`] keeps one signed byte gauge per
//! [`AllocationKind`] for every device that has seen an allocation, and
//! one [`WorkspaceAllocationsTracker`] for every registered workspace.
//! Gauges are signed so that a release racing ahead of its allocation
//! record shows up as a negative reading instead of wrapping.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use ndbuf_core::{AllocationKind, DataType, DeviceId, MemoryKind, WorkspaceId};

/// Byte gauges for one device, one per [`AllocationKind`].
#[derive(Debug, Default)]
pub struct DeviceAllocationsTracker {
    bytes: [AtomicI64; AllocationKind::COUNT],
}

impl DeviceAllocationsTracker {
    /// Apply a signed byte delta to `kind`.
    pub fn update_state(&self, kind: AllocationKind, delta: i64) {
        self.bytes[kind.index()].fetch_add(delta, Ordering::Relaxed);
    }

    /// Current bytes for `kind`.
    pub fn state(&self, kind: AllocationKind) -> i64 {
        self.bytes[kind.index()].load(Ordering::Relaxed)
    }

    /// Sum over all kinds.
    pub fn total(&self) -> i64 {
        AllocationKind::ALL.iter().map(|&k| self.state(k)).sum()
    }
}

/// Allocation accounting for a single workspace.
#[derive(Debug, Default)]
pub struct WorkspaceAllocationsTracker {
    current: [AtomicI64; MemoryKind::COUNT],
    by_type: Mutex<IndexMap<DataType, u64>>,
    allocations: AtomicU64,
    spilled: AtomicU64,
    spilled_bytes: AtomicU64,
    external: AtomicU64,
}

impl WorkspaceAllocationsTracker {
    /// Record an allocation served from the workspace chunk.
    pub fn allocate(&self, dtype: DataType, kind: MemoryKind, bytes: u64) {
        self.current[kind.index()].fetch_add(bytes as i64, Ordering::Relaxed);
        *self.by_type.lock().entry(dtype).or_insert(0) += bytes;
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an allocation that did not fit and spilled out of the chunk.
    pub fn allocate_spilled(&self, dtype: DataType, kind: MemoryKind, bytes: u64) {
        self.allocate(dtype, kind, bytes);
        self.spilled.fetch_add(1, Ordering::Relaxed);
        self.spilled_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record that a spilled allocation became a separate native allocation.
    pub fn allocate_external(&self) {
        self.external.fetch_add(1, Ordering::Relaxed);
    }

    /// Return `bytes` of `kind` memory (cycle reset or spill freed).
    pub fn release(&self, kind: MemoryKind, bytes: u64) {
        self.current[kind.index()].fetch_sub(bytes as i64, Ordering::Relaxed);
    }

    /// Bytes currently attributed to the workspace for `kind`.
    pub fn current_bytes(&self, kind: MemoryKind) -> i64 {
        self.current[kind.index()].load(Ordering::Relaxed)
    }

    /// Total bytes ever allocated with element type `dtype`.
    pub fn bytes_for_type(&self, dtype: DataType) -> u64 {
        self.by_type.lock().get(&dtype).copied().unwrap_or(0)
    }

    /// Number of allocations recorded (including spilled ones).
    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of spilled allocations.
    pub fn spilled_count(&self) -> u64 {
        self.spilled.load(Ordering::Relaxed)
    }

    /// Total bytes spilled.
    pub fn spilled_bytes(&self) -> u64 {
        self.spilled_bytes.load(Ordering::Relaxed)
    }

    /// Number of external allocations.
    pub fn external_count(&self) -> u64 {
        self.external.load(Ordering::Relaxed)
    }
}

/// Memory accounting across devices and workspaces.
#[derive(Debug, Default)]
pub struct AllocationsTracker {
    devices: RwLock<IndexMap<DeviceId, Arc<DeviceAllocationsTracker>>>,
    workspaces: RwLock<IndexMap<WorkspaceId, Arc<WorkspaceAllocationsTracker>>>,
}

impl AllocationsTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn tracker_for_device(&self, device: DeviceId) -> Arc<DeviceAllocationsTracker> {
        if let Some(t) = self.devices.read().get(&device) {
            return Arc::clone(t);
        }
        Arc::clone(self.devices.write().entry(device).or_default())
    }

    /// Record `bytes` allocated on `device` for `kind`.
    pub fn mark_allocated(&self, kind: AllocationKind, device: DeviceId, bytes: u64) {
        self.tracker_for_device(device)
            .update_state(kind, bytes as i64);
    }

    /// Record `bytes` released on `device` for `kind`.
    pub fn mark_released(&self, kind: AllocationKind, device: DeviceId, bytes: u64) {
        self.tracker_for_device(device)
            .update_state(kind, -(bytes as i64));
    }

    /// Current bytes on `device` for `kind`; 0 for devices never seen.
    pub fn bytes_on_device(&self, kind: AllocationKind, device: DeviceId) -> i64 {
        self.devices
            .read()
            .get(&device)
            .map_or(0, |t| t.state(kind))
    }

    /// Current bytes on `device` summed over all kinds.
    pub fn total_bytes_on_device(&self, device: DeviceId) -> i64 {
        self.devices.read().get(&device).map_or(0, |t| t.total())
    }

    /// Devices that have seen at least one allocation.
    pub fn tracked_devices(&self) -> Vec<DeviceId> {
        self.devices.read().keys().copied().collect()
    }

    /// Start tracking a workspace. Re-registering replaces the previous
    /// tracker, matching a workspace re-created under the same name.
    pub fn register_workspace(&self, id: WorkspaceId) -> Arc<WorkspaceAllocationsTracker> {
        let tracker = Arc::new(WorkspaceAllocationsTracker::default());
        self.workspaces.write().insert(id, Arc::clone(&tracker));
        tracker
    }

    /// Stop tracking a workspace.
    pub fn deregister_workspace(&self, id: &WorkspaceId) {
        self.workspaces.write().shift_remove(id);
    }

    /// Stop tracking a workspace if `tracker` is still the one registered
    /// under `id`. Returns whether it was removed.
    pub fn deregister_workspace_if(
        &self,
        id: &WorkspaceId,
        tracker: &Arc<WorkspaceAllocationsTracker>,
    ) -> bool {
        let mut workspaces = self.workspaces.write();
        match workspaces.get(id) {
            Some(current) if Arc::ptr_eq(current, tracker) => {
                workspaces.shift_remove(id);
                true
            }
            _ => false,
        }
    }

    /// The tracker for `id`, if registered.
    pub fn tracker(&self, id: &WorkspaceId) -> Option<Arc<WorkspaceAllocationsTracker>> {
        self.workspaces.read().get(id).cloned()
    }

    /// Current `kind` bytes of workspace `id`, if registered.
    pub fn total_memory_for_workspace(&self, id: &WorkspaceId, kind: MemoryKind) -> Option<i64> {
        self.workspaces
            .read()
            .get(id)
            .map(|t| t.current_bytes(kind))
    }

    /// Human-readable per-device and per-workspace report.
    pub fn memory_report(&self) -> String {
        let mut out = String::new();
        let devices = self.devices.read();
        if devices.is_empty() {
            out.push_str("------No device memory found----------\n");
        }
        for (device, t) in devices.iter() {
            let _ = writeln!(out, "device {device}:");
            for kind in AllocationKind::ALL {
                let _ = writeln!(out, "  {kind}: {} bytes", t.state(kind));
            }
        }
        drop(devices);

        let workspaces = self.workspaces.read();
        if workspaces.is_empty() {
            out.push_str("------No workspaces found----------\n");
        }
        for (id, t) in workspaces.iter() {
            let _ = writeln!(
                out,
                "workspace {id}: host {} bytes, device {} bytes, {} allocations ({} spilled, {} spilled bytes)",
                t.current_bytes(MemoryKind::Host),
                t.current_bytes(MemoryKind::Device),
                t.allocation_count(),
                t.spilled_count(),
                t.spilled_bytes(),
            );
        }
        out
    }
}
