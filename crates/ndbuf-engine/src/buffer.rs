//! Caller-facing buffer handles.
//!
//! A [`DataBuffer`] is either a registered native block (its own engine
//! allocation, freed through the registry) or a slice of a workspace
//! chunk (freed with the workspace). Clones share the same memory; the
//! memory is reclaimed once the last clone is gone, or earlier through
//! [`DataBuffer::release`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndbuf_core::{
    AllocError, AllocationKind, DataType, Deallocatable, DeallocError, Deallocator, DeviceId,
    EventType, InstanceId, MemoryKind, NativeHandle, WorkspaceId,
};
use ndbuf_stats::WorkspaceAllocationsTracker;

use crate::shared::{Bookkeeping, Reclaim};
use crate::workspace::Workspace;

/// Immutable description of a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    /// Identity assigned at allocation.
    pub instance: InstanceId,
    /// Element count.
    pub len: usize,
    /// Element type.
    pub dtype: DataType,
    /// Device the memory lives on.
    pub device: DeviceId,
    /// Host or device memory.
    pub memory: MemoryKind,
    /// Purpose of the allocation.
    pub kind: AllocationKind,
    /// Owning workspace, for chunk slices and spilled allocations.
    pub workspace: Option<WorkspaceId>,
    /// Whether the contents are immutable/shared.
    pub constant: bool,
    /// Size in bytes.
    pub bytes: usize,
}

/// Location of a buffer's first byte: a native block and an offset into
/// it. Only meaningful while the buffer is held and not released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferAddress {
    /// The native block.
    pub handle: NativeHandle,
    /// Byte offset within the block.
    pub offset: usize,
}

/// Shared handle to native memory.
#[derive(Clone)]
pub struct DataBuffer {
    repr: Repr,
}

#[derive(Clone)]
enum Repr {
    Native(Arc<NativeBlock>),
    Slice(Arc<WorkspaceSlice>),
}

impl DataBuffer {
    pub(crate) fn native(block: Arc<NativeBlock>) -> Self {
        Self {
            repr: Repr::Native(block),
        }
    }

    pub(crate) fn slice(slice: WorkspaceSlice) -> Self {
        Self {
            repr: Repr::Slice(Arc::new(slice)),
        }
    }

    /// Immutable description of this buffer.
    pub fn info(&self) -> &BufferInfo {
        match &self.repr {
            Repr::Native(b) => &b.info,
            Repr::Slice(s) => &s.info,
        }
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.info().len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.info().dtype
    }

    /// Size in bytes.
    pub fn byte_len(&self) -> usize {
        self.info().bytes
    }

    /// Whether the contents are immutable/shared.
    pub fn is_constant(&self) -> bool {
        self.info().constant
    }

    /// Identity assigned at allocation.
    pub fn instance_id(&self) -> InstanceId {
        self.info().instance
    }

    /// Owning workspace, if any.
    pub fn workspace_id(&self) -> Option<&WorkspaceId> {
        self.info().workspace.as_ref()
    }

    /// Whether this buffer is a slice of a workspace chunk (as opposed to
    /// its own native allocation, which spilled buffers are).
    pub fn is_workspace_slice(&self) -> bool {
        matches!(self.repr, Repr::Slice(_))
    }

    /// Where the buffer's memory lives.
    ///
    /// # Errors
    ///
    /// - [`AllocError::Released`] once the native memory has been freed.
    /// - [`AllocError::StaleHandle`] for a workspace slice that outlived
    ///   a reset of its workspace.
    /// - [`AllocError::WorkspaceDestroyed`] once the workspace is gone.
    pub fn address(&self) -> Result<BufferAddress, AllocError> {
        match &self.repr {
            Repr::Native(b) => {
                if b.released.load(Ordering::Acquire) {
                    return Err(AllocError::Released {
                        instance: b.info.instance,
                    });
                }
                Ok(BufferAddress {
                    handle: b.handle,
                    offset: 0,
                })
            }
            Repr::Slice(s) => {
                let handle = s.workspace.resolve(s.generation)?;
                Ok(BufferAddress {
                    handle,
                    offset: s.offset,
                })
            }
        }
    }

    /// Free the native memory now instead of when the last clone drops.
    ///
    /// Returns `true` if this call performed the release. Workspace
    /// slices are owned by their workspace and always return `false`.
    pub fn release(&self) -> bool {
        match &self.repr {
            Repr::Native(b) => b.reclaim.reap_now().is_some(),
            Repr::Slice(_) => false,
        }
    }

    /// Whether the memory behind this buffer is gone: freed for native
    /// buffers, reset or destroyed for workspace slices.
    pub fn is_released(&self) -> bool {
        match &self.repr {
            Repr::Native(b) => b.released.load(Ordering::Acquire),
            Repr::Slice(s) => s.workspace.resolve(s.generation).is_err(),
        }
    }
}

impl fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuffer")
            .field("info", self.info())
            .field("released", &self.is_released())
            .finish()
    }
}

// ── Native blocks ──────────────────────────────────────────────────

/// The registered wrapper behind a native [`DataBuffer`]. Its liveness is
/// the liveness of the buffer.
pub(crate) struct NativeBlock {
    pub(crate) info: BufferInfo,
    pub(crate) handle: NativeHandle,
    pub(crate) released: Arc<AtomicBool>,
    pub(crate) book: Arc<Bookkeeping>,
    pub(crate) workspace_tracker: Option<Arc<WorkspaceAllocationsTracker>>,
    pub(crate) reclaim: Reclaim,
}

impl Deallocatable for NativeBlock {
    fn unique_id(&self) -> InstanceId {
        self.info.instance
    }

    fn deallocator(&self) -> Box<dyn Deallocator> {
        Box::new(NativeDeallocator {
            info: self.info.clone(),
            handle: self.handle,
            released: Arc::clone(&self.released),
            book: Arc::clone(&self.book),
            workspace_tracker: self.workspace_tracker.clone(),
        })
    }
}

/// Frees one native block. Holds only copies and shared bookkeeping,
/// never the block itself.
///
/// A failed engine free still settles the gauges and emits the event;
/// the handle is treated as gone and the error is returned to the
/// registry.
struct NativeDeallocator {
    info: BufferInfo,
    handle: NativeHandle,
    released: Arc<AtomicBool>,
    book: Arc<Bookkeeping>,
    workspace_tracker: Option<Arc<WorkspaceAllocationsTracker>>,
}

impl Deallocator for NativeDeallocator {
    fn deallocate(self: Box<Self>) -> Result<(), DeallocError> {
        self.released.store(true, Ordering::Release);
        let freed = self.book.engine_free(self.handle);
        self.book.record_free(&self.info, EventType::Deallocation);
        if let Some(tracker) = &self.workspace_tracker {
            tracker.release(self.info.memory, self.info.bytes as u64);
        }
        freed.map_err(DeallocError::from)
    }
}

// ── Workspace slices ───────────────────────────────────────────────

/// A region of a workspace chunk, valid for one workspace generation.
pub(crate) struct WorkspaceSlice {
    pub(crate) info: BufferInfo,
    pub(crate) workspace: Workspace,
    pub(crate) generation: u64,
    pub(crate) offset: usize,
}
