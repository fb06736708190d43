//! Boundary traits: the native engine, deallocators, and the wrappers
//! that own native memory.

use crate::error::{DeallocError, EngineError};
use crate::handle::{AllocationRequest, NativeHandle};
use crate::id::InstanceId;

/// The external native compute engine's memory interface.
///
/// `allocate` and `free` are only required to be safe under the
/// registry's discipline: each handle is freed at most once, and never
/// while a wrapper still refers to it.
pub trait NativeEngine: Send + Sync {
    /// Short engine name for diagnostics.
    fn name(&self) -> &str;

    /// Allocate memory for `request`.
    fn allocate(&self, request: &AllocationRequest) -> Result<NativeHandle, EngineError>;

    /// Release memory previously returned by [`allocate`](Self::allocate).
    fn free(&self, handle: NativeHandle) -> Result<(), EngineError>;
}

/// Frees one native allocation and records its lifecycle event.
///
/// `deallocate` consumes the deallocator, so it can run at most once.
pub trait Deallocator: Send {
    /// Release the native allocation.
    fn deallocate(self: Box<Self>) -> Result<(), DeallocError>;
}

impl<F> Deallocator for F
where
    F: FnOnce() -> Result<(), DeallocError> + Send,
{
    fn deallocate(self: Box<Self>) -> Result<(), DeallocError> {
        (*self)()
    }
}

/// A managed wrapper that owns native memory.
///
/// The registry holds only a weak reference to the wrapper plus the
/// deallocator it hands out, so the deallocator must not capture a strong
/// reference back to the wrapper.
pub trait Deallocatable: Send + Sync {
    /// Registry identity of this wrapper.
    fn unique_id(&self) -> InstanceId;

    /// Build the deallocator that frees this wrapper's native memory.
    fn deallocator(&self) -> Box<dyn Deallocator>;
}
