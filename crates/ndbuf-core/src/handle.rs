//! Opaque native handles and allocation requests.
//!
//! A [`NativeHandle`] is the only thing the bookkeeping layer ever learns
//! about memory owned by the native engine. It is never dereferenced on
//! this side of the boundary.

use std::fmt;
use std::num::NonZeroU64;

use crate::dtype::{AllocationKind, DataType, MemoryKind};
use crate::id::DeviceId;

/// Opaque reference to memory allocated by a native engine.
///
/// Non-zero so that `Option<NativeHandle>` is the same size as the handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct NativeHandle(NonZeroU64);

impl NativeHandle {
    /// Wrap a raw token produced by an engine. Returns `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw engine token.
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Everything the native engine needs to satisfy one allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Number of elements.
    pub len: usize,
    /// Element type.
    pub dtype: DataType,
    /// Target device.
    pub device: DeviceId,
    /// Host or device memory.
    pub memory: MemoryKind,
    /// Purpose of the allocation.
    pub kind: AllocationKind,
}

impl AllocationRequest {
    /// A general host allocation of `len` elements of `dtype`.
    pub fn new(len: usize, dtype: DataType) -> Self {
        Self {
            len,
            dtype,
            device: DeviceId::HOST,
            memory: MemoryKind::Host,
            kind: AllocationKind::General,
        }
    }

    /// Raw byte request for workspace chunks.
    pub fn bytes(bytes: usize) -> Self {
        Self::new(bytes, DataType::Int8)
    }

    /// Size of the request in bytes, or `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.dtype.byte_len(self.len)
    }
}
