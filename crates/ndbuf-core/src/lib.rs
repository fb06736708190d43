//! Core types and traits for ndbuf native buffer bookkeeping.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the rest of the workspace: identifiers,
//! data types, the opaque native handle, the error taxonomy, the
//! engine/deallocator traits, and the lifecycle log events.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod dtype;
pub mod error;
pub mod event;
pub mod handle;
pub mod id;
pub mod sink;
pub mod traits;

pub use dtype::{AllocationKind, DataType, MemoryKind};
pub use error::{AllocError, DeallocError, EngineError, RegistryError};
pub use event::{EventType, LogEvent};
pub use handle::{AllocationRequest, NativeHandle};
pub use id::{DeviceId, InstanceId, WorkspaceId};
pub use sink::{EventSink, JsonLinesSink, MemorySink, NullSink, TracingSink};
pub use traits::{Deallocatable, Deallocator, NativeEngine};
