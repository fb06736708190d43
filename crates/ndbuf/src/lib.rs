//! ndbuf: lifecycle bookkeeping for natively allocated buffers.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all ndbuf sub-crates. For most users, adding `ndbuf` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use ndbuf::prelude::*;
//!
//! let engine = Arc::new(HostEngine::new());
//! let sink = Arc::new(MemorySink::new());
//! let service = AllocatorService::new(engine.clone(), sink.clone(), ServiceConfig::default())
//!     .unwrap();
//!
//! let buf = service.allocate(1024, DataType::Float).unwrap();
//! assert_eq!(buf.byte_len(), 4096);
//! assert_eq!(engine.live_bytes(), 4096);
//!
//! // Scoped reclamation: the last handle frees the memory.
//! drop(buf);
//! assert_eq!(engine.live_bytes(), 0);
//! assert_eq!(sink.len(), 2);
//!
//! // Workspaces hand out slices of one chunk and are reset per cycle.
//! let ws = service.create_workspace("activations", WorkspaceConfig::new(1 << 16)).unwrap();
//! let slice = ws.alloc(256, DataType::Float).unwrap();
//! ws.reset().unwrap();
//! assert!(matches!(slice.address(), Err(AllocError::StaleHandle { .. })));
//!
//! let report = service.shutdown();
//! assert_eq!(report.reaped, 1);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `ndbuf-core` | IDs, data types, errors, log events, sinks, core traits |
//! | [`stats`] | `ndbuf-stats` | Allocation counters, timing holder, allocations tracker |
//! | [`registry`] | `ndbuf-registry` | Deallocator registry and background reaper |
//! | [`engine`] | `ndbuf-engine` | Allocator service, buffers, workspaces, host engine |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`ndbuf-core`).
///
/// Contains the [`types::NativeEngine`], [`types::Deallocatable`], and
/// [`types::Deallocator`] traits, the error enums, and the
/// [`types::LogEvent`] sinks.
pub use ndbuf_core as types;

/// Diagnostic stores (`ndbuf-stats`).
///
/// [`stats::AllocationCounters`], [`stats::TimingHolder`], and
/// [`stats::AllocationsTracker`].
pub use ndbuf_stats as stats;

/// Deallocator registry and reaper (`ndbuf-registry`).
pub use ndbuf_registry as registry;

/// Allocator service, buffers, and workspaces (`ndbuf-engine`).
pub use ndbuf_engine as engine;

/// Common imports for typical ndbuf usage.
///
/// ```rust
/// use ndbuf::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use ndbuf_core::{
        AllocationKind, DataType, DeviceId, EventSink, EventType, InstanceId, LogEvent,
        MemoryKind, NativeEngine, WorkspaceId,
    };

    // Sinks
    pub use ndbuf_core::{JsonLinesSink, MemorySink, NullSink, TracingSink};

    // Errors
    pub use ndbuf_core::{AllocError, DeallocError, EngineError, RegistryError};

    // Registry
    pub use ndbuf_registry::{DeallocatorRegistry, ReapReport, ReaperConfig};

    // Engine
    pub use ndbuf_engine::{
        AllocatorService, BufferRequest, ConfigError, DataBuffer, HostEngine, ReclaimMode,
        ServiceConfig, ServiceMetrics, SpillPolicy, Workspace, WorkspaceConfig,
    };
}
