//! Allocator service, buffers, and workspaces for ndbuf.
//!
//! [`AllocatorService`] owns a [`NativeEngine`](ndbuf_core::NativeEngine),
//! a deallocator registry, and the diagnostic stores. It hands out
//! [`DataBuffer`]s (each backed by its own registered native block) and
//! [`Workspace`]s (one registered chunk, bump allocated in cycles).
//! Memory is reclaimed when the last handle drops in
//! [`ReclaimMode::Scoped`], or on the next registry poll in
//! [`ReclaimMode::Tracked`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod host;
pub mod metrics;
pub mod service;
mod shared;
pub mod workspace;

pub use buffer::{BufferAddress, BufferInfo, DataBuffer};
pub use config::{ConfigError, ReclaimMode, ServiceConfig, SpillPolicy, WorkspaceConfig};
pub use host::HostEngine;
pub use metrics::{LatencyCategory, ServiceMetrics};
pub use ndbuf_registry::{ReapReport, ReaperConfig};
pub use service::{AllocatorService, BufferRequest};
pub use workspace::{Workspace, SAFETY_OFFSET, WORKSPACE_ALIGNMENT};
