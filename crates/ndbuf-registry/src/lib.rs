//! Deallocator registry and background reaper for ndbuf.
//!
//! The registry maps wrapper identity to the deallocator that frees the
//! wrapper's native memory, holding only a weak reference to the wrapper:
//!
//! ```text
//! DeallocatorRegistry
//! ├── IndexMap<InstanceId, Entry>      (behind one Mutex)
//! │   └── Entry { Box<dyn Liveness>, Box<dyn Deallocator> }
//! └── RegistryStats counters           (atomics)
//!
//! Reaper (optional background thread)
//! └── poll_and_reap() every poll_interval, or on wake()
//! ```
//!
//! An entry is removed under the lock before its deallocator runs, and the
//! deallocator runs outside the lock. Whoever removes the entry invokes it,
//! so the polling path, deterministic `reap_now`, and shutdown `drain` can
//! race without double-freeing.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod reaper;
pub mod registry;

pub use reaper::{Reaper, ReaperConfig};
pub use registry::{DeallocatorRegistry, Liveness, ReapReport, RegistryStats};
