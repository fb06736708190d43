//! Allocation counters, timing samples and memory tracking for ndbuf.
//!
//! Everything here is diagnostic bookkeeping: approximate, thread-safe,
//! and never on the correctness path of an allocation.
//!
//! - [`AllocationCounters`]: monotonic per-category event counts.
//! - [`TimingHolder`]: per-category samples with sum/average/median/min/max.
//! - [`AllocationsTracker`]: per-device and per-workspace byte gauges.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod counters;
pub mod timing;
pub mod tracker;

pub use counters::{AllocationCounters, CounterSnapshot};
pub use timing::{TimingHolder, TimingSummary, DEFAULT_WINDOW};
pub use tracker::{AllocationsTracker, DeviceAllocationsTracker, WorkspaceAllocationsTracker};
