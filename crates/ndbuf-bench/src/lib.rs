//! Benchmark fixtures for ndbuf.
//!
//! - [`mock_service`]: a service over the recording mock engine, so
//!   benchmarks measure bookkeeping rather than the system allocator.
//! - [`host_service`]: a service over the heap-backed engine.
//! - [`churn`]: allocate and immediately drop a batch of buffers.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use ndbuf_core::{DataType, NullSink};
use ndbuf_engine::{AllocatorService, HostEngine, ReclaimMode, ServiceConfig};
use ndbuf_test_utils::MockEngine;

/// Element counts cycled through by [`churn`].
pub const CHURN_LENGTHS: [usize; 4] = [16, 256, 1024, 4096];

fn config(mode: ReclaimMode) -> ServiceConfig {
    ServiceConfig {
        reclaim: mode,
        ..ServiceConfig::default()
    }
}

/// A service over [`MockEngine`] with events discarded and no reaper.
pub fn mock_service(mode: ReclaimMode) -> (AllocatorService, Arc<MockEngine>) {
    let engine = Arc::new(MockEngine::new());
    let svc = AllocatorService::new(engine.clone(), Arc::new(NullSink), config(mode))
        .expect("default benchmark config is valid");
    (svc, engine)
}

/// A service over [`HostEngine`] with events discarded and no reaper.
pub fn host_service(mode: ReclaimMode) -> (AllocatorService, Arc<HostEngine>) {
    let engine = Arc::new(HostEngine::new());
    let svc = AllocatorService::new(engine.clone(), Arc::new(NullSink), config(mode))
        .expect("default benchmark config is valid");
    (svc, engine)
}

/// Allocate and drop `count` float buffers, cycling through
/// [`CHURN_LENGTHS`]. Returns the total bytes requested.
pub fn churn(svc: &AllocatorService, count: usize) -> usize {
    let mut bytes = 0;
    for i in 0..count {
        let len = CHURN_LENGTHS[i % CHURN_LENGTHS.len()];
        if let Ok(buf) = svc.allocate(len, DataType::Float) {
            bytes += buf.byte_len();
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn churn_leaves_nothing_live_in_scoped_mode() {
        let (svc, engine) = mock_service(ReclaimMode::Scoped);
        let bytes = churn(&svc, 8);
        assert_eq!(bytes, 2 * (16 + 256 + 1024 + 4096) * 4);
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn churn_defers_frees_in_tracked_mode() {
        let (svc, engine) = host_service(ReclaimMode::Tracked);
        churn(&svc, 4);
        assert_eq!(engine.live_allocations(), 4);
        assert_eq!(svc.poll().reaped, 4);
        assert_eq!(engine.live_allocations(), 0);
    }
}
