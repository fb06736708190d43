//! Integration test: allocation failure is surfaced synchronously and,
//! in tracked mode, triggers one reap pass that lets the next request
//! succeed.

use std::sync::Arc;
use std::time::Duration;

use ndbuf_core::{AllocError, DataType, EngineError, MemoryKind, MemorySink, NullSink};
use ndbuf_engine::{
    AllocatorService, BufferRequest, HostEngine, ReaperConfig, ReclaimMode, ServiceConfig,
    WorkspaceConfig, SAFETY_OFFSET,
};

fn tracked(engine: &Arc<HostEngine>) -> AllocatorService {
    let config = ServiceConfig {
        reclaim: ReclaimMode::Tracked,
        ..ServiceConfig::default()
    };
    AllocatorService::new(engine.clone(), Arc::new(NullSink), config).unwrap()
}

#[test]
fn failure_is_returned_not_retried() {
    let engine = Arc::new(HostEngine::with_limit(1024));
    let svc = AllocatorService::new(
        engine.clone(),
        Arc::new(MemorySink::new()),
        ServiceConfig::default(),
    )
    .unwrap();
    let _held = svc.allocate(1000, DataType::Int8).unwrap();

    let err = svc.allocate(100, DataType::Int8).unwrap_err();
    assert_eq!(
        err,
        AllocError::NativeAllocationFailure {
            requested: 100,
            source: EngineError::OutOfMemory {
                requested: 100,
                available: Some(24),
            },
        }
    );
    assert_eq!(svc.counters().get("allocation_failures"), 1);
    assert_eq!(engine.live_allocations(), 1);
}

#[test]
fn tracked_failure_reclaims_dead_buffers_for_the_next_request() {
    let engine = Arc::new(HostEngine::with_limit(1024));
    let svc = tracked(&engine);

    drop(svc.allocate(1000, DataType::Int8).unwrap());
    // Unreachable but not yet reaped.
    assert_eq!(engine.live_bytes(), 1000);

    assert!(svc.allocate(512, DataType::Int8).is_err());
    // The failure ran a reap pass.
    assert_eq!(engine.live_bytes(), 0);
    assert!(svc.registry().is_empty());

    let ok = svc.allocate(512, DataType::Int8).unwrap();
    assert_eq!(ok.byte_len(), 512);
}

#[test]
fn reachable_buffers_are_never_reaped_to_make_room() {
    let engine = Arc::new(HostEngine::with_limit(1024));
    let svc = tracked(&engine);
    let held = svc.allocate(1000, DataType::Int8).unwrap();

    assert!(svc.allocate(512, DataType::Int8).is_err());
    assert!(held.address().is_ok());
    assert_eq!(engine.live_bytes(), 1000);
}

#[test]
fn workspace_chunk_failure_is_surfaced() {
    let engine = Arc::new(HostEngine::with_limit(2048));
    let svc = tracked(&engine);
    let err = svc
        .create_workspace("big", WorkspaceConfig::new(4096))
        .unwrap_err();
    assert!(matches!(
        err,
        AllocError::NativeAllocationFailure { requested, .. } if requested == 4096 + SAFETY_OFFSET
    ));
    assert!(svc.tracker().tracker(&"big".into()).is_none());
}

#[test]
fn spill_failure_leaves_the_workspace_usable() {
    let engine = Arc::new(HostEngine::with_limit(64 + SAFETY_OFFSET + 16));
    let svc = tracked(&engine);
    let ws = svc
        .create_workspace("edge", WorkspaceConfig::new(64))
        .unwrap();
    let _inside = ws.alloc(64, DataType::Int8).unwrap();

    let err = ws.alloc(32, DataType::Int8).unwrap_err();
    assert!(matches!(err, AllocError::NativeAllocationFailure { .. }));
    assert_eq!(ws.tracker().spilled_count(), 0);

    ws.reset().unwrap();
    assert!(ws.alloc(64, DataType::Int8).is_ok());
}

#[test]
fn device_request_on_host_engine_fails_cleanly() {
    let engine = Arc::new(HostEngine::new());
    let svc = tracked(&engine);
    let err = svc
        .allocate_with(BufferRequest::new(8, DataType::Int8).in_memory(MemoryKind::Device))
        .unwrap_err();
    assert!(matches!(
        err,
        AllocError::NativeAllocationFailure {
            source: EngineError::Backend { .. },
            ..
        }
    ));
    assert_eq!(engine.live_allocations(), 0);
}

#[test]
fn request_beyond_the_heap_is_an_error_not_a_panic() {
    let engine = Arc::new(HostEngine::new());
    let svc = tracked(&engine);
    let huge = usize::MAX / 2 + 1;

    let err = svc.allocate(huge, DataType::Int8).unwrap_err();
    assert_eq!(
        err,
        AllocError::NativeAllocationFailure {
            requested: huge,
            source: EngineError::OutOfMemory {
                requested: huge,
                available: None,
            },
        }
    );
    assert_eq!(engine.live_bytes(), 0);
    assert_eq!(svc.counters().get("allocation_failures"), 1);

    let ok = svc.allocate(64, DataType::Int8).unwrap();
    assert_eq!(engine.live_bytes(), 64);
    drop(ok);
}

#[test]
fn failure_reaps_on_the_calling_thread_even_with_an_idle_reaper() {
    let engine = Arc::new(HostEngine::with_limit(1024));
    let config = ServiceConfig {
        reclaim: ReclaimMode::Tracked,
        reaper: Some(ReaperConfig {
            poll_interval: Duration::from_secs(3600),
            ..ReaperConfig::default()
        }),
        ..ServiceConfig::default()
    };
    let svc = AllocatorService::new(engine.clone(), Arc::new(NullSink), config).unwrap();
    assert!(svc.has_reaper());

    drop(svc.allocate(1000, DataType::Int8).unwrap());
    assert!(svc.allocate(512, DataType::Int8).is_err());
    // No wait: the reap happened before the error was returned.
    assert_eq!(engine.live_bytes(), 0);
    assert_eq!(svc.registry().stats().reaped, 1);
}
