//! Integration test: concurrent allocation, drop, explicit release, and
//! background reaping never free a block twice or leak one.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use ndbuf_core::{DataType, MemorySink, NullSink};
use ndbuf_engine::{AllocatorService, ReaperConfig, ReclaimMode, ServiceConfig, WorkspaceConfig};
use ndbuf_test_utils::MockEngine;

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    f()
}

fn tracked_with_reaper(engine: &Arc<MockEngine>) -> AllocatorService {
    let config = ServiceConfig {
        reclaim: ReclaimMode::Tracked,
        reaper: Some(ReaperConfig {
            poll_interval: Duration::from_millis(5),
            ..ReaperConfig::default()
        }),
        ..ServiceConfig::default()
    };
    AllocatorService::new(engine.clone(), Arc::new(NullSink), config).unwrap()
}

#[test]
fn reaper_collects_buffers_dropped_on_many_threads() {
    let engine = Arc::new(MockEngine::new());
    let svc = Arc::new(tracked_with_reaper(&engine));
    assert!(svc.has_reaper());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                for i in 0..250 {
                    let buf = svc.allocate(1 + (t * i) % 64, DataType::Int8).unwrap();
                    if i % 3 == 0 {
                        let _ = buf.release();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(10), || {
        engine.live_handles() == 0
    }));
    assert_eq!(engine.allocations(), 2_000);
    assert_eq!(engine.frees(), 2_000);
    assert_eq!(engine.double_frees(), 0);
    assert!(svc.registry().is_empty());
}

#[test]
fn scoped_drops_race_with_polls() {
    let engine = Arc::new(MockEngine::new());
    let svc = Arc::new(
        AllocatorService::new(
            engine.clone(),
            Arc::new(MemorySink::new()),
            ServiceConfig::default(),
        )
        .unwrap(),
    );

    let poller = {
        let svc = Arc::clone(&svc);
        thread::spawn(move || {
            for _ in 0..500 {
                let _ = svc.poll();
            }
        })
    };
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || {
                for _ in 0..500 {
                    let a = svc.allocate(8, DataType::Float).unwrap();
                    let b = a.clone();
                    drop(a);
                    drop(b);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    poller.join().unwrap();

    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.frees(), 2_000);
    assert_eq!(engine.double_frees(), 0);
}

#[test]
fn shared_workspace_is_freed_once() {
    let engine = Arc::new(MockEngine::new());
    let svc = AllocatorService::new(engine.clone(), Arc::new(NullSink), ServiceConfig::default())
        .unwrap();
    let ws = svc
        .create_workspace("shared", WorkspaceConfig::new(1 << 14))
        .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let ws = ws.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    // Spills once the chunk is full.
                    let _ = ws.alloc(100, DataType::Int8).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(ws.tracker().allocation_count(), 400);
    assert_eq!(ws.tracker().spilled_count(), 400 - (1 << 14) / 128);

    drop(ws);
    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.double_frees(), 0);
}

#[test]
fn shutdown_during_activity_leaves_nothing_behind() {
    let engine = Arc::new(MockEngine::new());
    let svc = tracked_with_reaper(&engine);
    let kept: Vec<_> = (0..100)
        .map(|_| svc.allocate(4, DataType::Int32).unwrap())
        .collect();
    for _ in 0..100 {
        drop(svc.allocate(4, DataType::Int32).unwrap());
    }

    let _ = svc.shutdown();
    assert_eq!(engine.live_handles(), 0);
    assert!(kept.iter().all(|b| b.is_released()));
    drop(kept);
    assert_eq!(engine.double_frees(), 0);
}

// ── Property: every allocation is freed exactly once ────────────────

#[derive(Clone, Debug)]
enum Op {
    Allocate(usize),
    Clone(usize),
    Drop(usize),
    Release(usize),
    Poll,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..256).prop_map(Op::Allocate),
        any::<usize>().prop_map(Op::Clone),
        any::<usize>().prop_map(Op::Drop),
        any::<usize>().prop_map(Op::Release),
        Just(Op::Poll),
    ]
}

proptest! {
    #[test]
    fn every_allocation_freed_exactly_once(
        tracked in any::<bool>(),
        ops in prop::collection::vec(arb_op(), 1..64),
    ) {
        let engine = Arc::new(MockEngine::new());
        let config = ServiceConfig {
            reclaim: if tracked { ReclaimMode::Tracked } else { ReclaimMode::Scoped },
            ..ServiceConfig::default()
        };
        let svc = AllocatorService::new(engine.clone(), Arc::new(NullSink), config).unwrap();
        let mut held = Vec::new();

        for op in ops {
            match op {
                Op::Allocate(len) => held.push(svc.allocate(len, DataType::Int8).unwrap()),
                Op::Clone(i) if !held.is_empty() => {
                    let b = held[i % held.len()].clone();
                    held.push(b);
                }
                Op::Drop(i) if !held.is_empty() => {
                    let idx = i % held.len();
                    drop(held.swap_remove(idx));
                }
                Op::Release(i) if !held.is_empty() => {
                    let _ = held[i % held.len()].release();
                }
                Op::Poll => {
                    let _ = svc.poll();
                }
                _ => {}
            }
            prop_assert_eq!(engine.double_frees(), 0);
        }

        let allocations = engine.allocations();
        drop(held);
        let _ = svc.shutdown();
        prop_assert_eq!(engine.frees(), allocations);
        prop_assert_eq!(engine.double_frees(), 0);
        prop_assert_eq!(engine.live_handles(), 0);
    }
}
