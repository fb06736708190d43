//! Test utilities and mock engines for ndbuf development.
//!
//! - [`TestWrapper`]: a [`Deallocatable`] whose deallocator counts
//!   invocations and can be told to fail or panic.
//! - [`MockEngine`]: a [`NativeEngine`] that records every call, detects
//!   double frees, and can be told to fail allocations.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod engine;

pub use engine::MockEngine;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndbuf_core::{Deallocatable, DeallocError, Deallocator, InstanceId};

/// What a [`TestWrapper`]'s deallocator does when invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behaviour {
    /// Return `Ok(())`.
    Succeed,
    /// Return `Err(DeallocError::Failed)`.
    Fail,
    /// Panic.
    Panic,
}

/// Shared count of deallocator invocations.
#[derive(Clone, Debug, Default)]
pub struct FireCount(Arc<AtomicUsize>);

impl FireCount {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Minimal wrapper that owns no real memory.
///
/// The count is bumped before the configured behaviour runs, so failing
/// and panicking deallocators are counted as fired too.
pub struct TestWrapper {
    id: InstanceId,
    behaviour: Behaviour,
    fired: FireCount,
}

impl TestWrapper {
    pub fn new(id: InstanceId, behaviour: Behaviour) -> (Arc<Self>, FireCount) {
        let fired = FireCount::default();
        let w = Arc::new(Self {
            id,
            behaviour,
            fired: fired.clone(),
        });
        (w, fired)
    }
}

impl Deallocatable for TestWrapper {
    fn unique_id(&self) -> InstanceId {
        self.id
    }

    fn deallocator(&self) -> Box<dyn Deallocator> {
        let fired = self.fired.clone();
        let behaviour = self.behaviour;
        Box::new(move || {
            fired.bump();
            match behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => Err(DeallocError::Failed {
                    reason: "injected failure".into(),
                }),
                Behaviour::Panic => panic!("injected deallocator panic"),
            }
        })
    }
}
