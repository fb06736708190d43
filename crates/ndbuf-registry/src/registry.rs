//! Weakly-keyed deallocator registry.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use ndbuf_core::{Deallocatable, DeallocError, Deallocator, InstanceId, RegistryError};

/// Reports whether a registered wrapper is still reachable.
///
/// The registry never keeps wrappers alive; it only asks this probe.
pub trait Liveness: Send + Sync {
    /// `true` while the wrapper can still be used.
    fn is_live(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    fn is_live(&self) -> bool {
        self.strong_count() > 0
    }
}

struct Entry {
    probe: Box<dyn Liveness>,
    deallocator: Box<dyn Deallocator>,
}

/// Outcome of one reclamation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct ReapReport {
    /// Deallocators that completed successfully.
    pub reaped: usize,
    /// Deallocators that returned an error or panicked. Their entries
    /// were removed all the same.
    pub failed: usize,
}

impl ReapReport {
    /// Total deallocators invoked.
    pub fn invoked(&self) -> usize {
        self.reaped + self.failed
    }

    /// Add another pass's counts to this one.
    pub fn merge(&mut self, other: ReapReport) {
        self.reaped += other.reaped;
        self.failed += other.failed;
    }
}

/// Cumulative registry counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Entries currently registered.
    pub live: usize,
    /// Registrations accepted since creation.
    pub registered: u64,
    /// Deallocators that completed successfully.
    pub reaped: u64,
    /// Deallocators that failed.
    pub failed: u64,
}

/// Tracks live (wrapper identity → deallocator) associations.
///
/// Constructed explicitly and shared by `Arc`; there is no process-wide
/// instance. Dropping the registry drains it.
pub struct DeallocatorRegistry {
    entries: Mutex<IndexMap<InstanceId, Entry>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    registered: AtomicU64,
    reaped: AtomicU64,
    failed: AtomicU64,
}

// Compile-time assertion: DeallocatorRegistry must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<DeallocatorRegistry>();
};

impl Default for DeallocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeallocatorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
            registered: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh wrapper identity. Never returns the same id twice.
    pub fn next_value(&self) -> InstanceId {
        InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `wrapper` by weak reference alongside its deallocator.
    pub fn register<T>(&self, wrapper: &Arc<T>) -> Result<InstanceId, RegistryError>
    where
        T: Deallocatable + 'static,
    {
        let id = wrapper.unique_id();
        self.register_with(id, Box::new(Arc::downgrade(wrapper)), wrapper.deallocator())?;
        Ok(id)
    }

    /// Register an arbitrary liveness probe and deallocator under `id`.
    ///
    /// On error the deallocator is dropped without being invoked.
    pub fn register_with(
        &self,
        id: InstanceId,
        probe: Box<dyn Liveness>,
        deallocator: Box<dyn Deallocator>,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RegistryError::ShutDown);
        }
        if entries.contains_key(&id) {
            tracing::error!(instance = id.0, "duplicate deallocator registration");
            return Err(RegistryError::DuplicateRegistration { instance: id });
        }
        entries.insert(id, Entry { probe, deallocator });
        self.registered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Invoke the deallocator of every entry whose wrapper is no longer
    /// live, removing those entries.
    pub fn poll_and_reap(&self) -> ReapReport {
        let dead: SmallVec<[(InstanceId, Box<dyn Deallocator>); 16]> = {
            let mut entries = self.entries.lock();
            let ids: SmallVec<[InstanceId; 16]> = entries
                .iter()
                .filter(|(_, e)| !e.probe.is_live())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.swap_remove(&id).map(|e| (id, e.deallocator)))
                .collect()
        };
        let report = self.invoke_all(dead);
        if report.invoked() > 0 {
            tracing::debug!(
                reaped = report.reaped,
                failed = report.failed,
                "reaped unreachable buffers"
            );
        }
        report
    }

    /// Remove and invoke the entry for `id` immediately, regardless of
    /// liveness. Returns `None` if `id` is not registered (never was, or
    /// another path already reaped it).
    pub fn reap_now(&self, id: InstanceId) -> Option<Result<(), DeallocError>> {
        let entry = self.entries.lock().swap_remove(&id)?;
        Some(self.invoke(id, entry.deallocator))
    }

    /// Invoke every outstanding deallocator and refuse further
    /// registrations. Safe to call more than once.
    pub fn drain(&self) -> ReapReport {
        let all: Vec<(InstanceId, Entry)> = {
            let mut entries = self.entries.lock();
            self.shut_down.store(true, Ordering::Release);
            std::mem::take(&mut *entries).into_iter().collect()
        };
        if !all.is_empty() {
            tracing::debug!(outstanding = all.len(), "draining deallocator registry");
        }
        self.invoke_all(all.into_iter().map(|(id, e)| (id, e.deallocator)))
    }

    /// Whether `id` currently has a registered deallocator.
    pub fn is_registered(&self, id: InstanceId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`drain`](Self::drain) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Cumulative counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.len(),
            registered: self.registered.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn invoke_all(
        &self,
        batch: impl IntoIterator<Item = (InstanceId, Box<dyn Deallocator>)>,
    ) -> ReapReport {
        let mut report = ReapReport::default();
        for (id, deallocator) in batch {
            match self.invoke(id, deallocator) {
                Ok(()) => report.reaped += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    /// Run one deallocator, converting a panic into an error. Failures are
    /// logged and counted; the entry is already gone either way.
    fn invoke(&self, id: InstanceId, deallocator: Box<dyn Deallocator>) -> Result<(), DeallocError> {
        let result = panic::catch_unwind(AssertUnwindSafe(move || deallocator.deallocate()))
            .unwrap_or_else(|payload| {
                Err(DeallocError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            });
        match &result {
            Ok(()) => {
                self.reaped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(instance = id.0, "deallocator completed");
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(instance = id.0, error = %e, "deallocator failed; entry removed");
            }
        }
        result
    }
}

impl Drop for DeallocatorRegistry {
    fn drop(&mut self) {
        let _ = self.drain();
    }
}

impl std::fmt::Debug for DeallocatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeallocatorRegistry")
            .field("stats", &self.stats())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
