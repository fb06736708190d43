//! Monotonic per-category event counters.
//!
//! The category map sits behind a reader/writer lock; each count is an
//! `AtomicU64`. Once a category exists, increments only take the read
//! lock, so concurrent increments to different (or the same) categories
//! never serialize on a writer.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;

/// Thread-safe counters keyed by category name.
#[derive(Debug, Default)]
pub struct AllocationCounters {
    counters: RwLock<IndexMap<String, AtomicU64>>,
}

impl AllocationCounters {
    /// Create an empty set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to `category`. Returns the new value.
    pub fn increment(&self, category: &str) -> u64 {
        self.add(category, 1)
    }

    /// Add `delta` to `category`. Returns the new value.
    pub fn add(&self, category: &str, delta: u64) -> u64 {
        {
            let counters = self.counters.read();
            if let Some(c) = counters.get(category) {
                return c.fetch_add(delta, Ordering::Relaxed) + delta;
            }
        }
        // Slow path: first increment for this category. Another thread may
        // have inserted it between the two lock acquisitions.
        let mut counters = self.counters.write();
        let c = counters
            .entry(category.to_owned())
            .or_insert_with(|| AtomicU64::new(0));
        c.fetch_add(delta, Ordering::Relaxed) + delta
    }

    /// Current value of `category`, 0 if it was never incremented.
    pub fn get(&self, category: &str) -> u64 {
        self.counters
            .read()
            .get(category)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Copy of all counters in first-seen order.
    ///
    /// Not linearizable across categories: concurrent increments may or may
    /// not be reflected.
    pub fn snapshot(&self) -> CounterSnapshot {
        let counters = self.counters.read();
        CounterSnapshot {
            values: counters
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect(),
        }
    }

    /// Remove all categories.
    pub fn clear(&self) {
        self.counters.write().clear();
    }
}

/// Point-in-time copy of [`AllocationCounters`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    values: IndexMap<String, u64>,
}

impl CounterSnapshot {
    /// Value of `category`, 0 if absent.
    pub fn get(&self, category: &str) -> u64 {
        self.values.get(category).copied().unwrap_or(0)
    }

    /// Iterate `(category, value)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no categories.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum over all categories.
    pub fn total(&self) -> u64 {
        self.values.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unknown_category_reads_zero() {
        let c = AllocationCounters::new();
        assert_eq!(c.get("allocations"), 0);
        assert!(c.snapshot().is_empty());
    }

    #[test]
    fn increment_returns_new_value() {
        let c = AllocationCounters::new();
        assert_eq!(c.increment("allocations"), 1);
        assert_eq!(c.increment("allocations"), 2);
        assert_eq!(c.add("bytes", 512), 512);
        assert_eq!(c.get("allocations"), 2);
    }

    #[test]
    fn snapshot_keeps_first_seen_order() {
        let c = AllocationCounters::new();
        c.increment("b");
        c.increment("a");
        c.increment("b");
        let snap = c.snapshot();
        let order: Vec<(&str, u64)> = snap.iter().collect();
        assert_eq!(order, vec![("b", 2), ("a", 1)]);
        assert_eq!(snap.total(), 3);
    }

    #[test]
    fn concurrent_increments_are_exact() {
        const THREADS: usize = 8;
        const PER_THREAD: u64 = 10_000;

        let c = Arc::new(AllocationCounters::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        c.increment("allocations");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(
            c.snapshot().get("allocations"),
            THREADS as u64 * PER_THREAD
        );
    }

    #[test]
    fn concurrent_first_insert_races_do_not_lose_counts() {
        let c = Arc::new(AllocationCounters::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    let key = format!("category_{}", i % 4);
                    for _ in 0..100 {
                        c.increment(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = c.snapshot();
        assert_eq!(snap.len(), 4);
        for i in 0..4 {
            assert_eq!(snap.get(&format!("category_{i}")), 400);
        }
    }

    #[test]
    fn clear_removes_everything() {
        let c = AllocationCounters::new();
        c.increment("x");
        c.clear();
        assert_eq!(c.get("x"), 0);
    }
}
