//! Per-category timing samples.
//!
//! [`TimingHolder`] records samples under a writer lock and computes
//! aggregates under a reader lock, so reporting threads can read
//! concurrently with each other.
//!
//! Count, sum, average, minimum, and maximum cover every sample ever
//! recorded. Only the most recent `window` samples per category are
//! retained, and the median is taken over those. Sums saturate at
//! `u64::MAX`.
//!
//! Empty categories: `sum` is 0, `average` is 0.0, `count` is 0, and
//! `median`/`minimum`/`maximum`/`summary` return `None`.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Instant;

use parking_lot::RwLock;

/// Samples retained per category by [`TimingHolder::new`].
pub const DEFAULT_WINDOW: usize = 1024;

/// Aggregates of one category's samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimingSummary {
    /// Number of samples.
    pub count: usize,
    /// Sum of all samples, saturating.
    pub sum: u64,
    /// `sum / count`.
    pub average: f64,
    /// Middle retained sample; mean of the two middle samples for even
    /// counts.
    pub median: f64,
    /// Smallest sample.
    pub minimum: u64,
    /// Largest sample.
    pub maximum: u64,
}

#[derive(Debug)]
struct Series {
    recent: VecDeque<u64>,
    count: usize,
    sum: u128,
    minimum: u64,
    maximum: u64,
}

impl Series {
    fn new(window: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(window.min(DEFAULT_WINDOW)),
            count: 0,
            sum: 0,
            minimum: u64::MAX,
            maximum: 0,
        }
    }

    fn push(&mut self, value: u64, window: usize) {
        if self.recent.len() == window {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
        self.count = self.count.saturating_add(1);
        self.sum = self.sum.saturating_add(u128::from(value));
        self.minimum = self.minimum.min(value);
        self.maximum = self.maximum.max(value);
    }

    fn sum(&self) -> u64 {
        u64::try_from(self.sum).unwrap_or(u64::MAX)
    }

    fn average(&self) -> f64 {
        self.sum as f64 / self.count as f64
    }

    fn median(&self) -> f64 {
        let mut sorted: Vec<u64> = self.recent.iter().copied().collect();
        sorted.sort_unstable();
        median_of_sorted(&sorted)
    }
}

/// Timed samples keyed by category.
#[derive(Debug)]
pub struct TimingHolder<K = String> {
    series: RwLock<HashMap<K, Series>>,
    window: usize,
}

impl<K> Default for TimingHolder<K> {
    fn default() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }
}

impl<K> TimingHolder<K> {
    /// A holder that retains the last `window` samples of each category
    /// for the median. A zero window is treated as one.
    pub fn with_window(window: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            window: window.max(1),
        }
    }

    /// Samples retained per category.
    pub fn window(&self) -> usize {
        self.window
    }
}

impl<K: Eq + Hash> TimingHolder<K> {
    /// Create an empty holder with [`DEFAULT_WINDOW`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample under `category`.
    pub fn add(&self, category: K, value: u64) {
        let window = self.window;
        self.series
            .write()
            .entry(category)
            .or_insert_with(|| Series::new(window))
            .push(value, window);
    }

    /// Run `f`, recording its wall time in microseconds under `category`.
    pub fn time<R>(&self, category: K, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let out = f();
        let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.add(category, micros);
        out
    }

    /// Number of samples recorded in `category`.
    pub fn count(&self, category: &K) -> usize {
        self.series.read().get(category).map_or(0, |s| s.count)
    }

    /// Number of samples currently retained for `category`.
    pub fn retained(&self, category: &K) -> usize {
        self.series.read().get(category).map_or(0, |s| s.recent.len())
    }

    /// Sum of `category`'s samples; 0 when empty.
    pub fn sum(&self, category: &K) -> u64 {
        self.series.read().get(category).map_or(0, Series::sum)
    }

    /// Mean of `category`'s samples; 0.0 when empty.
    pub fn average(&self, category: &K) -> f64 {
        self.series.read().get(category).map_or(0.0, Series::average)
    }

    /// Median of the retained samples of `category`.
    pub fn median(&self, category: &K) -> Option<f64> {
        self.series.read().get(category).map(Series::median)
    }

    /// Smallest sample in `category`.
    pub fn minimum(&self, category: &K) -> Option<u64> {
        self.series.read().get(category).map(|s| s.minimum)
    }

    /// Largest sample in `category`.
    pub fn maximum(&self, category: &K) -> Option<u64> {
        self.series.read().get(category).map(|s| s.maximum)
    }

    /// All aggregates for `category` from one consistent read.
    pub fn summary(&self, category: &K) -> Option<TimingSummary> {
        let series = self.series.read();
        let s = series.get(category)?;
        Some(TimingSummary {
            count: s.count,
            sum: s.sum(),
            average: s.average(),
            median: s.median(),
            minimum: s.minimum,
            maximum: s.maximum,
        })
    }

    /// Drop every sample of every category.
    pub fn clear(&self) {
        self.series.write().clear();
    }
}

fn median_of_sorted(sorted: &[u64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn five_ten_fifteen() {
        let t = TimingHolder::new();
        t.add(key("h2d"), 5);
        t.add(key("h2d"), 10);
        t.add(key("h2d"), 15);

        assert_eq!(t.sum(&key("h2d")), 30);
        assert_eq!(t.average(&key("h2d")), 10.0);
        assert_eq!(t.maximum(&key("h2d")), Some(15));
        assert_eq!(t.minimum(&key("h2d")), Some(5));
        assert_eq!(t.median(&key("h2d")), Some(10.0));
    }

    #[test]
    fn empty_category_policy() {
        let t: TimingHolder = TimingHolder::new();
        let k = key("missing");
        assert_eq!(t.count(&k), 0);
        assert_eq!(t.sum(&k), 0);
        assert_eq!(t.average(&k), 0.0);
        assert_eq!(t.median(&k), None);
        assert_eq!(t.minimum(&k), None);
        assert_eq!(t.maximum(&k), None);
        assert!(t.summary(&k).is_none());
    }

    #[test]
    fn categories_are_independent() {
        let t = TimingHolder::new();
        t.add(key("a"), 1);
        t.add(key("b"), 100);
        assert_eq!(t.sum(&key("a")), 1);
        assert_eq!(t.sum(&key("b")), 100);
    }

    #[test]
    fn even_median_is_mean_of_middle_pair() {
        let t = TimingHolder::new();
        for v in [4, 1, 3, 2] {
            t.add(key("x"), v);
        }
        assert_eq!(t.median(&key("x")), Some(2.5));
    }

    #[test]
    fn summary_matches_individual_queries() {
        let t = TimingHolder::new();
        for v in [7, 3, 9] {
            t.add(key("x"), v);
        }
        let s = t.summary(&key("x")).unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.sum, 19);
        assert_eq!(s.minimum, 3);
        assert_eq!(s.maximum, 9);
        assert_eq!(s.median, 7.0);
    }

    #[test]
    fn time_records_a_sample() {
        let t = TimingHolder::new();
        let out = t.time(key("op"), || 41 + 1);
        assert_eq!(out, 42);
        assert_eq!(t.count(&key("op")), 1);
    }

    #[test]
    fn retention_is_bounded_but_totals_are_not() {
        let t = TimingHolder::with_window(4);
        for v in 1..=10u64 {
            t.add(key("x"), v);
        }
        assert_eq!(t.retained(&key("x")), 4);
        assert_eq!(t.count(&key("x")), 10);
        assert_eq!(t.sum(&key("x")), 55);
        assert_eq!(t.minimum(&key("x")), Some(1));
        assert_eq!(t.maximum(&key("x")), Some(10));
        // Median of the retained 7, 8, 9, 10.
        assert_eq!(t.median(&key("x")), Some(8.5));
    }

    #[test]
    fn saturated_samples_do_not_overflow_the_sum() {
        let t = TimingHolder::new();
        t.add(key("slow"), u64::MAX);
        t.add(key("slow"), u64::MAX);
        assert_eq!(t.sum(&key("slow")), u64::MAX);
        let s = t.summary(&key("slow")).unwrap();
        assert_eq!(s.sum, u64::MAX);
        assert_eq!(s.maximum, u64::MAX);
        assert!(s.average >= u64::MAX as f64);
    }

    #[test]
    fn zero_window_keeps_the_latest_sample() {
        let t = TimingHolder::with_window(0);
        assert_eq!(t.window(), 1);
        t.add(key("x"), 3);
        t.add(key("x"), 9);
        assert_eq!(t.retained(&key("x")), 1);
        assert_eq!(t.median(&key("x")), Some(9.0));
    }

    proptest! {
        #[test]
        fn bounds_bracket_average(values in prop::collection::vec(0u64..1_000_000, 1..64)) {
            let t = TimingHolder::new();
            for &v in &values {
                t.add(0u8, v);
            }
            let s = t.summary(&0u8).unwrap();
            prop_assert_eq!(s.count, values.len());
            prop_assert_eq!(s.sum, values.iter().sum::<u64>());
            prop_assert!(s.minimum as f64 <= s.average && s.average <= s.maximum as f64);
            prop_assert!(s.minimum as f64 <= s.median && s.median <= s.maximum as f64);
        }
    }
}
