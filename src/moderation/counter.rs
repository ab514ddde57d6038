//! Sliding time-window event counter
//!
//! Every detector is built on this counter: spam trackers record one entry per
//! qualifying message, raid trackers record the joining user with each entry.

use chrono::{DateTime, Duration, Utc};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Timestamped events, counted over a caller-supplied window
#[derive(Debug)]
pub struct WindowedCounter<T = ()> {
    entries: RwLock<Vec<(DateTime<Utc>, T)>>,
}

impl<T> Default for WindowedCounter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WindowedCounter<T> {
    /// Create an empty counter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Record an event carrying `value`
    pub fn record_with(&self, at: DateTime<Utc>, value: T) {
        self.write().push((at, value));
    }

    /// Number of events no older than `window` at `now`
    pub fn count_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        self.read()
            .iter()
            .filter(|(at, _)| now - *at <= window)
            .count()
    }

    /// Remove every event matching `predicate`, returning how many were removed
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&DateTime<Utc>, &T) -> bool,
    {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|(at, value)| !predicate(at, value));
        before - entries.len()
    }

    /// Drop events that can no longer fall inside `window`
    pub fn prune_older_than(&self, window: Duration, now: DateTime<Utc>) -> usize {
        self.remove_where(|at, _| now - *at > window)
    }

    /// Remove every event
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Total number of stored events
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(DateTime<Utc>, T)>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<(DateTime<Utc>, T)>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> WindowedCounter<T> {
    /// Payloads of the events no older than `window` at `now`, oldest first
    pub fn values_within(&self, window: Duration, now: DateTime<Utc>) -> Vec<T> {
        let mut within: Vec<_> = self
            .read()
            .iter()
            .filter(|(at, _)| now - *at <= window)
            .cloned()
            .collect();
        within.sort_by_key(|(at, _)| *at);
        within.into_iter().map(|(_, value)| value).collect()
    }
}

impl WindowedCounter {
    /// Record a bare event
    pub fn record(&self, at: DateTime<Utc>) {
        self.record_with(at, ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_sliding_window() {
        let counter: WindowedCounter = WindowedCounter::new();
        let t0 = base();
        for offset in [0, 10, 20, 50, 59] {
            counter.record(t0 + Duration::seconds(offset));
        }

        let window = Duration::seconds(60);
        assert_eq!(counter.count_within(window, t0 + Duration::seconds(59)), 5);
        // the event at t0 is exactly 60s old and still counts
        assert_eq!(counter.count_within(window, t0 + Duration::seconds(60)), 5);
        assert_eq!(counter.count_within(window, t0 + Duration::seconds(61)), 4);
        assert_eq!(counter.count_within(window, t0 + Duration::seconds(115)), 2);
        assert_eq!(counter.count_within(window, t0 + Duration::seconds(200)), 0);
        assert_eq!(counter.len(), 5);
    }

    #[test]
    fn test_remove_where_and_prune() {
        let counter: WindowedCounter = WindowedCounter::new();
        let t0 = base();
        for offset in 0..10 {
            counter.record(t0 + Duration::seconds(offset));
        }

        let undone = counter.remove_where(|at, _| *at == t0 + Duration::seconds(9));
        assert_eq!(undone, 1);
        assert_eq!(counter.len(), 9);

        let pruned = counter.prune_older_than(Duration::seconds(3), t0 + Duration::seconds(8));
        assert_eq!(pruned, 5);
        assert_eq!(counter.len(), 4);

        counter.clear();
        assert!(counter.is_empty());
    }

    #[test]
    fn test_values_within_are_ordered() {
        let counter = WindowedCounter::new();
        let t0 = base();
        counter.record_with(t0 + Duration::seconds(5), "late");
        counter.record_with(t0, "early");
        counter.record_with(t0 - Duration::seconds(120), "stale");

        let values = counter.values_within(Duration::seconds(60), t0 + Duration::seconds(10));
        assert_eq!(values, vec!["early", "late"]);
    }

    #[test]
    fn test_concurrent_recording() {
        let counter = Arc::new(WindowedCounter::<()>::new());
        let t0 = base();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        counter.record(t0 + Duration::milliseconds(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.count_within(Duration::seconds(1), t0), 800);
    }
}
