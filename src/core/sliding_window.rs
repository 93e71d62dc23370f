//! Per-key sliding windows over timestamped entries.
//!
//! Every rule detector keeps one window per grouping key (source IP, or
//! source IP plus user). Entries are stored oldest-first so eviction is a
//! prefix trim, O(k) in the number of evicted entries. An entry is retained
//! while `ts >= now - window_ms`; once evicted it is never re-inserted,
//! even if a later event carries an older timestamp.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Anything that carries an epoch-ms timestamp can live in a window
pub trait Timestamped {
    fn ts(&self) -> u64;
}

/// Time-bounded buffer of recent entries, oldest first
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    window_ms: u64,
    entries: VecDeque<T>,
}

impl<T: Timestamped> SlidingWindow<T> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: VecDeque::new(),
        }
    }

    /// Append an entry, then trim everything older than the window.
    ///
    /// The new entry's own timestamp is the evaluation instant: detectors
    /// evaluate thresholds at event time, not wall-clock time.
    pub fn record(&mut self, entry: T) {
        let now = entry.ts();
        self.entries.push_back(entry);
        self.evict(now);
    }

    /// Drop entries with `ts < now - window_ms` from the front.
    pub fn evict(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window_ms);
        while let Some(front) = self.entries.front() {
            if front.ts() < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current in-window entries, after evicting against `now`.
    pub fn snapshot(&mut self, now: u64) -> impl Iterator<Item = &T> {
        self.evict(now);
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest retained entry, if any.
    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }
}

/// One sliding window per grouping key
#[derive(Debug)]
pub struct KeyedWindows<K, T> {
    window_ms: u64,
    windows: HashMap<K, SlidingWindow<T>>,
}

impl<K: Eq + Hash, T: Timestamped> KeyedWindows<K, T> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            windows: HashMap::new(),
        }
    }

    pub fn window_mut(&mut self, key: K) -> &mut SlidingWindow<T> {
        let window_ms = self.window_ms;
        self.windows
            .entry(key)
            .or_insert_with(|| SlidingWindow::new(window_ms))
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Stamp(u64);

    impl Timestamped for Stamp {
        fn ts(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_eviction_is_exact_at_window_boundary() {
        let window_ms = 60_000;
        let now = 1_000_000;
        let mut window = SlidingWindow::new(window_ms);
        window.record(Stamp(now - window_ms - 1)); // one past the window
        window.record(Stamp(now - window_ms + 1)); // just inside
        window.record(Stamp(now - window_ms)); // exactly at the cutoff

        let retained: Vec<u64> = window.snapshot(now).map(|s| s.0).collect();
        assert_eq!(retained, vec![now - window_ms + 1, now - window_ms]);
    }

    #[test]
    fn test_record_evicts_using_entry_timestamp() {
        let mut window = SlidingWindow::new(1_000);
        window.record(Stamp(100));
        window.record(Stamp(500));
        // This entry pushes the cutoff to 1_200, evicting both earlier ones.
        window.record(Stamp(2_200));
        assert_eq!(window.len(), 1);
        assert_eq!(window.front(), Some(&Stamp(2_200)));
    }

    #[test]
    fn test_evicted_entries_never_resurrect() {
        let mut window = SlidingWindow::new(1_000);
        window.record(Stamp(100));
        window.record(Stamp(5_000));
        assert_eq!(window.len(), 1);
        // Evicting again at the same instant does not restore the trimmed
        // prefix.
        window.evict(5_000);
        assert_eq!(window.len(), 1);
        assert_eq!(window.front(), Some(&Stamp(5_000)));
    }

    #[test]
    fn test_keyed_windows_are_independent() {
        let mut windows: KeyedWindows<&str, Stamp> = KeyedWindows::new(1_000);
        windows.window_mut("a").record(Stamp(10));
        windows.window_mut("a").record(Stamp(20));
        windows.window_mut("b").record(Stamp(10));
        assert_eq!(windows.window_mut("a").len(), 2);
        assert_eq!(windows.window_mut("b").len(), 1);
        windows.clear();
        assert_eq!(windows.window_mut("a").len(), 0);
    }
}
