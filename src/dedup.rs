//! Bounded ring of recently seen report ids.
//!
//! The feed may deliver the same JMA report more than once (reissues,
//! reconnects). Applying a report is made idempotent by remembering the last
//! `capacity` ids and skipping any repeat. Memory stays bounded no matter how
//! long the dashboard runs.

use std::collections::VecDeque;

/// Default number of remembered report ids.
pub const DEFAULT_CAPACITY: usize = 256;

/// A bounded FIFO of report ids.
#[derive(Debug)]
pub struct ReportDedup {
    /// Oldest at front, newest at back
    seen: VecDeque<String>,
    capacity: usize,
    total_checked: u64,
    total_dupes: u64,
}

impl ReportDedup {
    /// Create a ring remembering up to `capacity` ids (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: VecDeque::with_capacity(capacity),
            capacity,
            total_checked: 0,
            total_dupes: 0,
        }
    }

    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Record `id` and report whether it was new.
    ///
    /// Returns `false` when the id is still in the ring.
    pub fn check_and_mark(&mut self, id: &str) -> bool {
        self.total_checked += 1;

        if self.seen.iter().any(|seen| seen == id) {
            self.total_dupes += 1;
            return false;
        }

        if self.seen.len() >= self.capacity {
            self.seen.pop_front();
        }
        self.seen.push_back(id.to_string());

        debug_assert!(self.seen.len() <= self.capacity);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Fraction of checked ids that were repeats (0.0 to 1.0).
    #[must_use]
    pub fn dupe_rate(&self) -> f64 {
        if self.total_checked == 0 {
            0.0
        } else {
            self.total_dupes as f64 / self.total_checked as f64
        }
    }
}

impl Default for ReportDedup {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids() {
        let mut ring = ReportDedup::new(10);

        assert!(ring.check_and_mark("a"));
        assert!(ring.check_and_mark("b"));
        assert_eq!(ring.len(), 2);
        assert!(ring.dupe_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_repeats_are_rejected() {
        let mut ring = ReportDedup::new(10);

        assert!(ring.check_and_mark("a"));
        assert!(!ring.check_and_mark("a"));
        assert!(!ring.check_and_mark("a"));

        assert_eq!(ring.len(), 1);
        assert!((ring.dupe_rate() - 2.0 / 3.0).abs() < 0.01);
    }

    #[test]
    fn test_bounded_capacity() {
        let mut ring = ReportDedup::new(2);

        ring.check_and_mark("a");
        ring.check_and_mark("b");
        ring.check_and_mark("c");
        assert_eq!(ring.len(), 2);

        // "a" was evicted, so it counts as new again
        assert!(ring.check_and_mark("a"));
        assert!(!ring.check_and_mark("c"));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut ring = ReportDedup::new(0);
        assert!(ring.check_and_mark("a"));
        assert!(!ring.check_and_mark("a"));
        assert_eq!(ring.len(), 1);
    }
}
