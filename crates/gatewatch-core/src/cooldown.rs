//! Per-subject alert cooldown.
//!
//! The window slides: every check re-arms it, including checks that end up
//! suppressed. This bounds alert rate for a subject that stays in view.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_COOLDOWN_SECS: u32 = 30;

/// Subject -> last alert-eligible Unix timestamp (seconds).
pub struct CooldownTracker {
    window_secs: i64,
    last_seen: Mutex<HashMap<String, i64>>,
}

impl CooldownTracker {
    pub fn new(window_secs: u32) -> Self {
        Self {
            window_secs: i64::from(window_secs),
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// True iff `subject` was checked less than the window ago. Records `now`
    /// as the subject's last time whatever the answer.
    ///
    /// Checks can arrive out of order; the recorded time never moves
    /// backwards, and a check older than the recorded time is suppressed.
    pub fn should_suppress(&self, subject: &str, now: i64) -> bool {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        match last_seen.get_mut(subject) {
            Some(last) => {
                let suppress = now - *last < self.window_secs;
                *last = (*last).max(now);
                suppress
            }
            None => {
                last_seen.insert(subject.to_string(), now);
                false
            }
        }
    }

    /// Last recorded check for `subject`, if any.
    pub fn last_seen(&self, subject: &str) -> Option<i64> {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject)
            .copied()
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_sight_is_not_suppressed() {
        let tracker = CooldownTracker::new(30);
        assert!(!tracker.should_suppress("alice", 1_000));
        assert_eq!(tracker.last_seen("alice"), Some(1_000));
    }

    #[test]
    fn test_within_window_is_suppressed() {
        let tracker = CooldownTracker::new(30);
        assert!(!tracker.should_suppress("alice", 1_000));
        assert!(tracker.should_suppress("alice", 1_029));
    }

    #[test]
    fn test_window_boundary_allows() {
        let tracker = CooldownTracker::new(30);
        tracker.should_suppress("alice", 1_000);
        assert!(!tracker.should_suppress("alice", 1_030));
    }

    #[test]
    fn test_suppressed_attempt_rearms_window() {
        let tracker = CooldownTracker::new(30);
        assert!(!tracker.should_suppress("Unknown", 1_000));
        assert!(tracker.should_suppress("Unknown", 1_020));
        // 1_040 is past the first alert's window but inside the re-armed one
        assert!(tracker.should_suppress("Unknown", 1_040));
        assert_eq!(tracker.last_seen("Unknown"), Some(1_040));
        assert!(!tracker.should_suppress("Unknown", 1_070));
    }

    #[test]
    fn test_out_of_order_check_keeps_latest_time() {
        let tracker = CooldownTracker::new(30);
        assert!(!tracker.should_suppress("Unknown", 105));
        // A slow request stamped earlier lands after the newer one
        assert!(tracker.should_suppress("Unknown", 100));
        assert_eq!(tracker.last_seen("Unknown"), Some(105));
        assert!(tracker.should_suppress("Unknown", 131));
        assert!(!tracker.should_suppress("Unknown", 161));
    }

    #[test]
    fn test_subjects_are_independent() {
        let tracker = CooldownTracker::new(30);
        tracker.should_suppress("alice", 1_000);
        assert!(!tracker.should_suppress("bob", 1_001));
        assert!(tracker.should_suppress("alice", 1_002));
    }

    #[test]
    fn test_concurrent_checks_allow_exactly_one() {
        let tracker = Arc::new(CooldownTracker::new(60));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.should_suppress("Unknown", 5_000))
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|suppressed| !suppressed)
            .count();
        assert_eq!(allowed, 1);
    }
}
