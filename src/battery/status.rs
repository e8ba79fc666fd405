//! # Status Tracker
//!
//! Keeps the latest two controller status messages so pollers can detect a
//! transition without re-rendering an unchanged status on every tick.

use chrono::{DateTime, Utc};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One received status message
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub device: usize,
    pub text: String,
    /// Arrival order, starting at 1
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StatusHistory {
    current: Option<StatusEntry>,
    previous: Option<StatusEntry>,
    last_sequence: u64,
}

/// Current and previous status message
#[derive(Debug, Default)]
pub struct StatusTracker {
    history: RwLock<StatusHistory>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new status message, returning its sequence number
    pub fn update(&self, device: usize, text: impl Into<String>) -> u64 {
        let mut history = self.write();
        history.last_sequence += 1;
        let entry = StatusEntry {
            device,
            text: text.into(),
            sequence: history.last_sequence,
            received_at: Utc::now(),
        };
        history.previous = history.current.replace(entry);
        history.last_sequence
    }

    pub fn current(&self) -> Option<StatusEntry> {
        self.read().current.clone()
    }

    pub fn previous(&self) -> Option<StatusEntry> {
        self.read().previous.clone()
    }

    /// Whether the current status differs in arrival from the previous one
    ///
    /// False before any status arrived, true after the first one.
    pub fn has_changed(&self) -> bool {
        let history = self.read();
        match (&history.current, &history.previous) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(previous)) => current.sequence != previous.sequence,
        }
    }

    /// Current status if it arrived after `last_seen` (a sequence number)
    ///
    /// Pass 0 to get any status.
    pub fn since(&self, last_seen: u64) -> Option<StatusEntry> {
        self.read()
            .current
            .as_ref()
            .filter(|entry| entry.sequence > last_seen)
            .cloned()
    }

    /// Number of status messages received so far
    pub fn count(&self) -> u64 {
        self.read().last_sequence
    }

    fn read(&self) -> RwLockReadGuard<'_, StatusHistory> {
        self.history.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusHistory> {
        self.history.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker() {
        let tracker = StatusTracker::new();
        assert!(tracker.current().is_none());
        assert!(!tracker.has_changed());
        assert!(tracker.since(0).is_none());
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_first_status_is_a_change() {
        let tracker = StatusTracker::new();
        let seq = tracker.update(2, "Balancing");
        assert_eq!(seq, 1);
        assert!(tracker.has_changed());
        assert_eq!(tracker.current().unwrap().text, "Balancing");
        assert!(tracker.previous().is_none());
    }

    #[test]
    fn test_update_shifts_current_to_previous() {
        let tracker = StatusTracker::new();
        tracker.update(0, "first");
        tracker.update(1, "second");

        let current = tracker.current().unwrap();
        let previous = tracker.previous().unwrap();
        assert_eq!(current.text, "second");
        assert_eq!(current.device, 1);
        assert_eq!(previous.text, "first");
        assert!(current.sequence > previous.sequence);
        assert!(current.received_at >= previous.received_at);
        assert!(tracker.has_changed());
    }

    #[test]
    fn test_repeated_text_still_counts_as_new_arrival() {
        let tracker = StatusTracker::new();
        tracker.update(0, "All right");
        tracker.update(0, "All right");
        assert!(tracker.has_changed());
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn test_since_filters_already_seen() {
        let tracker = StatusTracker::new();
        let seen = tracker.update(0, "Fault in cell 3");
        assert!(tracker.since(seen).is_none());
        assert_eq!(tracker.since(0).unwrap().sequence, seen);

        tracker.update(0, "Cleared");
        assert_eq!(tracker.since(seen).unwrap().text, "Cleared");
    }
}
