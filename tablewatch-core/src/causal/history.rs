//! Bounded history of state changes

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::types::StateChange;

/// Ring buffer of recorded state changes; oldest entries are evicted first
#[derive(Debug, Clone)]
pub struct StateHistory {
    entries: VecDeque<StateChange>,
    capacity: usize,
    next_seq: u64,
}

impl StateHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    /// Record a change, stamping it with the next sequence number
    pub fn push(&mut self, mut change: StateChange) {
        change.seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(change);
    }

    /// Continue numbering after `seq`, e.g. past changes held in loaded chains
    pub fn resume_after(&mut self, seq: u64) {
        self.next_seq = self.next_seq.max(seq.saturating_add(1));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateChange> {
        self.entries.iter()
    }

    /// Entries with `start <= timestamp <= end`, oldest first
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&StateChange> {
        let mut found: Vec<&StateChange> = self
            .entries
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .collect();
        found.sort_by_key(|c| c.timestamp);
        found
    }

    /// Earliest entry strictly before `before` matching `pred`
    pub fn earliest_before<F>(&self, before: DateTime<Utc>, pred: F) -> Option<&StateChange>
    where
        F: Fn(&StateChange) -> bool,
    {
        self.entries
            .iter()
            .filter(|c| c.timestamp < before && pred(c))
            .min_by_key(|c| c.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(ms: i64, path: &str) -> StateChange {
        StateChange::new(
            DateTime::from_timestamp_millis(ms).unwrap(),
            path,
            json!(null),
            json!(1),
            "test",
        )
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_evicts_oldest_on_overflow() {
        let mut history = StateHistory::new(3);
        for n in 0..5 {
            history.push(change(n, "game.round"));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().next().unwrap().timestamp, at(2));
    }

    #[test]
    fn test_push_assigns_increasing_seq() {
        let mut history = StateHistory::new(2);
        for _ in 0..3 {
            history.push(change(7, "game.pot"));
        }
        let seqs: Vec<_> = history.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![1, 2]);

        history.resume_after(10);
        history.push(change(8, "game.pot"));
        assert_eq!(history.iter().last().unwrap().seq, 11);
    }

    #[test]
    fn test_window_is_inclusive_and_sorted() {
        let mut history = StateHistory::new(10);
        history.push(change(30, "c"));
        history.push(change(10, "a"));
        history.push(change(20, "b"));
        history.push(change(40, "d"));

        let paths: Vec<_> = history
            .window(at(10), at(30))
            .iter()
            .map(|c| c.path.as_str())
            .collect();
        assert_eq!(paths, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_earliest_before() {
        let mut history = StateHistory::new(10);
        history.push(change(5, "db.pool"));
        history.push(change(3, "db.conn"));
        history.push(change(9, "db.pool"));

        let found = history.earliest_before(at(9), |c| c.path.contains("db")).unwrap();
        assert_eq!(found.timestamp, at(3));
        assert!(history.earliest_before(at(3), |_| true).is_none());
    }
}
