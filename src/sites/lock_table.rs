// Per-site lock table (spec.md §4.1).
//
// A mapping variable -> ordered sequence of distinct locks, with the
// invariants: at most one WRITE lock per variable; a WRITE lock
// excludes READ locks from other transactions; multiple READ locks
// from distinct transactions may coexist.

use std::collections::HashMap;

use crate::model::lock::{Lock, LockMode};
use crate::transaction::types::TransactionId;

#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<String, Vec<Lock>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `(mode, txn_id)` on `variable` if not already present.
    pub fn set(&mut self, variable: &str, mode: LockMode, txn_id: TransactionId) {
        let entry = self.locks.entry(variable.to_string()).or_default();
        let lock = Lock::new(mode, txn_id);
        if !entry.contains(&lock) {
            entry.push(lock);
        }
    }

    pub fn is_locked(&self, variable: &str) -> bool {
        self.locks.get(variable).is_some_and(|v| !v.is_empty())
    }

    pub fn is_write_locked(&self, variable: &str) -> bool {
        self.locks
            .get(variable)
            .is_some_and(|v| v.iter().any(|l| l.mode == LockMode::Write))
    }

    /// Returns true if `txn_id` holds a lock on `variable`. When `mode`
    /// is given, only that mode counts.
    pub fn is_locked_by(&self, variable: &str, txn_id: TransactionId, mode: Option<LockMode>) -> bool {
        self.locks.get(variable).is_some_and(|v| {
            v.iter()
                .any(|l| l.txn_id == txn_id && mode.map_or(true, |m| l.mode == m))
        })
    }

    /// Removes a specific lock from `variable`. Returns whether a lock
    /// was actually removed.
    pub fn clear(&mut self, lock: Lock, variable: &str) -> bool {
        let Some(entry) = self.locks.get_mut(variable) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| *l != lock);
        let removed = entry.len() != before;
        if entry.is_empty() {
            self.locks.remove(variable);
        }
        removed
    }

    /// Removes every lock held by `txn_id` across all variables on this
    /// site. Returns the variables that were touched.
    pub fn clear_transaction(&mut self, txn_id: TransactionId) -> Vec<String> {
        let mut touched = Vec::new();
        self.locks.retain(|variable, entry| {
            let before = entry.len();
            entry.retain(|l| l.txn_id != txn_id);
            if entry.len() != before {
                touched.push(variable.clone());
            }
            !entry.is_empty()
        });
        touched
    }

    pub fn len(&self, variable: &str) -> usize {
        self.locks.get(variable).map_or(0, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn holders(&self, variable: &str) -> &[Lock] {
        self.locks.get(variable).map_or(&[], |v| v.as_slice())
    }

    /// Every lock currently held on this site, across all variables.
    pub fn holders_snapshot(&self) -> Vec<Lock> {
        self.locks.values().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_readers_coexist() {
        let mut lt = LockTable::new();
        lt.set("x1", LockMode::Read, 1);
        lt.set("x1", LockMode::Read, 2);
        assert_eq!(lt.len("x1"), 2);
        assert!(!lt.is_write_locked("x1"));
    }

    #[test]
    fn duplicate_set_is_a_no_op() {
        let mut lt = LockTable::new();
        lt.set("x1", LockMode::Read, 1);
        lt.set("x1", LockMode::Read, 1);
        assert_eq!(lt.len("x1"), 1);
    }

    #[test]
    fn clear_drops_empty_entry() {
        let mut lt = LockTable::new();
        lt.set("x1", LockMode::Write, 1);
        assert!(lt.clear(Lock::new(LockMode::Write, 1), "x1"));
        assert!(!lt.is_locked("x1"));
        assert!(lt.is_empty());
    }

    #[test]
    fn clear_nonexistent_lock_returns_false() {
        let mut lt = LockTable::new();
        lt.set("x1", LockMode::Write, 1);
        assert!(!lt.clear(Lock::new(LockMode::Write, 2), "x1"));
    }

    #[test]
    fn clear_transaction_removes_across_variables() {
        let mut lt = LockTable::new();
        lt.set("x1", LockMode::Read, 1);
        lt.set("x2", LockMode::Write, 1);
        lt.set("x2", LockMode::Read, 2);

        let touched = lt.clear_transaction(1);
        assert_eq!(touched.len(), 2);
        assert!(!lt.is_locked("x1"));
        assert!(lt.is_locked_by("x2", 2, None));
    }

    #[test]
    fn is_locked_by_respects_mode_filter() {
        let mut lt = LockTable::new();
        lt.set("x1", LockMode::Read, 1);
        assert!(lt.is_locked_by("x1", 1, None));
        assert!(lt.is_locked_by("x1", 1, Some(LockMode::Read)));
        assert!(!lt.is_locked_by("x1", 1, Some(LockMode::Write)));
    }
}
