// Per-site data manager (spec.md §4.2): hosts the variables placed on
// this site plus their lock table, and applies reads/writes under
// locks.

use std::collections::HashMap;

use tracing::debug;

use crate::model::lock::{Lock, LockMode};
use crate::model::variable::{initial_value, is_replicated};
use crate::transaction::types::TransactionId;

use super::lock_table::LockTable;

pub struct DataManager {
    pub site_id: usize,
    /// Committed values, keyed by variable name. Only variables placed
    /// on this site (per the replication rule) are present.
    values: HashMap<String, i64>,
    pub lock_table: LockTable,
}

impl DataManager {
    /// Builds the data manager for `site_id`, populating every
    /// variable placed on this site under the fixed 1..=num_variables
    /// range and num_sites replica rule.
    pub fn new(site_id: usize, num_sites: usize, num_variables: usize) -> Self {
        let mut values = HashMap::new();
        for index in 1..=num_variables {
            let hosted = is_replicated(index) || (1 + index % num_sites) == site_id;
            if hosted {
                values.insert(format!("x{}", index), initial_value(index));
            }
        }
        Self {
            site_id,
            values,
            lock_table: LockTable::new(),
        }
    }

    pub fn has_variable(&self, variable: &str) -> bool {
        self.values.contains_key(variable)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.values.iter()
    }

    pub fn get_value(&self, variable: &str) -> Option<i64> {
        self.values.get(variable).copied()
    }

    /// Attempts to grant `mode` on `variable` to `txn_id`. Returns
    /// whether the lock was granted; when it was, the lock table has
    /// already recorded it.
    pub fn get_lock(&mut self, txn_id: TransactionId, mode: LockMode, variable: &str) -> bool {
        if self.lock_table.is_locked_by(variable, txn_id, None) {
            // Upgrade or same-mode re-entry: only safe when T is the sole holder.
            if self.lock_table.len(variable) == 1 {
                self.lock_table.set(variable, mode, txn_id);
                return true;
            }
            return false;
        }

        let compatible = match mode {
            LockMode::Write => !self.lock_table.is_locked(variable),
            LockMode::Read => !self.lock_table.is_write_locked(variable),
        };

        if compatible {
            self.lock_table.set(variable, mode, txn_id);
            true
        } else {
            debug!(
                site = self.site_id,
                %variable, %txn_id, %mode, "lock request refused"
            );
            false
        }
    }

    /// Applies a write. Only meaningful when `txn_id` holds a WRITE
    /// lock on `variable`; callers are expected to have already checked
    /// this (the transaction manager never calls `write` otherwise) but
    /// it is re-verified here as the data manager's own invariant.
    pub fn write(&mut self, txn_id: TransactionId, variable: &str, value: i64) {
        if self.lock_table.is_locked_by(variable, txn_id, Some(LockMode::Write)) {
            self.values.insert(variable.to_string(), value);
        }
    }

    /// Applies a commit write unconditionally (used for available-copies
    /// writes to RECOVERING replicas that never held the WRITE lock
    /// because they were down when it was acquired, per spec.md §4.5).
    pub fn force_write(&mut self, variable: &str, value: i64) {
        self.values.insert(variable.to_string(), value);
    }

    pub fn clear_lock(&mut self, lock: Lock, variable: &str) -> bool {
        self.lock_table.clear(lock, variable)
    }

    pub fn clear_transaction(&mut self, txn_id: TransactionId) -> Vec<String> {
        self.lock_table.clear_transaction(txn_id)
    }
}
