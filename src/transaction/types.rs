// Transaction identity and state (spec.md §3).

use std::collections::HashMap;

/// Transactions are identified by a monotonically increasing counter
/// assigned at `begin`/`beginRO`. Younger = larger id.
pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Running,
    Waiting,
    Blocked,
    Aborted,
    Committed,
}

impl TransactionStatus {
    pub fn is_terminated(&self) -> bool {
        matches!(self, TransactionStatus::Aborted | TransactionStatus::Committed)
    }
}

/// Per-transaction state.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub name: String,
    pub read_only: bool,
    pub status: TransactionStatus,
    /// Writes not yet committed, keyed by variable name.
    pub uncommitted_writes: HashMap<String, i64>,
    /// Values this transaction has observed, keyed by variable name.
    pub reads: HashMap<String, Vec<i64>>,
    /// Frozen read-only snapshot captured at `beginRO`, if any.
    pub snapshot: Option<HashMap<String, i64>>,
}

impl Transaction {
    pub fn new(id: TransactionId, name: String) -> Self {
        Self {
            id,
            name,
            read_only: false,
            status: TransactionStatus::Running,
            uncommitted_writes: HashMap::new(),
            reads: HashMap::new(),
            snapshot: None,
        }
    }

    pub fn new_read_only(id: TransactionId, name: String, snapshot: HashMap<String, i64>) -> Self {
        Self {
            id,
            name,
            read_only: true,
            status: TransactionStatus::Running,
            uncommitted_writes: HashMap::new(),
            reads: HashMap::new(),
            snapshot: Some(snapshot),
        }
    }

    pub fn record_read(&mut self, variable: &str, value: i64) {
        self.reads.entry(variable.to_string()).or_default().push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn younger_transactions_have_larger_ids() {
        let older = Transaction::new(1, "T1".to_string());
        let younger = Transaction::new(2, "T2".to_string());
        assert!(younger.id > older.id);
    }

    #[test]
    fn read_only_transaction_freezes_snapshot() {
        let mut snap = HashMap::new();
        snap.insert("x2".to_string(), 20);
        let txn = Transaction::new_read_only(1, "T1".to_string(), snap.clone());
        assert!(txn.read_only);
        assert_eq!(txn.snapshot, Some(snap));
    }

    #[test]
    fn terminated_statuses() {
        assert!(TransactionStatus::Aborted.is_terminated());
        assert!(TransactionStatus::Committed.is_terminated());
        assert!(!TransactionStatus::Running.is_terminated());
    }
}
