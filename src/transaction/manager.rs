// Transaction manager (spec.md §4.5, §4.7, §4.8): begin/beginRO,
// read/write, end/abort, and the blocked/waiting queues that make
// lock conflicts and site outages into ordinary control flow rather
// than errors.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::model::lock::LockMode;
use crate::sites::{LockOutcome, SiteManager};

use super::deadlock::DeadlockDetector;
use super::types::{Transaction, TransactionId, TransactionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

/// T is blocked directly on `blocker` holding a conflicting lock on
/// `var`. A single pending operation can produce several of these, one
/// per conflicting holder (spec.md §4.5).
#[derive(Debug, Clone)]
struct BlockedEntry {
    time: u64,
    txn_id: TransactionId,
    blocker: TransactionId,
    op: OpKind,
    var: String,
    value: Option<i64>,
}

/// T's pending operation is retried every tick because every site
/// hosting `var` is currently DOWN.
#[derive(Debug, Clone)]
struct WaitingEntry {
    time: u64,
    txn_id: TransactionId,
    op: OpKind,
    var: String,
    value: Option<i64>,
    read_only: bool,
}

pub struct TransactionManager {
    transactions: HashMap<TransactionId, Transaction>,
    name_to_id: HashMap<String, TransactionId>,
    next_id: TransactionId,
    clock: u64,
    blocked: Vec<BlockedEntry>,
    waiting: Vec<WaitingEntry>,
    /// Transactions aborted by a site failure; released and purged on
    /// the next `clear_aborted` prelude rather than immediately.
    pending_abort: Vec<TransactionId>,
    detector: DeadlockDetector,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            transactions: HashMap::new(),
            name_to_id: HashMap::new(),
            next_id: 1,
            clock: 0,
            blocked: Vec::new(),
            waiting: Vec::new(),
            pending_abort: Vec::new(),
            detector: DeadlockDetector::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn resolve(&self, name: &str) -> Option<TransactionId> {
        self.name_to_id.get(name).copied()
    }

    pub fn transaction(&self, name: &str) -> Option<&Transaction> {
        self.resolve(name).and_then(|id| self.transactions.get(&id))
    }

    pub fn transaction_by_id(&self, txn_id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&txn_id)
    }

    pub fn begin(&mut self, name: &str) -> TransactionId {
        let id = self.next_id;
        self.next_id += 1;
        self.transactions.insert(id, Transaction::new(id, name.to_string()));
        self.name_to_id.insert(name.to_string(), id);
        info!(txn = name, id, "begin");
        id
    }

    pub fn begin_read_only(&mut self, site_manager: &SiteManager, name: &str) -> TransactionId {
        let id = self.next_id;
        self.next_id += 1;
        let snapshot = site_manager.current_variables();
        self.transactions
            .insert(id, Transaction::new_read_only(id, name.to_string(), snapshot));
        self.name_to_id.insert(name.to_string(), id);
        info!(txn = name, id, "beginRO");
        id
    }

    pub fn write(&mut self, site_manager: &mut SiteManager, name: &str, var: &str, value: i64) {
        let Some(txn_id) = self.resolve(name) else {
            warn!(txn = name, "write on unknown transaction, ignored");
            return;
        };
        self.write_txn(site_manager, txn_id, var, value);
    }

    fn write_txn(&mut self, site_manager: &mut SiteManager, txn_id: TransactionId, var: &str, value: i64) {
        if self.is_terminated(txn_id) {
            return;
        }

        if site_manager.txn_holds(txn_id, var, LockMode::Write) {
            let txn = self.transactions.get_mut(&txn_id).expect("checked above");
            txn.uncommitted_writes.insert(var.to_string(), value);
            txn.status = TransactionStatus::Running;
            debug!(txn_id, var, value, "write buffered under held lock");
            return;
        }

        match site_manager.get_locks(txn_id, LockMode::Write, var) {
            LockOutcome::GotLock | LockOutcome::GotLockRecovering => {
                let txn = self.transactions.get_mut(&txn_id).expect("checked above");
                txn.uncommitted_writes.insert(var.to_string(), value);
                txn.status = TransactionStatus::Running;
                debug!(txn_id, var, value, "write granted");
            }
            LockOutcome::AllSitesDown => {
                self.enqueue_waiting(txn_id, OpKind::Write, var, Some(value), false);
            }
            LockOutcome::NoLock => {
                let holders = site_manager.conflicting_holders(txn_id, var, LockMode::Write);
                self.enqueue_blocked(txn_id, OpKind::Write, var, Some(value), &holders);
            }
        }
    }

    pub fn read(&mut self, site_manager: &mut SiteManager, name: &str, var: &str) {
        let Some(txn_id) = self.resolve(name) else {
            warn!(txn = name, "read on unknown transaction, ignored");
            return;
        };
        let read_only = self.transactions.get(&txn_id).is_some_and(|t| t.read_only);
        if read_only {
            self.read_only_txn(site_manager, txn_id, var);
        } else {
            self.read_txn(site_manager, txn_id, var);
        }
    }

    fn read_txn(&mut self, site_manager: &mut SiteManager, txn_id: TransactionId, var: &str) {
        if self.is_terminated(txn_id) {
            return;
        }

        if let Some(v) = self
            .transactions
            .get(&txn_id)
            .and_then(|t| t.uncommitted_writes.get(var).copied())
        {
            let txn = self.transactions.get_mut(&txn_id).expect("checked above");
            txn.record_read(var, v);
            txn.status = TransactionStatus::Running;
            info!(txn_id, var, value = v, "read own uncommitted write");
            return;
        }

        if site_manager.txn_holds(txn_id, var, LockMode::Read) {
            if let Some(v) = site_manager.current_value(var) {
                let txn = self.transactions.get_mut(&txn_id).expect("checked above");
                txn.record_read(var, v);
                info!(txn_id, var, value = v, "read under held lock");
            }
            let txn = self.transactions.get_mut(&txn_id).expect("checked above");
            txn.status = TransactionStatus::Running;
            return;
        }

        // Queue behind any transaction already blocked trying to write
        // this variable, rather than racing ahead of it.
        let writers: Vec<TransactionId> = self
            .blocked
            .iter()
            .filter(|e| e.var == var && e.op == OpKind::Write)
            .map(|e| e.txn_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if !writers.is_empty() {
            self.enqueue_blocked(txn_id, OpKind::Read, var, None, &writers);
            return;
        }

        match site_manager.get_locks(txn_id, LockMode::Read, var) {
            LockOutcome::GotLock | LockOutcome::GotLockRecovering => {
                let value = site_manager.current_value(var);
                let txn = self.transactions.get_mut(&txn_id).expect("checked above");
                if let Some(v) = value {
                    txn.record_read(var, v);
                    info!(txn_id, var, value = v, "read granted");
                }
                txn.status = TransactionStatus::Running;
            }
            LockOutcome::AllSitesDown => {
                self.enqueue_waiting(txn_id, OpKind::Read, var, None, false);
            }
            LockOutcome::NoLock => {
                let holders = site_manager.conflicting_holders(txn_id, var, LockMode::Read);
                self.enqueue_blocked(txn_id, OpKind::Read, var, None, &holders);
            }
        }
    }

    fn read_only_txn(&mut self, site_manager: &SiteManager, txn_id: TransactionId, var: &str) {
        if self.is_terminated(txn_id) {
            return;
        }
        let already = self
            .transactions
            .get(&txn_id)
            .and_then(|t| t.snapshot.as_ref())
            .and_then(|s| s.get(var).copied());
        if let Some(v) = already {
            let txn = self.transactions.get_mut(&txn_id).expect("checked above");
            txn.record_read(var, v);
            txn.status = TransactionStatus::Running;
            info!(txn_id, var, value = v, "read-only snapshot read");
            return;
        }
        // Absent from the frozen snapshot: every copy was down at
        // beginRO time, so no commit could have landed on it since.
        // Resolving it now, once some copy is visible again, is still
        // consistent with the snapshot taken at begin.
        if let Some(v) = site_manager.current_value(var) {
            let txn = self.transactions.get_mut(&txn_id).expect("checked above");
            txn.snapshot.get_or_insert_with(HashMap::new).insert(var.to_string(), v);
            txn.record_read(var, v);
            txn.status = TransactionStatus::Running;
            info!(txn_id, var, value = v, "read-only snapshot completed lazily");
        } else {
            self.enqueue_waiting(txn_id, OpKind::Read, var, None, true);
        }
    }

    pub fn end(&mut self, site_manager: &mut SiteManager, name: &str) {
        let Some(txn_id) = self.resolve(name) else {
            warn!(txn = name, "end on unknown transaction, ignored");
            return;
        };
        if self.is_terminated(txn_id) {
            return;
        }
        let writes = self.transactions[&txn_id].uncommitted_writes.clone();
        for (var, value) in &writes {
            site_manager.apply_commit_write(var, *value);
        }
        site_manager.release_all_locks_for(txn_id);
        let txn = self.transactions.get_mut(&txn_id).expect("checked above");
        txn.status = TransactionStatus::Committed;
        info!(txn_id, txn = name, "committed");
        self.purge_queues(txn_id);

        // Commit can unblock others right away, without waiting for the
        // next tick's preludes (spec.md §4.5).
        self.detect_and_clear_deadlocks(site_manager);
        self.blocked_to_waiting();
        self.try_waiting(site_manager);
    }

    pub fn abort_by_name(&mut self, site_manager: &mut SiteManager, name: &str) {
        let Some(txn_id) = self.resolve(name) else {
            warn!(txn = name, "abort on unknown transaction, ignored");
            return;
        };
        self.abort(site_manager, txn_id);
    }

    pub fn abort(&mut self, site_manager: &mut SiteManager, txn_id: TransactionId) {
        if self.is_terminated(txn_id) {
            return;
        }
        site_manager.release_all_locks_for(txn_id);
        if let Some(txn) = self.transactions.get_mut(&txn_id) {
            txn.status = TransactionStatus::Aborted;
            info!(txn_id, txn = %txn.name, "aborted");
        }
        self.purge_queues(txn_id);
    }

    fn is_terminated(&self, txn_id: TransactionId) -> bool {
        self.transactions
            .get(&txn_id)
            .map(|t| t.status.is_terminated())
            .unwrap_or(true)
    }

    fn purge_queues(&mut self, txn_id: TransactionId) {
        self.blocked.retain(|e| e.txn_id != txn_id);
        self.waiting.retain(|e| e.txn_id != txn_id);
    }

    /// Marks transactions that held a lock on a site which just failed
    /// as ABORTED. The remaining bookkeeping (lock release everywhere,
    /// queue purge) is deferred to the next `clear_aborted` prelude
    /// (spec.md §4.9).
    pub fn notify_site_failure(&mut self, txn_ids: Vec<TransactionId>) {
        for txn_id in txn_ids {
            if let Some(txn) = self.transactions.get_mut(&txn_id) {
                if !txn.status.is_terminated() {
                    txn.status = TransactionStatus::Aborted;
                    if !self.pending_abort.contains(&txn_id) {
                        self.pending_abort.push(txn_id);
                    }
                }
            }
        }
    }

    /// Prelude: finishes bookkeeping for transactions a site failure
    /// already marked ABORTED.
    pub fn clear_aborted(&mut self, site_manager: &mut SiteManager) {
        let pending = std::mem::take(&mut self.pending_abort);
        for txn_id in pending {
            site_manager.release_all_locks_for(txn_id);
            self.purge_queues(txn_id);
        }
    }

    /// Prelude: resolves every deadlock cycle currently in the
    /// wait-for graph, aborting the youngest transaction in each cycle
    /// until the graph is acyclic (spec.md §4.6).
    pub fn detect_and_clear_deadlocks(&mut self, site_manager: &mut SiteManager) {
        loop {
            let edges: Vec<(TransactionId, TransactionId)> =
                self.blocked.iter().map(|e| (e.txn_id, e.blocker)).collect();
            let Some(cycle) = self.detector.find_cycle(&edges) else {
                break;
            };
            let victim = self.detector.select_victim(&cycle);
            info!(victim, ?cycle, "deadlock detected, aborting youngest");
            self.abort(site_manager, victim);
        }
    }

    /// Prelude: promotes BLOCKED transactions whose every blocker has
    /// now terminated to WAITING (spec.md §4.7).
    pub fn blocked_to_waiting(&mut self) {
        let mut by_txn: HashMap<TransactionId, Vec<usize>> = HashMap::new();
        for (i, e) in self.blocked.iter().enumerate() {
            by_txn.entry(e.txn_id).or_default().push(i);
        }

        let mut promote: Vec<(TransactionId, OpKind, String, Option<i64>)> = Vec::new();
        let mut remove_idx: Vec<usize> = Vec::new();
        for (txn_id, idxs) in by_txn {
            let all_terminated = idxs
                .iter()
                .all(|&i| self.is_terminated(self.blocked[i].blocker));
            if all_terminated {
                let sample = &self.blocked[idxs[0]];
                promote.push((txn_id, sample.op, sample.var.clone(), sample.value));
                remove_idx.extend(idxs);
            }
        }

        remove_idx.sort_unstable_by(|a, b| b.cmp(a));
        for i in remove_idx {
            self.blocked.remove(i);
        }

        for (txn_id, op, var, value) in promote {
            let read_only = self.transactions.get(&txn_id).is_some_and(|t| t.read_only);
            self.enqueue_waiting(txn_id, op, &var, value, read_only);
        }
    }

    /// Prelude: retries every waiting operation, oldest first
    /// (spec.md §4.8). Entries whose transaction resolves stay
    /// resolved; entries that must wait again are re-enqueued by the
    /// retried operation itself.
    pub fn try_waiting(&mut self, site_manager: &mut SiteManager) {
        self.waiting.sort_by_key(|e| e.time);
        let entries = std::mem::take(&mut self.waiting);
        for e in entries {
            if self.is_terminated(e.txn_id) {
                continue;
            }
            if let Some(txn) = self.transactions.get_mut(&e.txn_id) {
                txn.status = TransactionStatus::Running;
            }
            match (e.read_only, e.op) {
                (true, OpKind::Read) => self.read_only_txn(site_manager, e.txn_id, &e.var),
                (false, OpKind::Read) => self.read_txn(site_manager, e.txn_id, &e.var),
                (false, OpKind::Write) => {
                    let value = e.value.expect("a queued write always carries a value");
                    self.write_txn(site_manager, e.txn_id, &e.var, value);
                }
                (true, OpKind::Write) => unreachable!("read-only transactions never write"),
            }
        }
    }

    fn enqueue_waiting(
        &mut self,
        txn_id: TransactionId,
        op: OpKind,
        var: &str,
        value: Option<i64>,
        read_only: bool,
    ) {
        if self.waiting.iter().any(|e| e.txn_id == txn_id && e.var == var && e.op == op) {
            return;
        }
        let time = self.tick();
        info!(txn_id, var, ?op, time, "waiting: all hosting sites down");
        self.waiting.push(WaitingEntry {
            time,
            txn_id,
            op,
            var: var.to_string(),
            value,
            read_only,
        });
        if let Some(txn) = self.transactions.get_mut(&txn_id) {
            txn.status = TransactionStatus::Waiting;
        }
    }

    fn enqueue_blocked(
        &mut self,
        txn_id: TransactionId,
        op: OpKind,
        var: &str,
        value: Option<i64>,
        blockers: &[TransactionId],
    ) {
        for &blocker in blockers {
            let time = self.tick();
            info!(txn_id, blocker, var, ?op, time, "blocked");
            self.blocked.push(BlockedEntry {
                time,
                txn_id,
                blocker,
                op,
                var: var.to_string(),
                value,
            });
        }
        if let Some(txn) = self.transactions.get_mut(&txn_id) {
            txn.status = TransactionStatus::Blocked;
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_env() -> (TransactionManager, SiteManager) {
        (TransactionManager::new(), SiteManager::new(10, 20))
    }

    #[test]
    fn write_then_read_sees_own_uncommitted_write() {
        let (mut tm, mut sm) = new_env();
        tm.begin("T1");
        tm.write(&mut sm, "T1", "x4", 99);
        tm.read(&mut sm, "T1", "x4");
        assert_eq!(tm.transaction("T1").unwrap().reads["x4"], vec![99]);
    }

    #[test]
    fn commit_makes_write_visible_to_a_later_transaction() {
        let (mut tm, mut sm) = new_env();
        tm.begin("T1");
        tm.write(&mut sm, "T1", "x4", 99);
        tm.end(&mut sm, "T1");
        assert_eq!(sm.current_value("x4"), Some(99));

        tm.begin("T2");
        tm.read(&mut sm, "T2", "x4");
        assert_eq!(tm.transaction("T2").unwrap().reads["x4"], vec![99]);
    }

    #[test]
    fn read_only_transaction_is_isolated_from_later_writes() {
        let (mut tm, mut sm) = new_env();
        tm.begin_read_only(&sm, "T1");
        tm.begin("T2");
        tm.write(&mut sm, "T2", "x4", 99);
        tm.end(&mut sm, "T2");

        tm.read(&mut sm, "T1", "x4");
        assert_eq!(tm.transaction("T1").unwrap().reads["x4"], vec![40]);
    }

    #[test]
    fn conflicting_write_blocks_then_resolves_on_commit() {
        let (mut tm, mut sm) = new_env();
        tm.begin("T1");
        tm.begin("T2");
        tm.read(&mut sm, "T1", "x4");
        tm.write(&mut sm, "T2", "x4", 55);
        assert_eq!(tm.transaction("T2").unwrap().status, TransactionStatus::Blocked);

        tm.end(&mut sm, "T1");
        assert_eq!(tm.transaction("T2").unwrap().status, TransactionStatus::Running);
        assert_eq!(tm.transaction("T2").unwrap().uncommitted_writes["x4"], 55);
    }

    #[test]
    fn deadlock_cycle_aborts_the_youngest_transaction() {
        let (mut tm, mut sm) = new_env();
        tm.begin("T1");
        tm.begin("T2");
        tm.write(&mut sm, "T1", "x2", 1);
        tm.write(&mut sm, "T2", "x4", 2);
        // T1 waits on T2's x4 lock; T2 waits on T1's x2 lock: a cycle.
        tm.write(&mut sm, "T1", "x4", 3);
        tm.write(&mut sm, "T2", "x2", 4);
        assert_eq!(tm.transaction("T1").unwrap().status, TransactionStatus::Blocked);
        assert_eq!(tm.transaction("T2").unwrap().status, TransactionStatus::Blocked);

        tm.detect_and_clear_deadlocks(&mut sm);
        // T2 is younger (larger id) and is the victim.
        assert_eq!(tm.transaction("T2").unwrap().status, TransactionStatus::Aborted);
        tm.blocked_to_waiting();
        tm.try_waiting(&mut sm);
        assert_eq!(tm.transaction("T1").unwrap().status, TransactionStatus::Running);
    }

    #[test]
    fn write_waits_when_every_hosting_site_is_down() {
        let (mut tm, mut sm) = new_env();
        let host = 1 + 1 % 10;
        sm.fail(host).unwrap();
        tm.begin("T1");
        tm.write(&mut sm, "T1", "x1", 7);
        assert_eq!(tm.transaction("T1").unwrap().status, TransactionStatus::Waiting);

        sm.recover(host).unwrap();
        tm.try_waiting(&mut sm);
        assert_eq!(tm.transaction("T1").unwrap().status, TransactionStatus::Running);
    }

    #[test]
    fn read_queues_behind_a_pending_write_rather_than_racing_it() {
        let (mut tm, mut sm) = new_env();
        tm.begin("T1");
        tm.begin("T2");
        tm.begin("T3");
        tm.read(&mut sm, "T1", "x3");
        tm.write(&mut sm, "T2", "x3", 30);
        tm.read(&mut sm, "T3", "x3");

        assert_eq!(tm.transaction("T2").unwrap().status, TransactionStatus::Blocked);
        assert_eq!(tm.transaction("T3").unwrap().status, TransactionStatus::Blocked);

        tm.end(&mut sm, "T1");
        // T2's write unblocks first; T3 then unblocks behind it, not
        // before it.
        assert_eq!(tm.transaction("T2").unwrap().status, TransactionStatus::Running);
        tm.end(&mut sm, "T2");
        assert_eq!(tm.transaction("T3").unwrap().status, TransactionStatus::Running);
        assert_eq!(tm.transaction("T3").unwrap().reads["x3"], vec![30]);
    }

    #[test]
    fn site_failure_aborts_lock_holders_on_the_next_clear_aborted() {
        let (mut tm, mut sm) = new_env();
        tm.begin("T1");
        tm.write(&mut sm, "T1", "x1", 1);
        let host = 1 + 1 % 10;
        let affected = sm.fail(host).unwrap();
        tm.notify_site_failure(affected);
        assert_eq!(tm.transaction("T1").unwrap().status, TransactionStatus::Aborted);
        tm.clear_aborted(&mut sm);
        assert!(tm.transaction("T1").unwrap().status.is_terminated());
    }
}
