// A site: a `DataManager` plus a status and recovered set (spec.md §4.3).

use std::collections::HashSet;

use tracing::info;

use crate::model::lock::{Lock, LockMode};
use crate::model::variable::{is_replicated, parse_variable_name};
use crate::transaction::types::TransactionId;

use super::data_manager::DataManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteStatus {
    Up,
    Down,
    Recovering,
}

pub struct Site {
    pub id: usize,
    pub status: SiteStatus,
    pub data_manager: DataManager,
    /// Subset of resident variables currently safe to read.
    recovered: HashSet<String>,
}

impl Site {
    pub fn new(id: usize, num_sites: usize, num_variables: usize) -> Self {
        let data_manager = DataManager::new(id, num_sites, num_variables);
        let recovered = data_manager
            .variables()
            .map(|(name, _)| name.clone())
            .collect();
        Self {
            id,
            status: SiteStatus::Up,
            data_manager,
            recovered,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, SiteStatus::Up | SiteStatus::Recovering)
    }

    pub fn is_recovered(&self, variable: &str) -> bool {
        self.recovered.contains(variable)
    }

    /// Transitions UP/RECOVERING -> DOWN. Returns the transactions that
    /// held any lock on this site so the caller can abort them.
    pub fn fail(&mut self) -> Vec<TransactionId> {
        info!(site = self.id, "site failing");
        self.status = SiteStatus::Down;
        self.recovered.clear();
        let mut affected: Vec<TransactionId> = self
            .data_manager
            .lock_table
            .holders_snapshot()
            .into_iter()
            .map(|l| l.txn_id)
            .collect();
        affected.sort_unstable();
        affected.dedup();
        // Every lock hosted here is dropped on failure (spec.md §4.3).
        for txn_id in &affected {
            self.data_manager.clear_transaction(*txn_id);
        }
        affected
    }

    /// Transitions DOWN -> RECOVERING. Odd-indexed (single-copy)
    /// variables rejoin the recovered set immediately; even-indexed
    /// replicas stay absent until a post-recovery commit writes them.
    pub fn recover(&mut self) {
        info!(site = self.id, "site recovering");
        self.status = SiteStatus::Recovering;
        for (name, _) in self.data_manager.variables() {
            if let Some(index) = parse_variable_name(name) {
                if !is_replicated(index) {
                    self.recovered.insert(name.clone());
                }
            }
        }
        self.maybe_promote_to_up();
    }

    /// RECOVERING -> UP once every resident variable is recovered.
    fn maybe_promote_to_up(&mut self) {
        if self.status == SiteStatus::Recovering
            && self.data_manager.variables().all(|(name, _)| self.recovered.contains(name))
        {
            self.status = SiteStatus::Up;
        }
    }

    pub fn get_lock(&mut self, txn_id: TransactionId, mode: LockMode, variable: &str) -> bool {
        if !self.is_available() {
            return false;
        }
        self.data_manager.get_lock(txn_id, mode, variable)
    }

    pub fn clear_lock(&mut self, lock: Lock, variable: &str) -> bool {
        self.data_manager.clear_lock(lock, variable)
    }

    /// Applies a committed write. No-op on a DOWN site. On a RECOVERING
    /// site, applying the write is precisely what makes the variable
    /// readable again (spec.md §4.5), so the variable joins the
    /// recovered set as part of this call.
    pub fn apply_commit_write(&mut self, variable: &str, value: i64) -> bool {
        if !self.is_available() {
            return false;
        }
        self.data_manager.force_write(variable, value);
        self.recovered.insert(variable.to_string());
        self.maybe_promote_to_up();
        true
    }

    /// Dumps this site's variables as `(name, value, available)` triples.
    pub fn dump(&self) -> Vec<(String, i64, bool)> {
        let mut rows: Vec<_> = self
            .data_manager
            .variables()
            .map(|(name, value)| (name.clone(), *value, self.recovered.contains(name)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_site_is_up_and_fully_recovered() {
        let site = Site::new(2, 10, 20);
        assert_eq!(site.status, SiteStatus::Up);
        assert!(site.is_recovered("x4"));
    }

    #[test]
    fn fail_clears_recovered_set_and_locks() {
        let mut site = Site::new(2, 10, 20);
        assert!(site.get_lock(1, LockMode::Write, "x4"));
        let affected = site.fail();
        assert_eq!(affected, vec![1]);
        assert_eq!(site.status, SiteStatus::Down);
        assert!(!site.is_recovered("x4"));
    }

    #[test]
    fn recover_restores_odd_indexed_immediately_not_even() {
        let mut site = Site::new(2, 10, 20);
        site.fail();
        site.recover();
        // x1 is odd (single-copy, home site 2) -> immediately recovered.
        assert!(site.is_recovered("x1"));
        // x4 is even -> absent until a commit writes it.
        assert!(!site.is_recovered("x4"));
        assert_eq!(site.status, SiteStatus::Recovering);
    }

    #[test]
    fn recover_promotes_straight_to_up_when_all_odd() {
        // Site 2 (10 sites, 20 vars) hosts x1, x11, and all even vars —
        // it isn't all-odd, so exercise a site whose only resident
        // variables besides replicas are odd by constructing a smaller
        // config where this is representative: instead verify that a
        // write-driven recovery of the remaining even variables
        // eventually promotes the site to UP.
        let mut site = Site::new(2, 10, 20);
        site.fail();
        site.recover();
        assert_eq!(site.status, SiteStatus::Recovering);
        for (name, _) in site.data_manager.variables().map(|(n, v)| (n.clone(), *v)).collect::<Vec<_>>() {
            site.apply_commit_write(&name, 0);
        }
        assert_eq!(site.status, SiteStatus::Up);
    }

    #[test]
    fn commit_write_on_down_site_is_a_no_op() {
        let mut site = Site::new(2, 10, 20);
        site.fail();
        assert!(!site.apply_commit_write("x4", 99));
    }

    #[test]
    fn commit_write_recovers_the_variable() {
        let mut site = Site::new(2, 10, 20);
        site.fail();
        site.recover();
        assert!(!site.is_recovered("x4"));
        assert!(site.apply_commit_write("x4", 44));
        assert!(site.is_recovered("x4"));
    }
}
