// Site manager (spec.md §4.4, §4.9): mediates lock acquisition and
// value retrieval across replicas, and routes fail/recover/dump.

use std::collections::HashMap;

use tracing::info;

use crate::error::{EngineError, Result};
use crate::model::lock::{Lock, LockMode};
use crate::model::variable::{is_replicated, parse_variable_name, variable_name};
use crate::transaction::types::TransactionId;

use super::site::{Site, SiteStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    GotLock,
    GotLockRecovering,
    NoLock,
    AllSitesDown,
}

pub struct SiteManager {
    /// 1-indexed; `sites[0]` is unused.
    sites: Vec<Option<Site>>,
    num_sites: usize,
    num_variables: usize,
}

impl SiteManager {
    pub fn new(num_sites: usize, num_variables: usize) -> Self {
        let mut sites = Vec::with_capacity(num_sites + 1);
        sites.push(None);
        for id in 1..=num_sites {
            sites.push(Some(Site::new(id, num_sites, num_variables)));
        }
        Self {
            sites,
            num_sites,
            num_variables,
        }
    }

    fn check_site_index(&self, index: usize) -> Result<()> {
        if index == 0 || index > self.num_sites {
            return Err(EngineError::InvalidSiteIndex(index, self.num_sites));
        }
        Ok(())
    }

    pub fn site(&self, index: usize) -> &Site {
        self.sites[index].as_ref().expect("site index in range")
    }

    fn site_mut(&mut self, index: usize) -> &mut Site {
        self.sites[index].as_mut().expect("site index in range")
    }

    /// Sites hosting `variable`, per the placement rule.
    pub(crate) fn hosting_sites(&self, variable: &str) -> Vec<usize> {
        let Some(index) = parse_variable_name(variable) else {
            return Vec::new();
        };
        if is_replicated(index) {
            (1..=self.num_sites).collect()
        } else {
            vec![1 + index % self.num_sites]
        }
    }

    /// Attempts to acquire `mode` on `variable` for `txn_id` across
    /// replicas (spec.md §4.4).
    pub fn get_locks(&mut self, txn_id: TransactionId, mode: LockMode, variable: &str) -> LockOutcome {
        let Some(var_index) = parse_variable_name(variable) else {
            return LockOutcome::NoLock;
        };
        let single_copy = !is_replicated(var_index);
        let hosts = self.hosting_sites(variable);

        match mode {
            LockMode::Read => {
                let mut any_up = false;
                for site_id in &hosts {
                    let site = self.site_mut(*site_id);
                    match site.status {
                        SiteStatus::Down => continue,
                        SiteStatus::Recovering => {
                            if !site.is_recovered(variable) {
                                continue;
                            }
                            any_up = true;
                            if site.get_lock(txn_id, mode, variable) {
                                return if single_copy {
                                    LockOutcome::GotLockRecovering
                                } else {
                                    LockOutcome::GotLock
                                };
                            }
                        }
                        SiteStatus::Up => {
                            any_up = true;
                            if site.get_lock(txn_id, mode, variable) {
                                return LockOutcome::GotLock;
                            }
                        }
                    }
                }
                if !any_up {
                    LockOutcome::AllSitesDown
                } else {
                    LockOutcome::NoLock
                }
            }
            LockMode::Write => {
                let candidates: Vec<usize> = hosts
                    .iter()
                    .copied()
                    .filter(|id| self.site(*id).is_available())
                    .collect();

                if candidates.is_empty() {
                    return LockOutcome::AllSitesDown;
                }

                // Dry run: every candidate must be willing to grant
                // before any of them actually records the lock, so a
                // refusal never leaves a partial grant behind.
                let all_would_grant = candidates
                    .iter()
                    .all(|id| would_grant(self.site_mut(*id), txn_id, mode, variable));

                if !all_would_grant {
                    return LockOutcome::NoLock;
                }

                for id in &candidates {
                    let granted = self.site_mut(*id).get_lock(txn_id, mode, variable);
                    debug_assert!(granted, "dry run guaranteed this grant");
                }
                LockOutcome::GotLock
            }
        }
    }

    /// Current visible value of one variable, or `None` if no UP or
    /// RECOVERING-and-recovered replica can answer.
    pub fn current_value(&self, variable: &str) -> Option<i64> {
        let hosts = self.hosting_sites(variable);
        for id in &hosts {
            let site = self.site(*id);
            if site.status == SiteStatus::Up {
                if let Some(v) = site.data_manager.get_value(variable) {
                    return Some(v);
                }
            }
        }
        for id in &hosts {
            let site = self.site(*id);
            if site.status == SiteStatus::Recovering && site.is_recovered(variable) {
                if let Some(v) = site.data_manager.get_value(variable) {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Snapshot of every currently visible variable, used at `beginRO`.
    pub fn current_variables(&self) -> HashMap<String, i64> {
        let mut out = HashMap::new();
        for index in 1..=self.num_variables {
            let name = variable_name(index);
            if let Some(v) = self.current_value(&name) {
                out.insert(name, v);
            }
        }
        out
    }

    pub fn clear_lock(&mut self, site_id: usize, lock: Lock, variable: &str) -> bool {
        self.site_mut(site_id).clear_lock(lock, variable)
    }

    /// Does `txn_id` already hold `mode` on `variable` at any hosting site?
    pub fn txn_holds(&self, txn_id: TransactionId, variable: &str, mode: LockMode) -> bool {
        self.hosting_sites(variable)
            .iter()
            .any(|id| self.site(*id).data_manager.lock_table.is_locked_by(variable, txn_id, Some(mode)))
    }

    /// Distinct transactions (other than `txn_id`) holding a lock on
    /// `variable` at any hosting site that would conflict with a fresh
    /// `mode` request: for WRITE, any holder; for READ, WRITE holders only.
    pub fn conflicting_holders(&self, txn_id: TransactionId, variable: &str, mode: LockMode) -> Vec<TransactionId> {
        let mut ids: Vec<TransactionId> = self
            .hosting_sites(variable)
            .iter()
            .flat_map(|id| self.site(*id).data_manager.lock_table.holders(variable).to_vec())
            .filter(|l| l.txn_id != txn_id && (mode == LockMode::Write || l.mode == LockMode::Write))
            .map(|l| l.txn_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Releases every lock `txn_id` holds, on every site regardless of
    /// status (used when a transaction is aborted).
    pub fn release_all_locks_for(&mut self, txn_id: TransactionId) {
        for id in 1..=self.num_sites {
            self.site_mut(id).data_manager.clear_transaction(txn_id);
        }
    }

    /// Applies a committed write to every currently available
    /// (UP or RECOVERING) replica of `variable`.
    pub fn apply_commit_write(&mut self, variable: &str, value: i64) {
        for id in self.hosting_sites(variable) {
            self.site_mut(id).apply_commit_write(variable, value);
        }
    }

    pub fn fail(&mut self, index: usize) -> Result<Vec<TransactionId>> {
        self.check_site_index(index)?;
        info!(site = index, "fail");
        Ok(self.site_mut(index).fail())
    }

    pub fn recover(&mut self, index: usize) -> Result<()> {
        self.check_site_index(index)?;
        info!(site = index, "recover");
        self.site_mut(index).recover();
        Ok(())
    }

    /// Dumps every UP/RECOVERING site.
    pub fn dump_all(&self) -> Vec<(usize, SiteStatus, Vec<(String, i64, bool)>)> {
        (1..=self.num_sites)
            .filter(|id| self.site(*id).is_available())
            .map(|id| {
                let site = self.site(id);
                (id, site.status, site.dump())
            })
            .collect()
    }

    pub fn dump_site(&self, index: usize) -> Result<(usize, SiteStatus, Vec<(String, i64, bool)>)> {
        self.check_site_index(index)?;
        let site = self.site(index);
        Ok((index, site.status, site.dump()))
    }

    /// Value of `variable` at every site hosting it, regardless of status.
    pub fn dump_variable(&self, variable: &str) -> Vec<(usize, Option<i64>, bool)> {
        self.hosting_sites(variable)
            .into_iter()
            .map(|id| {
                let site = self.site(id);
                (
                    id,
                    site.data_manager.get_value(variable),
                    site.is_recovered(variable),
                )
            })
            .collect()
    }
}

/// Non-mutating preview of whether `site` would grant `mode` on
/// `variable` to `txn_id`, mirroring `DataManager::get_lock`'s decision.
fn would_grant(site: &mut Site, txn_id: TransactionId, mode: LockMode, variable: &str) -> bool {
    let lt = &site.data_manager.lock_table;
    if lt.is_locked_by(variable, txn_id, None) {
        return lt.len(variable) == 1;
    }
    match mode {
        LockMode::Write => !lt.is_locked(variable),
        LockMode::Read => !lt.is_write_locked(variable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_every_replica_to_agree() {
        let mut sm = SiteManager::new(10, 20);
        // Another transaction holds a read lock on x4 at site 1 only.
        assert_eq!(sm.get_locks(2, LockMode::Read, "x4"), LockOutcome::GotLock);
        // T1 wants WRITE on x4 (all 10 sites); should fail cleanly, and T2's
        // read lock elsewhere is untouched.
        assert_eq!(sm.get_locks(1, LockMode::Write, "x4"), LockOutcome::NoLock);
    }

    #[test]
    fn write_succeeds_across_all_replicas() {
        let mut sm = SiteManager::new(10, 20);
        assert_eq!(sm.get_locks(1, LockMode::Write, "x4"), LockOutcome::GotLock);
        for id in 1..=10 {
            assert!(sm.site(id).data_manager.lock_table.is_locked_by("x4", 1, Some(LockMode::Write)));
        }
    }

    #[test]
    fn read_returns_first_grant() {
        let mut sm = SiteManager::new(10, 20);
        assert_eq!(sm.get_locks(1, LockMode::Read, "x4"), LockOutcome::GotLock);
    }

    #[test]
    fn all_sites_down_for_single_copy_variable() {
        let mut sm = SiteManager::new(10, 20);
        let host = 1 + 1 % 10; // x1's home site
        sm.fail(host).unwrap();
        assert_eq!(sm.get_locks(1, LockMode::Read, "x1"), LockOutcome::AllSitesDown);
    }

    #[test]
    fn recovering_single_copy_read_is_flagged() {
        let mut sm = SiteManager::new(10, 20);
        let host = 1 + 1 % 10;
        sm.fail(host).unwrap();
        sm.recover(host).unwrap();
        assert_eq!(
            sm.get_locks(1, LockMode::Read, "x1"),
            LockOutcome::GotLockRecovering
        );
    }

    #[test]
    fn commit_write_recovers_even_variable_on_recovering_site() {
        let mut sm = SiteManager::new(10, 20);
        sm.fail(2).unwrap();
        sm.recover(2).unwrap();
        assert_eq!(sm.dump_variable("x4")[1].0, 2);
        assert!(!sm.dump_variable("x4")[1].2);
        sm.apply_commit_write("x4", 44);
        assert!(sm.dump_variable("x4")[1].2);
    }
}
