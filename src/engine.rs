// The `Engine` facade: ties the site manager and transaction manager
// together behind the per-tick control flow described in spec.md §2
// and §5, and dispatches decoded instructions to the right one.

use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::script::{split_statements, Instruction};
use crate::sites::SiteManager;
use crate::transaction::TransactionManager;

pub struct Engine {
    site_manager: SiteManager,
    transaction_manager: TransactionManager,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            site_manager: SiteManager::new(config.num_sites, config.num_variables),
            transaction_manager: TransactionManager::new(),
        }
    }

    pub fn site_manager(&self) -> &SiteManager {
        &self.site_manager
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    /// Decodes and dispatches every statement in `script`, in order.
    pub fn run_script(&mut self, script: &str) {
        for line in split_statements(script) {
            match Instruction::parse(&line) {
                Ok(instruction) => self.dispatch(instruction),
                Err(err) => warn!(%err, line, "skipping malformed instruction"),
            }
        }
    }

    /// One tick: run the standard preludes, then dispatch a single
    /// already-decoded instruction.
    pub fn dispatch(&mut self, instruction: Instruction) {
        self.run_preludes();
        match instruction {
            Instruction::Begin { txn } => {
                self.transaction_manager.begin(&txn);
            }
            Instruction::BeginRO { txn } => {
                self.transaction_manager.begin_read_only(&self.site_manager, &txn);
            }
            Instruction::Read { txn, var } => {
                self.transaction_manager.read(&mut self.site_manager, &txn, &var);
            }
            Instruction::Write { txn, var, value } => {
                self.transaction_manager.write(&mut self.site_manager, &txn, &var, value);
            }
            Instruction::End { txn } => {
                self.transaction_manager.end(&mut self.site_manager, &txn);
            }
            Instruction::Fail { site } => match self.site_manager.fail(site) {
                Ok(affected) => self.transaction_manager.notify_site_failure(affected),
                Err(err) => error!(%err, site, "fail failed"),
            },
            Instruction::Recover { site } => {
                if let Err(err) = self.site_manager.recover(site) {
                    error!(%err, site, "recover failed");
                }
            }
            Instruction::DumpAll => self.dump_all(),
            Instruction::DumpSite { site } => self.dump_site(site),
            Instruction::DumpVariable { var } => self.dump_variable(&var),
        }
    }

    /// `clear_aborted`, `detect_and_clear_deadlocks`, `blocked_to_waiting`,
    /// `try_waiting`, run before every dispatched instruction (spec.md §5).
    fn run_preludes(&mut self) {
        self.transaction_manager.clear_aborted(&mut self.site_manager);
        self.transaction_manager.detect_and_clear_deadlocks(&mut self.site_manager);
        self.transaction_manager.blocked_to_waiting();
        self.transaction_manager.try_waiting(&mut self.site_manager);
    }

    fn dump_all(&self) {
        for (site_id, status, rows) in self.site_manager.dump_all() {
            for (var, value, available) in rows {
                info!(site = site_id, status = ?status, var, value, available, "dump");
            }
        }
    }

    fn dump_site(&self, site: usize) {
        match self.site_manager.dump_site(site) {
            Ok((site_id, status, rows)) => {
                for (var, value, available) in rows {
                    info!(site = site_id, status = ?status, var, value, available, "dump");
                }
            }
            Err(err) => error!(%err, site, "dump failed"),
        }
    }

    fn dump_variable(&self, var: &str) {
        for (site_id, value, available) in self.site_manager.dump_variable(var) {
            info!(site = site_id, var, ?value, available, "dump");
        }
    }
}
