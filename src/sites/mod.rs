// Per-site storage (lock table, data manager, site) and the site
// manager that mediates lock acquisition and value retrieval across
// replicas (spec.md §4.1-4.4, §4.9).

pub mod data_manager;
pub mod lock_table;
pub mod site;
pub mod site_manager;

pub use site::{Site, SiteStatus};
pub use site_manager::{LockOutcome, SiteManager};
