// Transaction lifecycle, deadlock detection, and the manager that
// ties them to the site layer (spec.md §3, §4.5-§4.8).

pub mod deadlock;
pub mod manager;
pub mod types;

pub use deadlock::DeadlockDetector;
pub use manager::{OpKind, TransactionManager};
pub use types::{Transaction, TransactionId, TransactionStatus};
