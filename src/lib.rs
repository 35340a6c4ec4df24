// A replicated concurrency-control and recovery engine: strict
// two-phase locking over replicated sites, available-copies writes,
// snapshot isolation for read-only transactions, and deadlock
// detection by wait-for cycle finding.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod http;
pub mod model;
pub mod script;
pub mod sites;
pub mod transaction;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
