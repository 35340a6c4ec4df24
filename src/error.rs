// Crate-wide error type.
//
// Per the engine's error taxonomy, only system-level faults are
// represented here: bad site/variable indices, illegal status
// transitions, script parse failures, and I/O. Lock conflicts and
// site-down conditions are *not* errors — they are ordinary control
// flow handled by the transaction manager via the blocked/waiting
// queues (see [`crate::transaction::manager`]).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("site index out of range: {0} (valid range is 1..={1})")]
    InvalidSiteIndex(usize, usize),

    #[error("variable index out of range: {0} (valid range is 1..={1})")]
    InvalidVariableIndex(usize, usize),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("illegal state transition: {0}")]
    IllegalStateTransition(String),

    #[error("could not parse instruction: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
