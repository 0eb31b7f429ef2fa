//! Compiler errors.

use thiserror::Error;

/// Compiler result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler errors.
///
/// `Integrity` and `RefOverflow` are integrity-class failures: the
/// hash-cons tables or the packed reference encoding disagree with the
/// data being compiled. Both are fatal; the compiler performs no recovery.
#[derive(Debug, Error)]
pub enum Error {
    #[error("hash table '{table}' reuse disagrees with stored value for {hash:#018x}")]
    Integrity { table: &'static str, hash: u64 },

    #[error("table '{table}' index {index} exceeds the packed reference ceiling {max}")]
    RefOverflow {
        table: &'static str,
        index: usize,
        max: u32,
    },

    #[error("unknown top level '{0}'")]
    UnknownTopLevel(String),

    #[error("invalid setter path for '{name}': {reason}")]
    InvalidSetterPath { name: String, reason: String },

    #[error("malformed '{op}' expression: {reason}")]
    Malformed { op: &'static str, reason: String },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}
