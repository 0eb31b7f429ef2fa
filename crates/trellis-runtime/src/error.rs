//! Runtime errors.

use thiserror::Error;

/// Runtime result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors.
///
/// User-code errors raised from inside evaluated expressions propagate out
/// of the setter call that triggered them; the runtime performs no local
/// retry, and queued batch setters are not rolled back on partial failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("undefined function '{0}' in function library")]
    UndefinedFunction(String),

    #[error("type error in {op}: expected {expected}, got {actual}{}", at(.location))]
    Type {
        op: &'static str,
        expected: &'static str,
        actual: &'static str,
        location: Option<String>,
    },

    #[error("invalid setter call '{name}': {reason}")]
    InvalidSetter { name: String, reason: String },

    #[error("recalculation failed to settle after {0} passes")]
    RecalculationDivergence(u32),

    #[error("malformed program: {0}")]
    Program(String),
}

fn at(source: &Option<String>) -> String {
    match source {
        Some(s) => format!(" at {s}"),
        None => String::new(),
    }
}
