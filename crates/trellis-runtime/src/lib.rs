//! trellis VM runtime.
//!
//! Interprets the packed tables of a compiled program against a live
//! model: a per-projection value cache, precomputed invalidation paths,
//! batched mutation, and listeners notified once per settle. The runtime
//! is single-threaded and cooperative; projection tables are immutable
//! and may be shared by any number of instances.

mod error;
mod eval;
mod funclib;
mod instance;
mod value;

pub use error::{Error, Result};
pub use funclib::{FuncArgs, FuncLib, UserFn};
pub use instance::{
    BatchingStrategy, Instance, InstanceOptions, Listener, ListenerId, SettleScope,
};
pub use value::{apply_setter, ensure_path, push_at, set_at, splice_at, Step, Value};
