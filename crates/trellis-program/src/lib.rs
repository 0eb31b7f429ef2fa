//! Compiled program contract.
//!
//! `ProjectionData` is the sole contract between the compiler back end and
//! the VM runtime: dense, index-addressed tables whose cross-references are
//! packed [`Ref`] words. This crate owns those types plus the binary wire
//! codec the bytecode envelope uses; it knows nothing about compilation or
//! evaluation.

mod data;
mod primitive;
mod refs;
pub mod wire;

pub use data::{
    MetaFlags, PackedMetadata, PackedProjection, PackedSetter, ProjectionData, HIDDEN_NAME,
};
pub use primitive::Primitive;
pub use refs::{Ref, RefSlot, MAX_TABLE_INDEX, REF_PAYLOAD_BITS};
