//! Envelope emitters.
//!
//! Two back ends share the packed tables: a template back end that fills
//! textual placeholders in a fixed runtime envelope, and a bytecode back
//! end that serializes the tables into a compact binary blob for the
//! resident interpreter.

pub mod bytecode;
pub mod template;
