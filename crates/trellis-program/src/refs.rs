//! Packed table references.
//!
//! A reference is a single `u32` word. The two most significant bits tag
//! the source table; the remaining thirty carry the payload:
//!
//! ```text
//! 00 | n      inline small integer
//! 01 | index  primitives table
//! 10 | index  projections table
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Payload width of a packed reference.
pub const REF_PAYLOAD_BITS: u32 = 30;

/// Largest index (and largest inline integer) a reference can carry.
pub const MAX_TABLE_INDEX: u32 = (1 << REF_PAYLOAD_BITS) - 1;

const TAG_MASK: u32 = 0b11 << REF_PAYLOAD_BITS;
const TAG_INLINE: u32 = 0b00 << REF_PAYLOAD_BITS;
const TAG_PRIMITIVE: u32 = 0b01 << REF_PAYLOAD_BITS;
const TAG_PROJECTION: u32 = 0b10 << REF_PAYLOAD_BITS;

/// A packed reference into one of the program tables, or an inline
/// small integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(u32);

/// A decoded reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSlot {
    /// An inline non-negative integer.
    Inline(u32),
    /// Index into the primitives table.
    Primitive(u32),
    /// Index into the projections (getters) table.
    Projection(u32),
}

impl Ref {
    /// Pack an inline integer. `None` if it exceeds the payload width.
    pub fn inline(n: u32) -> Option<Ref> {
        (n <= MAX_TABLE_INDEX).then_some(Ref(TAG_INLINE | n))
    }

    /// Pack a primitives-table index. `None` if it exceeds the payload width.
    pub fn primitive(index: u32) -> Option<Ref> {
        (index <= MAX_TABLE_INDEX).then_some(Ref(TAG_PRIMITIVE | index))
    }

    /// Pack a projections-table index. `None` if it exceeds the payload width.
    pub fn projection(index: u32) -> Option<Ref> {
        (index <= MAX_TABLE_INDEX).then_some(Ref(TAG_PROJECTION | index))
    }

    /// Decode the tag and payload.
    pub fn slot(self) -> RefSlot {
        let payload = self.0 & !TAG_MASK;
        match self.0 & TAG_MASK {
            TAG_INLINE => RefSlot::Inline(payload),
            TAG_PRIMITIVE => RefSlot::Primitive(payload),
            _ => RefSlot::Projection(payload),
        }
    }

    /// The raw packed word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Rebuild from a raw packed word. `None` for the reserved tag `11`.
    pub fn from_bits(bits: u32) -> Option<Ref> {
        (bits & TAG_MASK != TAG_MASK).then_some(Ref(bits))
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot() {
            RefSlot::Inline(n) => write!(f, "#{n}"),
            RefSlot::Primitive(i) => write!(f, "prim[{i}]"),
            RefSlot::Projection(i) => write!(f, "proj[{i}]"),
        }
    }
}
