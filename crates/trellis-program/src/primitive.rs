//! Interned primitive values.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use trellis_expr::{Scalar, TokenKind};

/// An entry of the primitives table: a scalar, an operator-kind tag, or a
/// synthetic positional-argument marker used by setter step sequences.
///
/// Numbers compare and hash by bit pattern so that interning is total
/// (NaN equals NaN, and `-0.0` stays distinct from `0.0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Primitive {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Kind(TokenKind),
    Arg(u8),
}

impl Primitive {
    pub fn as_kind(&self) -> Option<TokenKind> {
        match self {
            Primitive::Kind(k) => Some(*k),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Primitive::Num(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialEq for Primitive {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Primitive::Null, Primitive::Null) => true,
            (Primitive::Bool(a), Primitive::Bool(b)) => a == b,
            (Primitive::Num(a), Primitive::Num(b)) => a.to_bits() == b.to_bits(),
            (Primitive::Str(a), Primitive::Str(b)) => a == b,
            (Primitive::Kind(a), Primitive::Kind(b)) => a == b,
            (Primitive::Arg(a), Primitive::Arg(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Primitive {}

impl Hash for Primitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Primitive::Null => state.write_u8(0),
            Primitive::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Primitive::Num(n) => {
                state.write_u8(2);
                state.write_u64(n.to_bits());
            }
            Primitive::Str(s) => {
                state.write_u8(3);
                s.hash(state);
            }
            Primitive::Kind(k) => {
                state.write_u8(4);
                state.write_u8(k.tag());
            }
            Primitive::Arg(n) => {
                state.write_u8(5);
                state.write_u8(*n);
            }
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Null => f.write_str("null"),
            Primitive::Bool(b) => write!(f, "{b}"),
            Primitive::Num(n) => write!(f, "{n}"),
            Primitive::Str(s) => write!(f, "{s:?}"),
            Primitive::Kind(k) => f.write_str(k.name()),
            Primitive::Arg(n) => write!(f, "arg{n}"),
        }
    }
}

impl From<&Scalar> for Primitive {
    fn from(s: &Scalar) -> Self {
        match s {
            Scalar::Null => Primitive::Null,
            Scalar::Bool(b) => Primitive::Bool(*b),
            Scalar::Num(n) => Primitive::Num(*n),
            Scalar::Str(s) => Primitive::Str(s.clone()),
        }
    }
}
