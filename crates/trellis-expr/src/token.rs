//! Expression tokens.
//!
//! A [`Token`] is the atom of the expression language: an operator kind
//! plus the metadata the compiler needs to build invalidation tables.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Node;

/// Operator kind of a token.
///
/// The numeric discriminants are part of the binary program format and
/// must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TokenKind {
    // Model roots and markers
    Root = 0,
    TopLevel = 1,
    Context = 2,
    Key = 3,

    // Structure access
    Get = 4,
    Trace = 5,

    // Short-circuit forms
    And = 6,
    Or = 7,
    Ternary = 8,
    Not = 9,

    // Arithmetic
    Plus = 10,
    Minus = 11,
    Mult = 12,
    Div = 13,
    Mod = 14,

    // Comparison
    Eq = 15,
    NotEq = 16,
    Gt = 17,
    Gte = 18,
    Lt = 19,
    Lte = 20,

    // Collection combinators (take a function-library name)
    MapValues = 21,
    FilterBy = 22,
    GroupBy = 23,
    MapKeys = 24,
    Map = 25,
    Any = 26,
    Filter = 27,
    AnyValues = 28,
    KeyBy = 29,
    RecursiveMap = 30,
    RecursiveMapValues = 31,

    // Scalar collection operators
    Keys = 32,
    Values = 33,
    Assign = 34,
    Size = 35,
    Defaults = 36,
    Sum = 37,
    Flatten = 38,
    Range = 39,

    // Strings
    StringLength = 40,
    ToUpperCase = 41,
    ToLowerCase = 42,
    StartsWith = 43,
    EndsWith = 44,
    Split = 45,

    // Function library invocation
    Call = 46,
}

impl TokenKind {
    /// Every kind, in discriminant order.
    pub const ALL: [TokenKind; 47] = [
        TokenKind::Root,
        TokenKind::TopLevel,
        TokenKind::Context,
        TokenKind::Key,
        TokenKind::Get,
        TokenKind::Trace,
        TokenKind::And,
        TokenKind::Or,
        TokenKind::Ternary,
        TokenKind::Not,
        TokenKind::Plus,
        TokenKind::Minus,
        TokenKind::Mult,
        TokenKind::Div,
        TokenKind::Mod,
        TokenKind::Eq,
        TokenKind::NotEq,
        TokenKind::Gt,
        TokenKind::Gte,
        TokenKind::Lt,
        TokenKind::Lte,
        TokenKind::MapValues,
        TokenKind::FilterBy,
        TokenKind::GroupBy,
        TokenKind::MapKeys,
        TokenKind::Map,
        TokenKind::Any,
        TokenKind::Filter,
        TokenKind::AnyValues,
        TokenKind::KeyBy,
        TokenKind::RecursiveMap,
        TokenKind::RecursiveMapValues,
        TokenKind::Keys,
        TokenKind::Values,
        TokenKind::Assign,
        TokenKind::Size,
        TokenKind::Defaults,
        TokenKind::Sum,
        TokenKind::Flatten,
        TokenKind::Range,
        TokenKind::StringLength,
        TokenKind::ToUpperCase,
        TokenKind::ToLowerCase,
        TokenKind::StartsWith,
        TokenKind::EndsWith,
        TokenKind::Split,
        TokenKind::Call,
    ];

    /// Stable numeric tag used by the hash-cons tables and the wire codec.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Inverse of [`TokenKind::tag`].
    pub fn from_tag(tag: u8) -> Option<TokenKind> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Surface verb, as it appears in diagnostics and emitted envelopes.
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Root => "root",
            TokenKind::TopLevel => "topLevel",
            TokenKind::Context => "context",
            TokenKind::Key => "key",
            TokenKind::Get => "get",
            TokenKind::Trace => "trace",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Ternary => "ternary",
            TokenKind::Not => "not",
            TokenKind::Plus => "plus",
            TokenKind::Minus => "minus",
            TokenKind::Mult => "mult",
            TokenKind::Div => "div",
            TokenKind::Mod => "mod",
            TokenKind::Eq => "eq",
            TokenKind::NotEq => "notEq",
            TokenKind::Gt => "gt",
            TokenKind::Gte => "gte",
            TokenKind::Lt => "lt",
            TokenKind::Lte => "lte",
            TokenKind::MapValues => "mapValues",
            TokenKind::FilterBy => "filterBy",
            TokenKind::GroupBy => "groupBy",
            TokenKind::MapKeys => "mapKeys",
            TokenKind::Map => "map",
            TokenKind::Any => "any",
            TokenKind::Filter => "filter",
            TokenKind::AnyValues => "anyValues",
            TokenKind::KeyBy => "keyBy",
            TokenKind::RecursiveMap => "recursiveMap",
            TokenKind::RecursiveMapValues => "recursiveMapValues",
            TokenKind::Keys => "keys",
            TokenKind::Values => "values",
            TokenKind::Assign => "assign",
            TokenKind::Size => "size",
            TokenKind::Defaults => "defaults",
            TokenKind::Sum => "sum",
            TokenKind::Flatten => "flatten",
            TokenKind::Range => "range",
            TokenKind::StringLength => "stringLength",
            TokenKind::ToUpperCase => "toUpperCase",
            TokenKind::ToLowerCase => "toLowerCase",
            TokenKind::StartsWith => "startsWith",
            TokenKind::EndsWith => "endsWith",
            TokenKind::Split => "split",
            TokenKind::Call => "call",
        }
    }

    /// Arithmetic operators require numeric operands.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            TokenKind::Plus | TokenKind::Minus | TokenKind::Mult | TokenKind::Div | TokenKind::Mod
        )
    }

    /// Comparison operators yield booleans.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Gt
                | TokenKind::Gte
                | TokenKind::Lt
                | TokenKind::Lte
        )
    }

    /// Combinators whose first argument names a function-library entry.
    pub fn is_combinator(self) -> bool {
        matches!(
            self,
            TokenKind::MapValues
                | TokenKind::FilterBy
                | TokenKind::GroupBy
                | TokenKind::MapKeys
                | TokenKind::Map
                | TokenKind::Any
                | TokenKind::Filter
                | TokenKind::AnyValues
                | TokenKind::KeyBy
                | TokenKind::RecursiveMap
                | TokenKind::RecursiveMapValues
        )
    }

    /// Combinators that operate on keyed containers. `keyBy` is not one:
    /// it consumes an ordered sequence and produces a keyed container.
    pub fn is_keyed_combinator(self) -> bool {
        matches!(
            self,
            TokenKind::MapValues
                | TokenKind::FilterBy
                | TokenKind::GroupBy
                | TokenKind::MapKeys
                | TokenKind::AnyValues
                | TokenKind::RecursiveMapValues
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One invalidation entry on a compound token: when `condition` holds,
/// writes under `path` invalidate the token's projection. An always-true
/// condition is the null scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub condition: Node,
    pub path: Vec<Node>,
}

/// An atom of the expression language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Surface source location, carried into diagnostics and traces.
    pub source: Option<String>,
    /// Memoize this node by identity.
    pub tracked: bool,
    /// This node contributes invalidations.
    pub invalidates: bool,
    /// Identity for tracked nodes.
    pub id: Option<i64>,
    /// Invalidation map: condition expression to invalidated model path.
    pub paths: Option<Vec<PathEntry>>,
}

impl Token {
    pub fn new(kind: TokenKind) -> Self {
        Self {
            kind,
            source: None,
            tracked: false,
            invalidates: false,
            id: None,
            paths: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn tracked(mut self, id: i64) -> Self {
        self.tracked = true;
        self.id = Some(id);
        self
    }

    pub fn invalidating(mut self) -> Self {
        self.invalidates = true;
        self
    }

    pub fn with_paths(mut self, paths: Vec<PathEntry>) -> Self {
        self.paths = Some(paths);
        self
    }
}

impl From<TokenKind> for Token {
    fn from(kind: TokenKind) -> Self {
        Token::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for kind in TokenKind::ALL {
            assert_eq!(TokenKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(TokenKind::from_tag(200), None);
    }

    #[test]
    fn test_kind_categories() {
        assert!(TokenKind::Mult.is_arithmetic());
        assert!(!TokenKind::Get.is_arithmetic());
        assert!(TokenKind::GroupBy.is_keyed_combinator());
        assert!(TokenKind::Map.is_combinator());
        assert!(!TokenKind::Map.is_keyed_combinator());
        assert!(!TokenKind::KeyBy.is_keyed_combinator());
    }
}
