//! Compiler input: the frozen expression graph.

use serde::{Deserialize, Serialize};

use crate::expr::Node;

/// Mutation shape of a setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetterKind {
    /// Write (or remove) a value at a path.
    Set,
    /// Remove/insert a run of elements of an ordered sequence.
    Splice,
    /// Append to an ordered sequence.
    Push,
}

impl SetterKind {
    pub fn name(self) -> &'static str {
        match self {
            SetterKind::Set => "set",
            SetterKind::Splice => "splice",
            SetterKind::Push => "push",
        }
    }
}

/// A named top-level derivation. Unnamed entries are internal projections
/// hidden from the exported surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLevelDef {
    pub name: Option<String>,
    pub expr: Node,
}

impl TopLevelDef {
    pub fn named(name: impl Into<String>, expr: impl Into<Node>) -> Self {
        Self {
            name: Some(name.into()),
            expr: expr.into(),
        }
    }

    pub fn internal(expr: impl Into<Node>) -> Self {
        Self {
            name: None,
            expr: expr.into(),
        }
    }
}

/// A named setter recipe. The path starts with a `root` token; steps are
/// string keys, non-negative integer indices, or a terminal `key` token
/// standing for a positional argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetterDef {
    pub name: String,
    pub kind: SetterKind,
    pub path: Vec<Node>,
}

impl SetterDef {
    pub fn new(name: impl Into<String>, kind: SetterKind, path: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            kind,
            path,
        }
    }
}

/// The compiler's input: ordered top-level derivations plus setter recipes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExprGraph {
    pub top_levels: Vec<TopLevelDef>,
    pub setters: Vec<SetterDef>,
}

impl ExprGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_level(mut self, name: impl Into<String>, expr: impl Into<Node>) -> Self {
        self.top_levels.push(TopLevelDef::named(name, expr));
        self
    }

    pub fn setter(mut self, setter: SetterDef) -> Self {
        self.setters.push(setter);
        self
    }

    /// Position of a named top-level, if present.
    pub fn top_level_index(&self, name: &str) -> Option<usize> {
        self.top_levels
            .iter()
            .position(|t| t.name.as_deref() == Some(name))
    }
}
