//! User function library.
//!
//! Collection combinators and `call` invoke named functions supplied by
//! the embedding application. Each invocation receives the current value,
//! its key, the optional combinator context, and — for the recursive
//! traversals — a `recur` callback that resolves another key of the same
//! collection, memoized per evaluation.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

/// Arguments passed to a user function.
pub struct FuncArgs<'a> {
    pub value: &'a Value,
    pub key: &'a Value,
    pub context: Option<&'a Value>,
    /// `loop(key)` for `recursiveMap` / `recursiveMapValues`; `None`
    /// elsewhere.
    pub recur: Option<&'a mut dyn FnMut(&Value) -> Value>,
}

/// A user-provided function.
pub type UserFn = Rc<dyn Fn(FuncArgs<'_>) -> Value>;

/// Named function registry, insertion-ordered.
#[derive(Default, Clone)]
pub struct FuncLib {
    fns: IndexMap<String, UserFn>,
}

impl FuncLib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        f: impl Fn(FuncArgs<'_>) -> Value + 'static,
    ) -> Self {
        self.insert(name, f);
        self
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(FuncArgs<'_>) -> Value + 'static,
    ) {
        self.fns.insert(name.into(), Rc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&UserFn> {
        self.fns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }
}

impl std::fmt::Debug for FuncLib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncLib")
            .field("names", &self.fns.keys().collect::<Vec<_>>())
            .finish()
    }
}
