//! The mutable model value.
//!
//! A JSON-like tree: keyed containers are insertion-ordered maps so every
//! observable iteration (combinators, keys, listeners) is deterministic.
//! The mutation helpers at the bottom implement the setter primitives:
//! `ensure_path` materializes missing intermediate containers, choosing an
//! ordered sequence when the next key is a non-negative integer;
//! `apply_setter` writes a value or removes the key entirely when absent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A JSON-like runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    /// Truthiness: null, false, zero, NaN, and the empty string are falsy;
    /// containers are truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Non-negative whole number, for use as a sequence index.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Value::Num(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }

    fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Index into a container. Numeric keys address sequences directly and
    /// keyed containers through their decimal spelling.
    pub fn index(&self, key: &Value) -> Option<&Value> {
        match (self, key) {
            (Value::Object(o), Value::Str(k)) => o.get(k.as_str()),
            (Value::Object(o), Value::Num(_)) => o.get(value_to_key(key).as_str()),
            (Value::Array(a), _) => a.get(key.as_index()?),
            _ => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Canonical string spelling of a key value.
pub(crate) fn value_to_key(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Num(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
        Value::Num(n) => format!("{n}"),
        Value::Bool(b) => format!("{b}"),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}

/// One resolved step of a model path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidSetter {
        name: String::new(),
        reason: reason.into(),
    }
}

/// Materialize missing intermediate containers along a path. For a target
/// path of length >= 2, every prefix gets a container: an ordered sequence
/// when the next step is an index, a keyed container otherwise. Existing
/// non-container occupants are replaced. Idempotent.
pub fn ensure_path(model: &mut Value, path: &[Step]) -> Result<()> {
    if path.len() < 2 {
        return Ok(());
    }
    let mut current = model;
    for i in 0..path.len() - 1 {
        let next_is_index = matches!(path[i + 1], Step::Index(_));
        let slot = step_slot(current, &path[i], true)?;
        if !slot.is_container() {
            *slot = if next_is_index {
                Value::Array(Vec::new())
            } else {
                Value::Object(IndexMap::new())
            };
        }
        current = slot;
    }
    Ok(())
}

/// Write a value into a container, or remove the key entirely when the
/// value is absent.
pub fn apply_setter(container: &mut Value, step: &Step, value: Option<Value>) -> Result<()> {
    match (container, step, value) {
        (Value::Object(o), Step::Key(k), Some(v)) => {
            o.insert(k.clone(), v);
            Ok(())
        }
        (Value::Object(o), Step::Key(k), None) => {
            o.shift_remove(k.as_str());
            Ok(())
        }
        (Value::Array(a), Step::Index(i), Some(v)) => {
            if *i >= a.len() {
                a.resize(*i + 1, Value::Null);
            }
            a[*i] = v;
            Ok(())
        }
        (Value::Array(a), Step::Index(i), None) => {
            if *i < a.len() {
                a.remove(*i);
            }
            Ok(())
        }
        (container, step, _) => Err(invalid(format!(
            "cannot address {} with {step:?}",
            container.kind_name()
        ))),
    }
}

/// Scalar set at a path.
pub fn set_at(model: &mut Value, path: &[Step], value: Option<Value>) -> Result<()> {
    let Some((last, prefix)) = path.split_last() else {
        return Err(invalid("empty target path"));
    };
    ensure_path(model, path)?;
    let parent = walk_mut(model, prefix)?;
    apply_setter(parent, last, value)
}

/// Append to the ordered sequence at a path, materializing it if missing.
pub fn push_at(model: &mut Value, path: &[Step], value: Value) -> Result<()> {
    ensure_sequence(model, path)?;
    match walk_mut(model, path)? {
        Value::Array(a) => {
            a.push(value);
            Ok(())
        }
        other => Err(invalid(format!("cannot push into {}", other.kind_name()))),
    }
}

/// Remove `delete_count` elements at `start` and insert `items` in their
/// place, in the ordered sequence at a path.
pub fn splice_at(
    model: &mut Value,
    path: &[Step],
    start: usize,
    delete_count: usize,
    items: Vec<Value>,
) -> Result<()> {
    ensure_sequence(model, path)?;
    match walk_mut(model, path)? {
        Value::Array(a) => {
            let start = start.min(a.len());
            let end = (start + delete_count).min(a.len());
            a.splice(start..end, items);
            Ok(())
        }
        other => Err(invalid(format!("cannot splice {}", other.kind_name()))),
    }
}

/// Materialize the sequence container at `path` itself.
fn ensure_sequence(model: &mut Value, path: &[Step]) -> Result<()> {
    let mut extended: Vec<Step> = path.to_vec();
    extended.push(Step::Index(0));
    ensure_path(model, &extended)
}

fn walk_mut<'a>(model: &'a mut Value, path: &[Step]) -> Result<&'a mut Value> {
    let mut current = model;
    for step in path {
        current = step_slot(current, step, false)?;
    }
    Ok(current)
}

/// Mutable slot for a step inside a container. With `create`, missing
/// object keys are inserted as null and sequence indices are padded.
fn step_slot<'a>(container: &'a mut Value, step: &Step, create: bool) -> Result<&'a mut Value> {
    match (container, step) {
        (Value::Object(o), Step::Key(k)) => {
            if create {
                Ok(o.entry(k.clone()).or_insert(Value::Null))
            } else {
                o.get_mut(k.as_str())
                    .ok_or_else(|| invalid(format!("missing key '{k}'")))
            }
        }
        (Value::Array(a), Step::Index(i)) => {
            if create && *i >= a.len() {
                a.resize(*i + 1, Value::Null);
            }
            a.get_mut(*i)
                .ok_or_else(|| invalid(format!("index {i} out of bounds")))
        }
        (container, step) => Err(invalid(format!(
            "cannot address {} with {step:?}",
            container.kind_name()
        ))),
    }
}
