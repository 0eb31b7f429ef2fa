//! Projection evaluation.
//!
//! Dispatches on the projection kind tag against the cached value table.
//! A projection is recomputed only while it sits in the dirty set; a clean
//! cache hit is a clone. Short-circuit forms evaluate lazily, collection
//! combinators call into the user function library, and the recursive
//! traversals go through a memoized `loop(key)` helper.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;
use trellis_expr::TokenKind;
use trellis_program::{Primitive, Ref, RefSlot};

use crate::error::{Error, Result};
use crate::funclib::{FuncArgs, UserFn};
use crate::instance::Instance;
use crate::value::{value_to_key, Value};

impl Instance {
    /// Value of a packed reference: inline int, interned scalar, or a
    /// projection evaluation.
    pub(crate) fn resolve_ref_value(&mut self, r: Ref) -> Result<Value> {
        match r.slot() {
            RefSlot::Inline(n) => Ok(Value::Num(n as f64)),
            RefSlot::Primitive(i) => {
                let prim = self
                    .program
                    .primitives
                    .get(i as usize)
                    .ok_or_else(|| Error::Program("dangling primitive ref".into()))?;
                Ok(primitive_value(prim))
            }
            RefSlot::Projection(i) => self.eval(i as usize),
        }
    }

    /// Evaluate projection `i`, consulting the cache unless dirty.
    pub(crate) fn eval(&mut self, i: usize) -> Result<Value> {
        if !self.dirty.contains(&i) {
            if let Some(v) = &self.values[i] {
                return Ok(v.clone());
            }
        }
        let program = Arc::clone(&self.program);
        let getter = program
            .getters
            .get(i)
            .ok_or_else(|| Error::Program(format!("dangling projection index {i}")))?;
        let kind = program
            .primitive(getter.kind)
            .and_then(Primitive::as_kind)
            .ok_or_else(|| Error::Program(format!("projection {i} has no kind tag")))?;

        let value = self.eval_kind(i, kind, &getter.args)?;
        self.dirty.remove(&i);
        self.values[i] = Some(value.clone());
        Ok(value)
    }

    /// Latest value of top-level `j`.
    pub(crate) fn eval_top_level(&mut self, j: usize) -> Result<Value> {
        let r = *self
            .program
            .top_level_projections
            .get(j)
            .ok_or_else(|| Error::Program(format!("dangling top-level index {j}")))?;
        self.resolve_ref_value(r)
    }

    fn eval_kind(&mut self, i: usize, kind: TokenKind, args: &[Ref]) -> Result<Value> {
        match kind {
            TokenKind::Get => {
                let obj_ref = arg(args, 0)?;
                let key_ref = arg(args, 1)?;
                match self.ref_kind(obj_ref) {
                    Some(TokenKind::Root) => {
                        let key = self.resolve_ref_value(key_ref)?;
                        Ok(self.model.index(&key).cloned().unwrap_or(Value::Null))
                    }
                    Some(TokenKind::TopLevel) => {
                        let key = self.resolve_ref_value(key_ref)?;
                        let j = key.as_index().ok_or_else(|| {
                            Error::Program("topLevel key slot is not an index".into())
                        })?;
                        self.eval_top_level(j)
                    }
                    _ => {
                        let obj = self.resolve_ref_value(obj_ref)?;
                        let key = self.resolve_ref_value(key_ref)?;
                        Ok(obj.index(&key).cloned().unwrap_or(Value::Null))
                    }
                }
            }

            TokenKind::Plus => {
                let a = self.resolve_ref_value(arg(args, 0)?)?;
                let b = self.resolve_ref_value(arg(args, 1)?)?;
                if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
                    Ok(Value::Str(value_to_key(&a) + &value_to_key(&b)))
                } else {
                    let a = self.want_num(i, kind, a)?;
                    let b = self.want_num(i, kind, b)?;
                    Ok(Value::Num(a + b))
                }
            }
            TokenKind::Minus | TokenKind::Mult | TokenKind::Div | TokenKind::Mod => {
                let a = self.resolve_ref_value(arg(args, 0)?)?;
                let b = self.resolve_ref_value(arg(args, 1)?)?;
                let a = self.want_num(i, kind, a)?;
                let b = self.want_num(i, kind, b)?;
                Ok(Value::Num(match kind {
                    TokenKind::Minus => a - b,
                    TokenKind::Mult => a * b,
                    TokenKind::Div => a / b,
                    _ => a % b,
                }))
            }

            TokenKind::Eq | TokenKind::NotEq => {
                let a = self.resolve_ref_value(arg(args, 0)?)?;
                let b = self.resolve_ref_value(arg(args, 1)?)?;
                let eq = a == b;
                Ok(Value::Bool(if kind == TokenKind::Eq { eq } else { !eq }))
            }
            TokenKind::Gt | TokenKind::Gte | TokenKind::Lt | TokenKind::Lte => {
                let a = self.resolve_ref_value(arg(args, 0)?)?;
                let b = self.resolve_ref_value(arg(args, 1)?)?;
                self.compare(i, kind, a, b)
            }
            TokenKind::Not => {
                let v = self.resolve_ref_value(arg(args, 0)?)?;
                Ok(Value::Bool(!v.truthy()))
            }

            // args[0] is the tracked identity; evaluation skips it.
            TokenKind::And => {
                let mut last = Value::Bool(true);
                for &r in &args[1..] {
                    last = self.resolve_ref_value(r)?;
                    if !last.truthy() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            TokenKind::Or => {
                let mut last = Value::Bool(false);
                for &r in &args[1..] {
                    last = self.resolve_ref_value(r)?;
                    if last.truthy() {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            TokenKind::Ternary => {
                let cond = self.resolve_ref_value(arg(args, 1)?)?;
                if cond.truthy() {
                    self.resolve_ref_value(arg(args, 2)?)
                } else {
                    self.resolve_ref_value(arg(args, 3)?)
                }
            }

            TokenKind::Range => {
                let end = self.num_arg(i, kind, args, 0)?;
                let start = self.num_arg(i, kind, args, 1)?;
                let step = self.num_arg(i, kind, args, 2)?;
                if step == 0.0 {
                    return Err(Error::Type {
                        op: kind.name(),
                        expected: "non-zero step",
                        actual: "zero",
                        location: self.source_of(i),
                    });
                }
                let mut out = Vec::new();
                let mut v = start;
                while (step > 0.0 && v < end) || (step < 0.0 && v > end) {
                    out.push(Value::Num(v));
                    v += step;
                }
                Ok(Value::Array(out))
            }

            TokenKind::Keys => {
                let v = self.resolve_ref_value(arg(args, 0)?)?;
                match v.as_object() {
                    Some(o) => Ok(Value::Array(
                        o.keys().map(|k| Value::Str(k.clone())).collect(),
                    )),
                    None => self.container_fallback(i, kind, "object", &v),
                }
            }
            TokenKind::Values => {
                let v = self.resolve_ref_value(arg(args, 0)?)?;
                match v.as_object() {
                    Some(o) => Ok(Value::Array(o.values().cloned().collect())),
                    None => self.container_fallback(i, kind, "object", &v),
                }
            }
            TokenKind::Size => {
                let v = self.resolve_ref_value(arg(args, 0)?)?;
                match &v {
                    Value::Array(a) => Ok(Value::Num(a.len() as f64)),
                    Value::Object(o) => Ok(Value::Num(o.len() as f64)),
                    Value::Str(s) => Ok(Value::Num(s.chars().count() as f64)),
                    _ => self.container_fallback(i, kind, "array or object", &v),
                }
            }
            TokenKind::Sum => {
                let v = self.resolve_ref_value(arg(args, 0)?)?;
                match v.as_array() {
                    Some(items) => {
                        let mut total = 0.0;
                        for item in items {
                            total += self.want_num(i, kind, item.clone())?;
                        }
                        Ok(Value::Num(total))
                    }
                    None => self.container_fallback(i, kind, "array", &v),
                }
            }
            TokenKind::Flatten => {
                let v = self.resolve_ref_value(arg(args, 0)?)?;
                match v.as_array() {
                    Some(items) => {
                        let mut out = Vec::new();
                        for item in items {
                            match item {
                                Value::Array(inner) => out.extend(inner.iter().cloned()),
                                other => out.push(other.clone()),
                            }
                        }
                        Ok(Value::Array(out))
                    }
                    None => self.container_fallback(i, kind, "array", &v),
                }
            }
            TokenKind::Assign | TokenKind::Defaults => {
                let v = self.resolve_ref_value(arg(args, 0)?)?;
                let Some(items) = v.as_array() else {
                    return self.container_fallback(i, kind, "array", &v);
                };
                let mut out: IndexMap<String, Value> = IndexMap::new();
                let merge = |out: &mut IndexMap<String, Value>, o: &IndexMap<String, Value>| {
                    for (k, val) in o {
                        out.insert(k.clone(), val.clone());
                    }
                };
                if kind == TokenKind::Assign {
                    for item in items {
                        if let Some(o) = item.as_object() {
                            merge(&mut out, o);
                        }
                    }
                } else {
                    // defaults: earlier entries win.
                    for item in items.iter().rev() {
                        if let Some(o) = item.as_object() {
                            merge(&mut out, o);
                        }
                    }
                }
                Ok(Value::Object(out))
            }

            TokenKind::StringLength => {
                let s = self.str_arg(i, kind, args, 0)?;
                Ok(Value::Num(s.chars().count() as f64))
            }
            TokenKind::ToUpperCase => {
                let s = self.str_arg(i, kind, args, 0)?;
                Ok(Value::Str(s.to_uppercase()))
            }
            TokenKind::ToLowerCase => {
                let s = self.str_arg(i, kind, args, 0)?;
                Ok(Value::Str(s.to_lowercase()))
            }
            TokenKind::StartsWith => {
                let s = self.str_arg(i, kind, args, 0)?;
                let p = self.str_arg(i, kind, args, 1)?;
                Ok(Value::Bool(s.starts_with(&p)))
            }
            TokenKind::EndsWith => {
                let s = self.str_arg(i, kind, args, 0)?;
                let p = self.str_arg(i, kind, args, 1)?;
                Ok(Value::Bool(s.ends_with(&p)))
            }
            TokenKind::Split => {
                let s = self.str_arg(i, kind, args, 0)?;
                let sep = self.str_arg(i, kind, args, 1)?;
                Ok(Value::Array(
                    s.split(sep.as_str()).map(Value::from).collect(),
                ))
            }

            TokenKind::Trace => {
                let value = self.resolve_ref_value(arg(args, 0)?)?;
                let label = self
                    .ref_kind(arg(args, 1)?)
                    .map(TokenKind::name)
                    .unwrap_or("value");
                let source = self
                    .program
                    .primitive(arg(args, 2)?)
                    .and_then(Primitive::as_str)
                    .unwrap_or("")
                    .to_string();
                debug!(op = label, source = %source, value = ?value, "trace");
                Ok(value)
            }

            TokenKind::Call => {
                let f = self.func_by_ref(arg(args, 0)?)?;
                let mut call_args = Vec::with_capacity(args.len() - 1);
                for &r in &args[1..] {
                    call_args.push(self.resolve_ref_value(r)?);
                }
                let bundle = Value::Array(call_args);
                Ok((f.as_ref())(FuncArgs {
                    value: &bundle,
                    key: &Value::Null,
                    context: None,
                    recur: None,
                }))
            }

            kind if kind.is_combinator() => self.eval_combinator(i, kind, args),

            other => Err(Error::Program(format!(
                "'{other}' cannot head a projection"
            ))),
        }
    }

    fn eval_combinator(&mut self, i: usize, kind: TokenKind, args: &[Ref]) -> Result<Value> {
        let f = self.func_by_ref(arg(args, 0)?)?;
        let input = self.resolve_ref_value(arg(args, 1)?)?;
        let context = match args.get(2) {
            Some(&r) => Some(self.resolve_ref_value(r)?),
            None => None,
        };
        let ctx = context.as_ref();

        if kind.is_keyed_combinator() {
            let Some(obj) = input.as_object() else {
                return Err(self.shape_error(i, kind, "object", &input));
            };
            let call = |value: &Value, key: &str| {
                (f.as_ref())(FuncArgs {
                    value,
                    key: &Value::Str(key.to_string()),
                    context: ctx,
                    recur: None,
                })
            };
            match kind {
                TokenKind::MapValues => Ok(Value::Object(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), call(v, k)))
                        .collect(),
                )),
                TokenKind::FilterBy => Ok(Value::Object(
                    obj.iter()
                        .filter(|&(k, v)| call(v, k).truthy())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )),
                TokenKind::MapKeys => Ok(Value::Object(
                    obj.iter()
                        .map(|(k, v)| (value_to_key(&call(v, k)), v.clone()))
                        .collect(),
                )),
                TokenKind::GroupBy => {
                    let mut groups: IndexMap<String, IndexMap<String, Value>> = IndexMap::new();
                    for (k, v) in obj {
                        let group = value_to_key(&call(v, k));
                        groups
                            .entry(group)
                            .or_default()
                            .insert(k.clone(), v.clone());
                    }
                    Ok(Value::Object(
                        groups
                            .into_iter()
                            .map(|(g, members)| (g, Value::Object(members)))
                            .collect(),
                    ))
                }
                TokenKind::AnyValues => {
                    Ok(Value::Bool(obj.iter().any(|(k, v)| call(v, k).truthy())))
                }
                TokenKind::RecursiveMapValues => {
                    let keys: Vec<String> = obj.keys().cloned().collect();
                    let mut state = MemoState::default();
                    for k in &keys {
                        loop_value(&f, &input, ctx, &mut state, &Value::Str(k.clone()));
                    }
                    Ok(Value::Object(
                        keys.into_iter()
                            .map(|k| {
                                let v = state.computed.get(&k).cloned().unwrap_or(Value::Null);
                                (k, v)
                            })
                            .collect(),
                    ))
                }
                _ => unreachable!("keyed combinator dispatch"),
            }
        } else {
            let Some(items) = input.as_array() else {
                return Err(self.shape_error(i, kind, "array", &input));
            };
            let call = |value: &Value, idx: usize| {
                (f.as_ref())(FuncArgs {
                    value,
                    key: &Value::Num(idx as f64),
                    context: ctx,
                    recur: None,
                })
            };
            match kind {
                TokenKind::Map => Ok(Value::Array(
                    items.iter().enumerate().map(|(idx, v)| call(v, idx)).collect(),
                )),
                TokenKind::Filter => Ok(Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .filter(|&(idx, v)| call(v, idx).truthy())
                        .map(|(_, v)| v.clone())
                        .collect(),
                )),
                TokenKind::Any => Ok(Value::Bool(
                    items.iter().enumerate().any(|(idx, v)| call(v, idx).truthy()),
                )),
                TokenKind::KeyBy => {
                    let mut out = IndexMap::new();
                    for (idx, v) in items.iter().enumerate() {
                        out.insert(value_to_key(&call(v, idx)), v.clone());
                    }
                    Ok(Value::Object(out))
                }
                TokenKind::RecursiveMap => {
                    let len = items.len();
                    let mut state = MemoState::default();
                    for idx in 0..len {
                        loop_value(&f, &input, ctx, &mut state, &Value::Num(idx as f64));
                    }
                    Ok(Value::Array(
                        (0..len)
                            .map(|idx| {
                                state
                                    .computed
                                    .get(&value_to_key(&Value::Num(idx as f64)))
                                    .cloned()
                                    .unwrap_or(Value::Null)
                            })
                            .collect(),
                    ))
                }
                _ => unreachable!("sequence combinator dispatch"),
            }
        }
    }

    fn func_by_ref(&mut self, r: Ref) -> Result<UserFn> {
        let name = match self.resolve_ref_value(r)? {
            Value::Str(s) => s,
            other => {
                return Err(Error::Program(format!(
                    "function name resolves to {}",
                    other.kind_name()
                )))
            }
        };
        self.func_lib
            .get(&name)
            .cloned()
            .ok_or(Error::UndefinedFunction(name))
    }

    fn ref_kind(&self, r: Ref) -> Option<TokenKind> {
        self.program.primitive(r).and_then(Primitive::as_kind)
    }

    fn num_arg(&mut self, i: usize, op: TokenKind, args: &[Ref], n: usize) -> Result<f64> {
        let value = self.resolve_ref_value(arg(args, n)?)?;
        self.want_num(i, op, value)
    }

    fn str_arg(&mut self, i: usize, op: TokenKind, args: &[Ref], n: usize) -> Result<String> {
        let value = self.resolve_ref_value(arg(args, n)?)?;
        self.want_str(i, op, value)
    }

    fn checks_types(&self) -> bool {
        self.debug || self.type_check
    }

    pub(crate) fn source_of(&self, i: usize) -> Option<String> {
        self.program.sources.get(i).cloned().flatten()
    }

    fn want_num(&self, i: usize, op: TokenKind, v: Value) -> Result<f64> {
        match v {
            Value::Num(n) => Ok(n),
            other if self.checks_types() => Err(Error::Type {
                op: op.name(),
                expected: "number",
                actual: other.kind_name(),
                location: self.source_of(i),
            }),
            _ => Ok(f64::NAN),
        }
    }

    fn want_str(&self, i: usize, op: TokenKind, v: Value) -> Result<String> {
        match v {
            Value::Str(s) => Ok(s),
            other if self.checks_types() => Err(Error::Type {
                op: op.name(),
                expected: "string",
                actual: other.kind_name(),
                location: self.source_of(i),
            }),
            other => Ok(value_to_key(&other)),
        }
    }

    fn compare(&self, i: usize, op: TokenKind, a: Value, b: Value) -> Result<Value> {
        let ord = match (&a, &b) {
            (Value::Num(x), Value::Num(y)) => x.partial_cmp(y),
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            _ if self.checks_types() => {
                return Err(Error::Type {
                    op: op.name(),
                    expected: "two numbers or two strings",
                    actual: a.kind_name(),
                    location: self.source_of(i),
                })
            }
            _ => None,
        };
        let result = match ord {
            None => false,
            Some(ord) => match op {
                TokenKind::Gt => ord.is_gt(),
                TokenKind::Gte => ord.is_ge(),
                TokenKind::Lt => ord.is_lt(),
                _ => ord.is_le(),
            },
        };
        Ok(Value::Bool(result))
    }

    fn shape_error(&self, i: usize, kind: TokenKind, expected: &'static str, v: &Value) -> Error {
        Error::Type {
            op: kind.name(),
            expected,
            actual: v.kind_name(),
            location: self.source_of(i),
        }
    }

    fn container_fallback(
        &self,
        i: usize,
        kind: TokenKind,
        expected: &'static str,
        v: &Value,
    ) -> Result<Value> {
        if self.checks_types() {
            Err(self.shape_error(i, kind, expected, v))
        } else {
            Ok(Value::Null)
        }
    }
}

fn primitive_value(p: &Primitive) -> Value {
    match p {
        Primitive::Null => Value::Null,
        Primitive::Bool(b) => Value::Bool(*b),
        Primitive::Num(n) => Value::Num(*n),
        Primitive::Str(s) => Value::Str(s.clone()),
        // Kind tags and arg markers carry no runtime value of their own.
        Primitive::Kind(_) | Primitive::Arg(_) => Value::Null,
    }
}

fn arg(args: &[Ref], i: usize) -> Result<Ref> {
    args.get(i)
        .copied()
        .ok_or_else(|| Error::Program(format!("missing argument {i}")))
}

#[derive(Default)]
struct MemoState {
    computed: IndexMap<String, Value>,
    in_progress: HashSet<String>,
}

/// The `loop(key)` helper of the recursive traversals: resolve a key of
/// the input collection, computing it at most once. Re-entry into a key
/// still being computed observes the partial value (null).
fn loop_value(
    f: &UserFn,
    input: &Value,
    ctx: Option<&Value>,
    state: &mut MemoState,
    key: &Value,
) -> Value {
    let memo_key = value_to_key(key);
    if let Some(v) = state.computed.get(&memo_key) {
        return v.clone();
    }
    if !state.in_progress.insert(memo_key.clone()) {
        return Value::Null;
    }
    let value = input.index(key).cloned().unwrap_or(Value::Null);
    let result = {
        let mut recur = |k: &Value| loop_value(f, input, ctx, state, k);
        (f.as_ref())(FuncArgs {
            value: &value,
            key,
            context: ctx,
            recur: Some(&mut recur),
        })
    };
    state.in_progress.remove(&memo_key);
    state.computed.insert(memo_key, result.clone());
    result
}
