//! Constructor helpers for assembling expression graphs.
//!
//! The front end (and the test suites) build graphs through these rather
//! than spelling out `Expression` structs. Argument order follows the raw
//! surface encoding; the compiler's normalization pass reorders where an
//! operator calls for it.

use crate::expr::{Expression, Node};
use crate::graph::{SetterDef, SetterKind};
use crate::token::{Token, TokenKind};

/// The model root.
pub fn root() -> Node {
    Node::token(TokenKind::Root)
}

/// The top-level namespace marker, for reading other derivations.
pub fn top_level() -> Node {
    Node::token(TokenKind::TopLevel)
}

/// The combinator context marker.
pub fn context() -> Node {
    Node::token(TokenKind::Context)
}

/// Property access. Raw argument order is `(key, object)`; the compiler
/// reorders to `(object, key)`.
pub fn get(obj: impl Into<Node>, key: impl Into<Node>) -> Node {
    Expression::new(TokenKind::Get, vec![key.into(), obj.into()]).into()
}

/// A `get` chain rooted at the model: `root_get(&["a", "b"])` reads
/// `model.a.b`.
pub fn root_get(path: &[&str]) -> Node {
    path.iter().fold(root(), |obj, key| get(obj, *key))
}

/// Read another top-level derivation by name.
pub fn top_level_get(name: &str) -> Node {
    get(top_level(), name)
}

fn nary(kind: TokenKind, args: Vec<Node>) -> Node {
    Expression::new(kind, args).into()
}

pub fn plus(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Plus, vec![a.into(), b.into()])
}

pub fn minus(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Minus, vec![a.into(), b.into()])
}

pub fn mult(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Mult, vec![a.into(), b.into()])
}

pub fn div(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Div, vec![a.into(), b.into()])
}

pub fn modulo(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Mod, vec![a.into(), b.into()])
}

pub fn eq(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Eq, vec![a.into(), b.into()])
}

pub fn not_eq(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::NotEq, vec![a.into(), b.into()])
}

pub fn gt(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Gt, vec![a.into(), b.into()])
}

pub fn gte(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Gte, vec![a.into(), b.into()])
}

pub fn lt(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Lt, vec![a.into(), b.into()])
}

pub fn lte(a: impl Into<Node>, b: impl Into<Node>) -> Node {
    nary(TokenKind::Lte, vec![a.into(), b.into()])
}

pub fn not(a: impl Into<Node>) -> Node {
    nary(TokenKind::Not, vec![a.into()])
}

pub fn and(args: Vec<Node>) -> Node {
    nary(TokenKind::And, args)
}

pub fn or(args: Vec<Node>) -> Node {
    nary(TokenKind::Or, args)
}

pub fn ternary(cond: impl Into<Node>, then: impl Into<Node>, otherwise: impl Into<Node>) -> Node {
    nary(
        TokenKind::Ternary,
        vec![cond.into(), then.into(), otherwise.into()],
    )
}

/// `range(end)`, with start and step left to the compiler's defaults.
pub fn range(end: impl Into<Node>) -> Node {
    nary(TokenKind::Range, vec![end.into()])
}

pub fn range_from(end: impl Into<Node>, start: impl Into<Node>, step: impl Into<Node>) -> Node {
    nary(TokenKind::Range, vec![end.into(), start.into(), step.into()])
}

fn combinator(kind: TokenKind, func: &str, input: Node, ctx: Option<Node>) -> Node {
    let mut args = vec![Node::str(func), input];
    if let Some(ctx) = ctx {
        args.push(ctx);
    }
    nary(kind, args)
}

pub fn map(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::Map, func, input.into(), ctx)
}

pub fn filter(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::Filter, func, input.into(), ctx)
}

pub fn any(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::Any, func, input.into(), ctx)
}

pub fn key_by(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::KeyBy, func, input.into(), ctx)
}

pub fn map_values(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::MapValues, func, input.into(), ctx)
}

pub fn map_keys(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::MapKeys, func, input.into(), ctx)
}

pub fn filter_by(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::FilterBy, func, input.into(), ctx)
}

pub fn group_by(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::GroupBy, func, input.into(), ctx)
}

pub fn any_values(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::AnyValues, func, input.into(), ctx)
}

pub fn recursive_map(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::RecursiveMap, func, input.into(), ctx)
}

pub fn recursive_map_values(func: &str, input: impl Into<Node>, ctx: Option<Node>) -> Node {
    combinator(TokenKind::RecursiveMapValues, func, input.into(), ctx)
}

pub fn keys(input: impl Into<Node>) -> Node {
    nary(TokenKind::Keys, vec![input.into()])
}

pub fn values(input: impl Into<Node>) -> Node {
    nary(TokenKind::Values, vec![input.into()])
}

pub fn assign(input: impl Into<Node>) -> Node {
    nary(TokenKind::Assign, vec![input.into()])
}

pub fn defaults(input: impl Into<Node>) -> Node {
    nary(TokenKind::Defaults, vec![input.into()])
}

pub fn size(input: impl Into<Node>) -> Node {
    nary(TokenKind::Size, vec![input.into()])
}

pub fn sum(input: impl Into<Node>) -> Node {
    nary(TokenKind::Sum, vec![input.into()])
}

pub fn flatten(input: impl Into<Node>) -> Node {
    nary(TokenKind::Flatten, vec![input.into()])
}

pub fn string_length(input: impl Into<Node>) -> Node {
    nary(TokenKind::StringLength, vec![input.into()])
}

pub fn to_upper_case(input: impl Into<Node>) -> Node {
    nary(TokenKind::ToUpperCase, vec![input.into()])
}

pub fn to_lower_case(input: impl Into<Node>) -> Node {
    nary(TokenKind::ToLowerCase, vec![input.into()])
}

pub fn starts_with(s: impl Into<Node>, prefix: impl Into<Node>) -> Node {
    nary(TokenKind::StartsWith, vec![s.into(), prefix.into()])
}

pub fn ends_with(s: impl Into<Node>, suffix: impl Into<Node>) -> Node {
    nary(TokenKind::EndsWith, vec![s.into(), suffix.into()])
}

pub fn split(s: impl Into<Node>, separator: impl Into<Node>) -> Node {
    nary(TokenKind::Split, vec![s.into(), separator.into()])
}

/// Invoke a function-library entry with evaluated arguments.
pub fn call(func: &str, args: Vec<Node>) -> Node {
    let mut all = vec![Node::str(func)];
    all.extend(args);
    nary(TokenKind::Call, all)
}

/// Wrap a value in a trace that logs it on every evaluation.
pub fn trace(value: impl Into<Node>) -> Node {
    nary(TokenKind::Trace, vec![value.into()])
}

/// A setter writing `model.<path>.<key-argument>`.
pub fn setter(name: &str, path: &[&str]) -> SetterDef {
    let mut steps = vec![root()];
    steps.extend(path.iter().map(|s| Node::str(*s)));
    steps.push(Node::Token(Token::new(TokenKind::Key)));
    SetterDef::new(name, SetterKind::Set, steps)
}

/// A setter writing exactly `model.<path>` (no positional key argument).
pub fn fixed_setter(name: &str, kind: SetterKind, path: &[&str]) -> SetterDef {
    let mut steps = vec![root()];
    steps.extend(path.iter().map(|s| Node::str(*s)));
    SetterDef::new(name, kind, steps)
}
