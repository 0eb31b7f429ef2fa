//! Setter compilation.
//!
//! Each named setter becomes a `(kind, name, token-count, steps)` record.
//! The token count is the number of bound positional path arguments; a
//! terminal `key` token is rewritten into a synthetic `arg{n}` marker so
//! the runtime can substitute call arguments into the path.

use trellis_expr::{Node, SetterDef, TokenKind};
use trellis_program::Primitive;

use crate::builder::{IRef, ProjectionBuilder};
use crate::error::{Error, Result};

/// An intermediate compiled setter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ISetter {
    pub kind: u64,
    pub name: u64,
    pub token_count: u32,
    pub steps: Vec<IRef>,
}

pub(crate) fn compile_setter(
    builder: &mut ProjectionBuilder<'_>,
    def: &SetterDef,
) -> Result<ISetter> {
    if !def.path.first().is_some_and(|n| n.is_token(TokenKind::Root)) {
        return Err(Error::InvalidSetterPath {
            name: def.name.clone(),
            reason: "path must start at the model root".into(),
        });
    }

    let token_steps = def
        .path
        .iter()
        .filter(|s| matches!(s, Node::Token(_)))
        .count();
    let token_count = token_steps.saturating_sub(1) as u32;

    let mut steps = Vec::with_capacity(def.path.len());
    for step in &def.path {
        if step.is_token(TokenKind::Key) {
            let n = token_count.checked_sub(1).ok_or_else(|| Error::InvalidSetterPath {
                name: def.name.clone(),
                reason: "key token without a bound argument".into(),
            })?;
            if n > u8::MAX as u32 {
                return Err(Error::InvalidSetterPath {
                    name: def.name.clone(),
                    reason: format!("too many bound arguments ({n})"),
                });
            }
            steps.push(IRef::Prim(
                builder.intern_primitive(Primitive::Arg(n as u8))?,
            ));
        } else {
            steps.push(builder.serialize(step)?);
        }
    }

    let kind = builder.intern_primitive(Primitive::Str(def.kind.name().into()))?;
    let name = builder.intern_primitive(Primitive::Str(def.name.clone()))?;

    Ok(ISetter {
        kind,
        name,
        token_count,
        steps,
    })
}
