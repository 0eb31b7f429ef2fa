//! Projection builder.
//!
//! Recursively serializes expression nodes into intermediate references
//! against the three hash-cons tables, applying the operator-specific
//! argument manipulations and computing per-projection invalidation
//! metadata along the way.

use tracing::trace;
use trellis_expr::{ExprGraph, Node, Scalar, Token, TokenKind};
use trellis_program::{MetaFlags, Primitive, MAX_TABLE_INDEX};

use crate::error::{Error, Result};
use crate::intern::{ConsTable, StableHash, StableHasher};

/// An intermediate reference: a tagged `(table, key)` pair. Packing turns
/// it into a single `Ref` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IRef {
    Int(u32),
    Prim(u64),
    Proj(u64),
}

impl StableHash for IRef {
    fn stable_hash(&self, h: &mut StableHasher) {
        match self {
            IRef::Int(n) => {
                h.write_u8(0);
                h.write_u32(*n);
            }
            IRef::Prim(hash) => {
                h.write_u8(1);
                h.write_u64(*hash);
            }
            IRef::Proj(hash) => {
                h.write_u8(2);
                h.write_u64(*hash);
            }
        }
    }
}

/// An intermediate projection, deduplicated by structural hash.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IProjection {
    pub kind: u64,
    pub metadata: u64,
    pub source: Option<String>,
    pub args: Vec<IRef>,
}

impl StableHash for IProjection {
    fn stable_hash(&self, h: &mut StableHasher) {
        h.write_u64(self.kind);
        h.write_u64(self.metadata);
        match &self.source {
            None => h.write_u8(0),
            Some(s) => {
                h.write_u8(1);
                h.write_str(s);
            }
        }
        h.write_u64(self.args.len() as u64);
        for arg in &self.args {
            arg.stable_hash(h);
        }
    }
}

/// An intermediate metadata record: flags plus `(condition, steps)` paths.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IMetadata {
    pub flags: MetaFlags,
    pub paths: Vec<(IRef, Vec<IRef>)>,
}

impl StableHash for IMetadata {
    fn stable_hash(&self, h: &mut StableHasher) {
        h.write_u32(self.flags.bits());
        h.write_u64(self.paths.len() as u64);
        for (cond, steps) in &self.paths {
            cond.stable_hash(h);
            h.write_u64(steps.len() as u64);
            for step in steps {
                step.stable_hash(h);
            }
        }
    }
}

impl StableHash for Primitive {
    fn stable_hash(&self, h: &mut StableHasher) {
        match self {
            Primitive::Null => h.write_u8(0),
            Primitive::Bool(b) => {
                h.write_u8(1);
                h.write_bool(*b);
            }
            Primitive::Num(n) => {
                h.write_u8(2);
                h.write_f64(*n);
            }
            Primitive::Str(s) => {
                h.write_u8(3);
                h.write_str(s);
            }
            Primitive::Kind(k) => {
                h.write_u8(4);
                h.write_u8(k.tag());
            }
            Primitive::Arg(n) => {
                h.write_u8(5);
                h.write_u8(*n);
            }
        }
    }
}

/// The three content-addressed tables populated during a build.
pub(crate) struct Tables {
    pub primitives: ConsTable<Primitive>,
    pub projections: ConsTable<IProjection>,
    pub metadata: ConsTable<IMetadata>,
}

pub(crate) struct ProjectionBuilder<'g> {
    pub tables: Tables,
    graph: &'g ExprGraph,
}

impl<'g> ProjectionBuilder<'g> {
    /// Create a builder with the metadata sentinel pre-interned at index 0.
    pub fn new(graph: &'g ExprGraph) -> Result<Self> {
        let mut tables = Tables {
            primitives: ConsTable::new("primitives"),
            projections: ConsTable::new("projections"),
            metadata: ConsTable::new("metaData"),
        };
        tables.metadata.intern(IMetadata {
            flags: MetaFlags::empty(),
            paths: Vec::new(),
        })?;
        Ok(Self { tables, graph })
    }

    pub fn intern_primitive(&mut self, p: Primitive) -> Result<u64> {
        self.tables.primitives.intern(p)
    }

    /// Serialize a node into an intermediate reference.
    pub fn serialize(&mut self, node: &Node) -> Result<IRef> {
        match node {
            Node::Scalar(Scalar::Num(n)) if is_inline_int(*n) => Ok(IRef::Int(*n as u32)),
            Node::Scalar(s) => Ok(IRef::Prim(self.intern_primitive(Primitive::from(s))?)),
            Node::Token(t) => Ok(IRef::Prim(self.intern_primitive(Primitive::Kind(t.kind))?)),
            Node::Expression(e) => {
                let kind = e.op.kind;
                let args = self.normalize_args(&e.op, &e.args)?;
                let arg_refs = args
                    .iter()
                    .map(|arg| self.serialize(arg))
                    .collect::<Result<Vec<_>>>()?;
                let kind_hash = self.intern_primitive(Primitive::Kind(kind))?;
                let metadata = self.build_metadata(&e.op)?;
                let hash = self.tables.projections.intern(IProjection {
                    kind: kind_hash,
                    metadata,
                    source: e.op.source.clone(),
                    args: arg_refs,
                })?;
                trace!(op = %kind, hash, "projection interned");
                Ok(IRef::Proj(hash))
            }
        }
    }

    /// Apply the operator-specific argument manipulation.
    fn normalize_args(&self, op: &Token, args: &[Node]) -> Result<Vec<Node>> {
        let kind = op.kind;
        match kind {
            TokenKind::Get => {
                let [key, obj] = args else {
                    return Err(Error::Malformed {
                        op: kind.name(),
                        reason: format!("expected 2 arguments, got {}", args.len()),
                    });
                };
                // Reorder to (object, key); a topLevel object puts the
                // top-level index in the key slot.
                let key = if obj.is_token(TokenKind::TopLevel) {
                    self.top_level_index_node(key)?
                } else {
                    key.clone()
                };
                Ok(vec![obj.clone(), key])
            }
            TokenKind::Trace => {
                let value = args.first().cloned().ok_or_else(|| Error::Malformed {
                    op: kind.name(),
                    reason: "expected a value argument".into(),
                })?;
                let (inner_kind, inner_source) = match &value {
                    Node::Expression(e) => (Some(e.op.kind), e.op.source.clone()),
                    Node::Token(t) => (Some(t.kind), t.source.clone()),
                    Node::Scalar(_) => (None, None),
                };
                Ok(vec![
                    value,
                    inner_kind.map_or_else(Node::null, |k| Node::Token(Token::new(k))),
                    inner_source.map_or_else(Node::null, Node::str),
                ])
            }
            TokenKind::And | TokenKind::Or | TokenKind::Ternary => {
                // Prepend the node identity: $id for tracked nodes, -1
                // otherwise.
                let mut out = vec![identity_node(op)];
                out.extend_from_slice(args);
                Ok(out)
            }
            TokenKind::Range => {
                let mut out = args.to_vec();
                if out.is_empty() {
                    return Err(Error::Malformed {
                        op: kind.name(),
                        reason: "expected an end argument".into(),
                    });
                }
                if out.len() < 2 {
                    out.push(Node::num(0.0));
                }
                if out.len() < 3 {
                    out.push(Node::num(1.0));
                }
                Ok(out)
            }
            _ => Ok(args.to_vec()),
        }
    }

    /// Resolve a top-level name node to its index.
    fn top_level_index_node(&self, key: &Node) -> Result<Node> {
        let name = key.as_str().ok_or_else(|| Error::Malformed {
            op: TokenKind::Get.name(),
            reason: "topLevel key must be a string name".into(),
        })?;
        let index = self
            .graph
            .top_level_index(name)
            .ok_or_else(|| Error::UnknownTopLevel(name.to_string()))?;
        Ok(Node::num(index as f64))
    }

    /// Build the metadata record for an operator token, filtering and
    /// rewriting its invalidation paths.
    fn build_metadata(&mut self, op: &Token) -> Result<u64> {
        let mut flags = MetaFlags::empty();
        if op.invalidates {
            flags |= MetaFlags::INVALIDATES;
        }
        let mut paths = Vec::new();
        if let Some(entries) = &op.paths {
            for entry in entries {
                let Some(steps) = self.rewrite_path(&entry.path)? else {
                    trace!(op = %op.kind, "invalidation path discarded");
                    continue;
                };
                let cond = self.serialize(&entry.condition)?;
                let step_refs = steps
                    .iter()
                    .map(|s| self.serialize(s))
                    .collect::<Result<Vec<_>>>()?;
                paths.push((cond, step_refs));
            }
        }
        self.tables.metadata.intern(IMetadata { flags, paths })
    }

    /// Canonicalize one invalidation path. Returns `None` when the path
    /// cannot be caused by any registered setter.
    fn rewrite_path(&self, path: &[Node]) -> Result<Option<Vec<Node>>> {
        let Some(root) = path.first() else {
            return Ok(None);
        };
        match root.head_kind() {
            Some(TokenKind::Context) => {
                // Context values are wrapped in a single-slot sequence at
                // runtime; splice the slot index in after the root.
                let mut out = vec![root.clone(), Node::num(0.0)];
                out.extend_from_slice(&path[1..]);
                Ok(Some(out))
            }
            Some(TokenKind::TopLevel) => {
                let Some(name) = path.get(1) else {
                    return Ok(None);
                };
                let mut out = vec![root.clone(), self.top_level_index_node(name)?];
                out.extend_from_slice(&path[2..]);
                Ok(Some(out))
            }
            Some(TokenKind::Root) => {
                let touched = self
                    .graph
                    .setters
                    .iter()
                    .any(|s| paths_share_prefix(&s.path, path));
                Ok(touched.then(|| path.to_vec()))
            }
            _ => Ok(None),
        }
    }
}

/// Identity argument for short-circuit forms: `$id` for tracked nodes,
/// `-1` otherwise.
fn identity_node(op: &Token) -> Node {
    match (op.tracked, op.id) {
        (true, Some(id)) => Node::num(id as f64),
        _ => Node::num(-1.0),
    }
}

/// Inline-representable integers: non-negative whole numbers below the
/// packed payload ceiling.
fn is_inline_int(n: f64) -> bool {
    n >= 0.0 && n.fract() == 0.0 && n <= MAX_TABLE_INDEX as f64
}

/// Step-wise prefix comparison between a setter step sequence and an
/// invalidation path. A setter `key` step matches any path step; the pair
/// matches when the compared region is equal, i.e. one is a prefix of the
/// other.
fn paths_share_prefix(setter_steps: &[Node], path: &[Node]) -> bool {
    setter_steps
        .iter()
        .zip(path.iter())
        .all(|(s, p)| step_matches(s, p))
}

fn step_matches(setter_step: &Node, path_step: &Node) -> bool {
    if setter_step.is_token(TokenKind::Key) {
        return true;
    }
    match (setter_step, path_step) {
        (Node::Token(a), Node::Token(b)) => a.kind == b.kind,
        (Node::Scalar(Scalar::Str(a)), Node::Scalar(Scalar::Str(b))) => a == b,
        (Node::Scalar(Scalar::Num(a)), Node::Scalar(Scalar::Num(b))) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_expr::build;
    use trellis_expr::SetterKind;

    fn graph_with_setter() -> ExprGraph {
        ExprGraph::new()
            .top_level("a", build::root_get(&["a"]))
            .setter(build::fixed_setter("setA", SetterKind::Set, &["a"]))
    }

    #[test]
    fn test_inline_int_fast_path() {
        let graph = ExprGraph::new();
        let mut b = ProjectionBuilder::new(&graph).unwrap();
        assert_eq!(b.serialize(&Node::num(5.0)).unwrap(), IRef::Int(5));
        assert!(matches!(
            b.serialize(&Node::num(-1.0)).unwrap(),
            IRef::Prim(_)
        ));
        assert!(matches!(
            b.serialize(&Node::num(1.5)).unwrap(),
            IRef::Prim(_)
        ));
    }

    #[test]
    fn test_identical_expressions_dedup() {
        let graph = graph_with_setter();
        let mut b = ProjectionBuilder::new(&graph).unwrap();
        let e1 = build::plus(build::root_get(&["a"]), 1.0);
        let e2 = build::plus(build::root_get(&["a"]), 1.0);
        assert_eq!(b.serialize(&e1).unwrap(), b.serialize(&e2).unwrap());
        // root get + plus
        assert_eq!(b.tables.projections.len(), 2);
    }

    #[test]
    fn test_get_reorders_to_object_key() {
        let graph = graph_with_setter();
        let mut b = ProjectionBuilder::new(&graph).unwrap();
        let IRef::Proj(hash) = b.serialize(&build::root_get(&["a"])).unwrap() else {
            panic!("expected projection ref");
        };
        let idx = b.tables.projections.index_of(hash).unwrap();
        let proj = b.tables.projections.values().nth(idx).unwrap();
        // args[0] is the object (root kind primitive), args[1] the key
        let IRef::Prim(obj_hash) = proj.args[0] else {
            panic!("expected primitive object");
        };
        let obj_idx = b.tables.primitives.index_of(obj_hash).unwrap();
        let obj = b.tables.primitives.values().nth(obj_idx).unwrap();
        assert_eq!(obj.as_kind(), Some(TokenKind::Root));
    }

    #[test]
    fn test_top_level_get_replaces_key_with_index() {
        let graph = ExprGraph::new()
            .top_level("first", build::root_get(&["x"]))
            .top_level("second", build::top_level_get("first"));
        let mut b = ProjectionBuilder::new(&graph).unwrap();
        let IRef::Proj(hash) = b.serialize(&build::top_level_get("first")).unwrap() else {
            panic!("expected projection ref");
        };
        let idx = b.tables.projections.index_of(hash).unwrap();
        let proj = b.tables.projections.values().nth(idx).unwrap();
        assert_eq!(proj.args[1], IRef::Int(0));
    }

    #[test]
    fn test_unknown_top_level_is_an_error() {
        let graph = ExprGraph::new();
        let mut b = ProjectionBuilder::new(&graph).unwrap();
        let err = b.serialize(&build::top_level_get("nope")).unwrap_err();
        assert!(matches!(err, Error::UnknownTopLevel(_)));
    }

    #[test]
    fn test_range_defaults() {
        let graph = ExprGraph::new();
        let mut b = ProjectionBuilder::new(&graph).unwrap();
        let IRef::Proj(hash) = b.serialize(&build::range(3.0)).unwrap() else {
            panic!("expected projection ref");
        };
        let idx = b.tables.projections.index_of(hash).unwrap();
        let proj = b.tables.projections.values().nth(idx).unwrap();
        assert_eq!(proj.args, vec![IRef::Int(3), IRef::Int(0), IRef::Int(1)]);
    }

    #[test]
    fn test_metadata_sentinel_is_index_zero() {
        let graph = graph_with_setter();
        let b = ProjectionBuilder::new(&graph).unwrap();
        assert_eq!(b.tables.metadata.len(), 1);
        let sentinel = b.tables.metadata.values().next().unwrap();
        assert!(sentinel.flags.is_empty() && sentinel.paths.is_empty());
    }

    #[test]
    fn test_untouched_root_path_is_discarded() {
        // The only setter touches model.a; a path under model.b carries no
        // invalidation value.
        let graph = graph_with_setter();
        let mut b = ProjectionBuilder::new(&graph).unwrap();
        let mut expr = build::root_get(&["b"]);
        if let Node::Expression(e) = &mut expr {
            e.op.invalidates = false;
            e.op.paths = Some(vec![trellis_expr::PathEntry {
                condition: Node::null(),
                path: vec![build::root(), Node::str("b")],
            }]);
        }
        b.serialize(&expr).unwrap();
        // Only the sentinel: the filtered metadata record is empty and
        // dedups onto index 0.
        assert_eq!(b.tables.metadata.len(), 1);
    }

    #[test]
    fn test_prefix_match_accepts_key_wildcard() {
        let setter = build::setter("setItem", &["items"]);
        let path = vec![build::root(), Node::str("items"), Node::str("x")];
        assert!(paths_share_prefix(&setter.path, &path));
        let other = vec![build::root(), Node::str("other")];
        assert!(!paths_share_prefix(&setter.path, &other));
    }
}
