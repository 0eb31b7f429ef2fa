//! Invalidation-path annotation.
//!
//! Walks the expression graph before building and attaches an
//! unconditional invalidation path to every model-reading `get` whose
//! chain is statically known: rooted at `root`, `topLevel`, or `context`
//! and stepped by scalar keys. Tokens that already carry a path map (a
//! front end may compute richer, conditional ones) are left untouched.

use trellis_expr::{ExprGraph, Node, PathEntry, TokenKind};

/// Annotate every top-level expression of the graph.
pub(crate) fn annotate(mut graph: ExprGraph) -> ExprGraph {
    for def in &mut graph.top_levels {
        let expr = std::mem::replace(&mut def.expr, Node::null());
        def.expr = annotate_node(expr).0;
    }
    graph
}

/// Rewrite a node, returning it together with the static model path it
/// denotes (when it is a root-anchored chain).
fn annotate_node(node: Node) -> (Node, Option<Vec<Node>>) {
    match node {
        Node::Token(t) => {
            let path = match t.kind {
                TokenKind::Root | TokenKind::TopLevel | TokenKind::Context => {
                    Some(vec![Node::Token(t.clone())])
                }
                _ => None,
            };
            (Node::Token(t), path)
        }
        Node::Scalar(_) => (node, None),
        Node::Expression(mut e) => {
            if e.op.kind == TokenKind::Get && e.args.len() == 2 {
                // Raw argument order is (key, object).
                let key = e.args.remove(0);
                let (obj, obj_path) = annotate_node(e.args.remove(0));
                let (key, _) = annotate_node(key);

                let own_path = match (&obj_path, &key) {
                    (Some(prefix), Node::Scalar(_)) => {
                        let mut path = prefix.clone();
                        path.push(key.clone());
                        Some(path)
                    }
                    _ => None,
                };

                if e.op.paths.is_none() {
                    if let Some(path) = &own_path {
                        e.op.invalidates = true;
                        e.op.paths = Some(vec![PathEntry {
                            condition: Node::null(),
                            path: path.clone(),
                        }]);
                    }
                }
                e.args = vec![key, obj];
                (Node::Expression(e), own_path)
            } else {
                e.args = e
                    .args
                    .into_iter()
                    .map(|arg| annotate_node(arg).0)
                    .collect();
                (Node::Expression(e), None)
            }
        }
    }
}
