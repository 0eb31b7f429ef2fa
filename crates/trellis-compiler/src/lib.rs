//! trellis compiler back end.
//!
//! Consumes a frozen expression graph plus named setter recipes and emits
//! a self-contained envelope: the packed projection tables either embedded
//! in a source template or serialized as a binary blob for the resident
//! VM. The pipeline is a pure batch process:
//!
//! 1. Annotate model-reading nodes with invalidation paths.
//! 2. Build hash-consed projection, primitive, and metadata tables.
//! 3. Compile setters.
//! 4. Pack the tables into dense integer-indexed arrays.
//! 5. Emit the chosen envelope.

mod annotate;
mod builder;
pub mod emit;
mod error;
mod intern;
mod pack;
mod setters;

use tracing::debug;
use trellis_expr::ExprGraph;
use trellis_program::{Primitive, ProjectionData};

pub use error::{Error, Result};

/// Output envelope format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Self-invoking expression.
    #[default]
    Iife,
    /// Named module export.
    ModuleExport,
    /// Binary blob for the resident loader.
    Bytecode,
}

/// Compiler options.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Emit diagnostics support: embedded AST, eager checks, source
    /// locations in errors.
    pub debug: bool,
    /// Enable runtime operand type checking even outside debug mode.
    pub type_check: bool,
    pub format: OutputFormat,
    /// Instance-factory name used by the template back end.
    pub name: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            debug: false,
            type_check: false,
            format: OutputFormat::default(),
            name: "instance".into(),
        }
    }
}

/// A compiled envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Source(String),
    Binary(Vec<u8>),
}

/// The compiler's output: the packed tables, the emitted envelope, and
/// (in debug mode) the serialized input graph.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub data: ProjectionData,
    pub envelope: Envelope,
    pub ast: Option<String>,
}

/// Compile an expression graph into a packed program and envelope.
pub fn compile(graph: &ExprGraph, options: &CompilerOptions) -> Result<CompileOutput> {
    let graph = annotate::annotate(graph.clone());
    debug!(
        top_levels = graph.top_levels.len(),
        setters = graph.setters.len(),
        "compiling expression graph"
    );

    let mut builder = builder::ProjectionBuilder::new(&graph)?;

    // Intern exported names up front so name indices resolve regardless of
    // expression contents.
    let mut name_hashes = Vec::with_capacity(graph.top_levels.len());
    for def in &graph.top_levels {
        name_hashes.push(match &def.name {
            Some(name) => Some(builder.intern_primitive(Primitive::Str(name.clone()))?),
            None => None,
        });
    }

    let mut top_levels = Vec::with_capacity(graph.top_levels.len());
    for (def, name) in graph.top_levels.iter().zip(name_hashes) {
        let projection = builder.serialize(&def.expr)?;
        top_levels.push(pack::TopLevel { name, projection });
    }

    let compiled_setters = graph
        .setters
        .iter()
        .map(|def| setters::compile_setter(&mut builder, def))
        .collect::<Result<Vec<_>>>()?;

    let data = pack::pack(&builder.tables, &compiled_setters, &top_levels)?;
    data.check_integrity().map_err(Error::Internal)?;

    let ast = if options.debug {
        Some(
            serde_json::to_string(&graph)
                .map_err(|e| Error::Internal(format!("ast serialization failed: {e}")))?,
        )
    } else {
        None
    };

    let envelope = match options.format {
        OutputFormat::Bytecode => Envelope::Binary(emit::bytecode::emit(&data)),
        OutputFormat::Iife | OutputFormat::ModuleExport => {
            Envelope::Source(emit::template::emit(&data, options, ast.as_deref())?)
        }
    };

    Ok(CompileOutput {
        data,
        envelope,
        ast,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_expr::build;
    use trellis_expr::SetterKind;
    use trellis_program::wire;

    fn simple_graph() -> ExprGraph {
        ExprGraph::new()
            .top_level(
                "sum",
                build::plus(build::root_get(&["a"]), build::root_get(&["b"])),
            )
            .setter(build::fixed_setter("setA", SetterKind::Set, &["a"]))
            .setter(build::fixed_setter("setB", SetterKind::Set, &["b"]))
    }

    #[test]
    fn test_compile_is_deterministic() {
        let graph = simple_graph();
        let options = CompilerOptions {
            format: OutputFormat::Bytecode,
            ..Default::default()
        };
        let a = compile(&graph, &options).unwrap();
        let b = compile(&graph, &options).unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(
            wire::encode(&a.data),
            wire::encode(&b.data),
            "packed programs must be bit-identical across runs"
        );
    }

    #[test]
    fn test_metadata_sentinel_invariant() {
        let out = compile(&simple_graph(), &CompilerOptions::default()).unwrap();
        assert!(out.data.meta_data[0].is_sentinel());
    }

    #[test]
    fn test_top_level_tables_are_parallel() {
        let out = compile(&simple_graph(), &CompilerOptions::default()).unwrap();
        assert_eq!(
            out.data.top_level_names.len(),
            out.data.top_level_projections.len()
        );
        assert_eq!(out.data.top_level_name(0), Some("sum"));
    }

    #[test]
    fn test_hidden_top_level_has_no_name() {
        let mut graph = simple_graph();
        graph
            .top_levels
            .push(trellis_expr::TopLevelDef::internal(build::root_get(&["a"])));
        let out = compile(&graph, &CompilerOptions::default()).unwrap();
        assert_eq!(out.data.top_level_name(1), None);
        assert_eq!(out.data.top_level_names[1], trellis_program::HIDDEN_NAME);
    }

    #[test]
    fn test_invalidation_paths_survive_for_touched_roots() {
        let out = compile(&simple_graph(), &CompilerOptions::default()).unwrap();
        // The gets of model.a and model.b both have setters touching them,
        // so two non-sentinel metadata records with one path each exist.
        assert!(out.data.paths.len() >= 2);
        let with_paths = out
            .data
            .meta_data
            .iter()
            .filter(|m| !m.paths.is_empty())
            .count();
        assert_eq!(with_paths, 2);
    }

    #[test]
    fn test_untouched_reads_compile_without_paths() {
        // No setter touches model.c: its read must not contribute paths.
        let graph = ExprGraph::new()
            .top_level("c", build::root_get(&["c"]))
            .setter(build::fixed_setter("setA", SetterKind::Set, &["a"]));
        let out = compile(&graph, &CompilerOptions::default()).unwrap();
        assert!(out.data.paths.is_empty());
    }

    #[test]
    fn test_debug_mode_carries_ast() {
        let options = CompilerOptions {
            debug: true,
            ..Default::default()
        };
        let out = compile(&simple_graph(), &options).unwrap();
        let ast = out.ast.unwrap();
        assert!(ast.contains("topLevels") || ast.contains("top_levels"));
    }

    #[test]
    fn test_bytecode_envelope_round_trips() {
        let options = CompilerOptions {
            format: OutputFormat::Bytecode,
            ..Default::default()
        };
        let out = compile(&simple_graph(), &options).unwrap();
        let Envelope::Binary(blob) = &out.envelope else {
            panic!("expected binary envelope");
        };
        assert_eq!(wire::decode(blob).unwrap(), out.data);
    }
}
