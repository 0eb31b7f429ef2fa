//! Universal properties of the compiler and runtime.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;
use trellis_compiler::{compile, CompilerOptions, Envelope, OutputFormat};
use trellis_expr::{build, ExprGraph, SetterKind};
use trellis_program::wire;
use trellis_runtime::{FuncLib, Value};
use trellis_tests::TestHarness;

fn v(j: serde_json::Value) -> Value {
    Value::from(j)
}

fn store_graph() -> ExprGraph {
    ExprGraph::new()
        .top_level(
            "sum",
            build::plus(build::root_get(&["a"]), build::root_get(&["b"])),
        )
        .top_level("negated", build::minus(0.0, build::top_level_get("sum")))
        .setter(build::fixed_setter("setA", SetterKind::Set, &["a"]))
        .setter(build::fixed_setter("setB", SetterKind::Set, &["b"]))
}

#[test]
fn test_compile_output_is_bit_identical_across_runs() {
    let options = CompilerOptions {
        format: OutputFormat::Bytecode,
        ..Default::default()
    };
    let first = compile(&store_graph(), &options).unwrap();
    let second = compile(&store_graph(), &options).unwrap();
    let (Envelope::Binary(a), Envelope::Binary(b)) = (&first.envelope, &second.envelope) else {
        unreachable!();
    };
    assert_eq!(a, b);
}

#[test]
fn test_final_values_depend_only_on_applied_setters() {
    // The same multiset of setter calls, issued three ways, must converge
    // to the same exported values.
    let model = json!({"a": 1, "b": 2});

    let mut sequential = TestHarness::new(&store_graph(), model.clone());
    sequential.invoke("setA", vec![v(json!(7))]);
    sequential.invoke("setB", vec![v(json!(9))]);

    let mut reordered = TestHarness::new(&store_graph(), model.clone());
    reordered.invoke("setB", vec![v(json!(9))]);
    reordered.invoke("setA", vec![v(json!(7))]);

    let mut batched = TestHarness::new(&store_graph(), model);
    batched
        .instance
        .run_in_batch(|i| {
            i.invoke("setA", vec![v(json!(7))]).unwrap();
            i.invoke("setB", vec![v(json!(9))]).unwrap();
        })
        .unwrap();

    for name in ["sum", "negated"] {
        assert_eq!(sequential.get(name), reordered.get(name));
        assert_eq!(sequential.get(name), batched.get(name));
    }
}

#[test]
fn test_dirty_projection_evaluates_at_most_once_per_settle() {
    let calls = Rc::new(Cell::new(0));
    let c = Rc::clone(&calls);
    let funcs = FuncLib::new().with("tally", move |args: trellis_runtime::FuncArgs<'_>| {
        c.set(c.get() + 1);
        args.value.clone()
    });

    // Two top levels share the same deduplicated mapped projection.
    let graph = ExprGraph::new()
        .top_level("first", build::map("tally", build::root_get(&["xs"]), None))
        .top_level("second", build::map("tally", build::root_get(&["xs"]), None))
        .setter(build::fixed_setter("setXs", SetterKind::Set, &["xs"]));
    let mut harness = TestHarness::with_funcs(&graph, json!({"xs": [1]}), funcs);

    assert_eq!(harness.get("first"), v(json!([1])));
    assert_eq!(
        calls.get(),
        1,
        "hash-consed projections share one evaluation"
    );

    harness.invoke("setXs", vec![v(json!([2, 3]))]);
    assert_eq!(harness.get("second"), v(json!([2, 3])));
    assert_eq!(calls.get(), 3, "one recompute over the two new items");
}

#[test]
fn test_metadata_sentinel_in_every_program() {
    for graph in [ExprGraph::new(), store_graph()] {
        let out = compile(&graph, &CompilerOptions::default()).unwrap();
        let sentinel = &out.data.meta_data[0];
        assert!(sentinel.is_sentinel(), "metaData[0] must be (0, [])");
    }
}

#[test]
fn test_wire_round_trip_preserves_every_table() {
    let options = CompilerOptions {
        format: OutputFormat::Bytecode,
        ..Default::default()
    };
    let out = compile(&store_graph(), &options).unwrap();
    let decoded = wire::decode(&wire::encode(&out.data)).unwrap();
    assert_eq!(decoded, out.data);
    decoded.check_integrity().unwrap();
}

#[test]
fn test_template_envelope_embeds_tables_and_setters() {
    let options = CompilerOptions {
        name: "store".into(),
        format: OutputFormat::ModuleExport,
        ..Default::default()
    };
    let out = compile(&store_graph(), &options).unwrap();
    let Envelope::Source(source) = &out.envelope else {
        unreachable!();
    };
    assert!(source.contains("module.exports = store;"));
    assert!(source.contains("\"setA\""));
    assert!(source.contains("\"topLevelNames\""));
    assert!(source.contains("function ensurePath"));
    // Every placeholder was substituted.
    assert!(!source.contains("@NAME@") && !source.contains("@SETTERS@"));
}

#[test]
fn test_instances_share_one_program() {
    // Projection tables are immutable after compile; two instances over
    // the same program stay independent.
    let options = CompilerOptions {
        format: OutputFormat::Bytecode,
        ..Default::default()
    };
    let out = compile(&store_graph(), &options).unwrap();
    let program = std::sync::Arc::new(out.data);

    let mut one = trellis_runtime::Instance::new(
        std::sync::Arc::clone(&program),
        v(json!({"a": 1, "b": 2})),
        trellis_runtime::InstanceOptions::default(),
    )
    .unwrap();
    let mut two = trellis_runtime::Instance::new(
        program,
        v(json!({"a": 10, "b": 20})),
        trellis_runtime::InstanceOptions::default(),
    )
    .unwrap();

    one.invoke("setA", vec![v(json!(5))]).unwrap();
    assert_eq!(one.get("sum").unwrap(), v(json!(7)));
    assert_eq!(two.get("sum").unwrap(), v(json!(30)));
}
