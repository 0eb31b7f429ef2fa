//! Integration tests for end-to-end trellis execution.
//!
//! These tests verify the full pipeline:
//! Build graph → Compile → Pack → Load envelope → Mutate → Verify

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::json;
use trellis_expr::{build, ExprGraph, SetterKind};
use trellis_runtime::{Error, FuncLib, Value};
use trellis_tests::TestHarness;

fn v(j: serde_json::Value) -> Value {
    Value::from(j)
}

/// Sum of two model leaves, recomputed when either is set.
fn sum_graph() -> ExprGraph {
    ExprGraph::new()
        .top_level(
            "sum",
            build::plus(build::root_get(&["a"]), build::root_get(&["b"])),
        )
        .setter(build::fixed_setter("setA", SetterKind::Set, &["a"]))
        .setter(build::fixed_setter("setB", SetterKind::Set, &["b"]))
}

#[test]
fn test_simple_derivation() {
    let mut harness = TestHarness::new(&sum_graph(), json!({"a": 1, "b": 2}));
    let settles = harness.settle_counter();

    assert_eq!(harness.get("sum"), v(json!(3)));
    assert_eq!(settles.get(), 1, "initial settle notifies once");

    harness.invoke("setA", vec![v(json!(5))]);
    assert_eq!(harness.get("sum"), v(json!(7)));
    assert_eq!(settles.get(), 2, "one settle per setter call");
}

#[test]
fn test_batching_settles_once() {
    let mut harness = TestHarness::new(&sum_graph(), json!({"a": 1, "b": 2}));
    let settles = harness.settle_counter();
    assert_eq!(harness.get("sum"), v(json!(3)));

    harness
        .instance
        .run_in_batch(|instance| {
            instance.invoke("setA", vec![v(json!(10))]).unwrap();
            instance.invoke("setB", vec![v(json!(20))]).unwrap();
        })
        .unwrap();

    assert_eq!(harness.get("sum"), v(json!(30)));
    assert_eq!(settles.get(), 2, "the whole batch settles once");
}

#[test]
fn test_batching_boundaries_do_not_change_results() {
    let model = json!({"a": 1, "b": 2});
    let mut unbatched = TestHarness::new(&sum_graph(), model.clone());
    unbatched.invoke("setA", vec![v(json!(10))]);
    unbatched.invoke("setB", vec![v(json!(20))]);

    let mut batched = TestHarness::new(&sum_graph(), model);
    batched
        .instance
        .run_in_batch(|instance| {
            instance.invoke("setA", vec![v(json!(10))]).unwrap();
            instance.invoke("setB", vec![v(json!(20))]).unwrap();
        })
        .unwrap();

    assert_eq!(unbatched.get("sum"), batched.get("sum"));
}

#[test]
fn test_push_and_splice() {
    let graph = ExprGraph::new()
        .top_level("total", build::sum(build::root_get(&["list"])))
        .setter(build::fixed_setter("push", SetterKind::Push, &["list"]))
        .setter(build::fixed_setter("splice", SetterKind::Splice, &["list"]));
    let mut harness = TestHarness::new(&graph, json!({"list": [1, 2, 3]}));

    assert_eq!(harness.get("total"), v(json!(6)));

    harness.invoke("push", vec![v(json!(4))]);
    assert_eq!(harness.get("total"), v(json!(10)));

    harness.invoke("splice", vec![v(json!(1)), v(json!(2))]);
    assert_eq!(harness.get("total"), v(json!(5)));
    assert_eq!(harness.instance.model().index(&v(json!("list"))), Some(&v(json!([1, 4]))));
}

#[test]
fn test_recursive_traversal_computes_each_key_once() {
    let counts: Rc<RefCell<HashMap<String, usize>>> = Rc::default();
    let c = Rc::clone(&counts);
    let funcs = FuncLib::new().with("reach", move |args: trellis_runtime::FuncArgs<'_>| {
        let key = args.key.as_str().unwrap_or_default().to_string();
        *c.borrow_mut().entry(key).or_insert(0) += 1;

        let children = args.value.as_array().map(<[Value]>::to_vec).unwrap_or_default();
        let mut out = children.clone();
        if let Some(recur) = args.recur {
            for child in &children {
                if let Value::Array(reachable) = recur(child) {
                    out.extend(reachable);
                }
            }
        }
        Value::Array(out)
    });

    let graph = ExprGraph::new()
        .top_level(
            "reach",
            build::recursive_map_values("reach", build::root_get(&["tree"]), None),
        )
        .setter(build::fixed_setter("setTree", SetterKind::Set, &["tree"]));
    let mut harness = TestHarness::with_funcs(
        &graph,
        json!({"tree": {"a": ["b"], "b": ["c"], "c": []}}),
        funcs,
    );

    let reach = harness.get("reach");
    assert_eq!(
        reach.index(&v(json!("a"))),
        Some(&v(json!(["b", "c"]))),
        "reachable set accumulates in traversal order"
    );
    assert_eq!(reach.index(&v(json!("c"))), Some(&v(json!([]))));

    for key in ["a", "b", "c"] {
        assert_eq!(counts.borrow()[key], 1, "key '{key}' computed once");
    }
}

#[test]
fn test_invalidation_filters_untouched_paths() {
    let calls = Rc::new(Cell::new(0));
    let c = Rc::clone(&calls);
    let funcs = FuncLib::new().with("double", move |args: trellis_runtime::FuncArgs<'_>| {
        c.set(c.get() + 1);
        Value::Num(args.value.as_num().unwrap_or(f64::NAN) * 2.0)
    });

    let graph = ExprGraph::new()
        .top_level("doubled", build::map("double", build::root_get(&["ys"]), None))
        .top_level("xcopy", build::root_get(&["x"]))
        .setter(build::fixed_setter("setX", SetterKind::Set, &["x"]))
        .setter(build::fixed_setter("setYs", SetterKind::Set, &["ys"]));
    let mut harness =
        TestHarness::with_funcs(&graph, json!({"x": 1, "ys": [1, 2]}), funcs);

    assert_eq!(harness.get("doubled"), v(json!([2, 4])));
    let after_settle = calls.get();

    harness.invoke("setX", vec![v(json!(9))]);
    assert_eq!(harness.get("xcopy"), v(json!(9)));
    assert_eq!(
        calls.get(),
        after_settle,
        "a setter touching only x must not recompute the ys projection"
    );

    harness.invoke("setYs", vec![v(json!([3]))]);
    assert_eq!(harness.get("doubled"), v(json!([6])));
    assert!(calls.get() > after_settle);
}

#[test]
fn test_debug_type_error_names_operator_and_source() {
    let mut mult = build::mult(build::root_get(&["x"]), 2.0);
    if let trellis_expr::Node::Expression(e) = &mut mult {
        e.op.source = Some("model.trellis:3:14".into());
    }
    let graph = ExprGraph::new()
        .top_level("double", mult)
        .setter(build::fixed_setter("setX", SetterKind::Set, &["x"]));

    let mut harness =
        TestHarness::with_options(&graph, json!({"x": 1}), FuncLib::new(), true);
    assert_eq!(harness.get("double"), v(json!(2)));

    let err = harness
        .instance
        .invoke("setX", vec![v(json!("hi"))])
        .unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, Error::Type { .. }), "got {message}");
    assert!(message.contains("mult"), "got {message}");
    assert!(message.contains("model.trellis:3:14"), "got {message}");
}

#[test]
fn test_non_debug_multiplication_is_nan_not_error() {
    let graph = ExprGraph::new()
        .top_level("double", build::mult(build::root_get(&["x"]), 2.0))
        .setter(build::fixed_setter("setX", SetterKind::Set, &["x"]));
    let mut harness = TestHarness::new(&graph, json!({"x": 1}));

    harness.invoke("setX", vec![v(json!("hi"))]);
    match harness.get("double") {
        Value::Num(n) => assert!(n.is_nan()),
        other => panic!("expected a NaN-like number, got {other:?}"),
    }
}

#[test]
fn test_top_level_dependency_recomputes_through_fixpoint() {
    let graph = ExprGraph::new()
        .top_level(
            "sum",
            build::plus(build::root_get(&["a"]), build::root_get(&["b"])),
        )
        .top_level("twice", build::mult(build::top_level_get("sum"), 2.0))
        .setter(build::fixed_setter("setA", SetterKind::Set, &["a"]));
    let mut harness = TestHarness::new(&graph, json!({"a": 1, "b": 2}));

    assert_eq!(harness.get("twice"), v(json!(6)));
    harness.invoke("setA", vec![v(json!(10))]);
    assert_eq!(harness.get("sum"), v(json!(12)));
    assert_eq!(harness.get("twice"), v(json!(24)));
}

#[test]
fn test_listener_setter_calls_are_drained_after_settle() {
    let mut harness = TestHarness::new(&sum_graph(), json!({"a": 1, "b": 2}));
    assert_eq!(harness.get("sum"), v(json!(3)));

    let fired = Rc::new(Cell::new(false));
    let f = Rc::clone(&fired);
    harness.instance.add_listener(Box::new(move |scope| {
        // Push the sum above 100 once, from inside the settle.
        let small = scope
            .get("sum")
            .and_then(Value::as_num)
            .is_some_and(|n| n < 100.0);
        if small && !f.get() {
            f.set(true);
            scope.invoke("setA", vec![Value::Num(100.0)]).unwrap();
        }
    }));

    harness.invoke("setB", vec![v(json!(5))]);
    assert_eq!(harness.get("sum"), v(json!(105)));
}

#[test]
fn test_listener_can_be_removed() {
    let mut harness = TestHarness::new(&sum_graph(), json!({"a": 1, "b": 2}));
    let counter = Rc::new(Cell::new(0));
    let c = Rc::clone(&counter);
    let id = harness.instance.add_listener(Box::new(move |_| {
        c.set(c.get() + 1);
    }));

    assert_eq!(harness.get("sum"), v(json!(3)));
    assert_eq!(counter.get(), 1);

    assert!(harness.instance.remove_listener(id));
    harness.invoke("setA", vec![v(json!(5))]);
    assert_eq!(counter.get(), 1, "removed listeners stay silent");
    assert!(!harness.instance.remove_listener(id));
}

#[test]
fn test_batching_strategy_defers_until_end_batch() {
    let mut harness = TestHarness::new(&sum_graph(), json!({"a": 1, "b": 2}));
    assert_eq!(harness.get("sum"), v(json!(3)));

    let invoked = Rc::new(Cell::new(0));
    let strategy_calls = Rc::clone(&invoked);
    harness
        .instance
        .set_batching_strategy(Some(Box::new(move |_| {
            strategy_calls.set(strategy_calls.get() + 1);
        })));

    harness.invoke("setA", vec![v(json!(50))]);
    harness.invoke("setB", vec![v(json!(50))]);
    assert_eq!(invoked.get(), 1, "strategy runs on the first deferred setter");
    assert_eq!(
        harness.instance.model().index(&v(json!("a"))),
        Some(&v(json!(1))),
        "deferred setters leave the model untouched"
    );

    harness.instance.end_batch().unwrap();
    assert_eq!(harness.get("sum"), v(json!(100)));
}

#[test]
fn test_nested_get_chain_and_removal() {
    let graph = ExprGraph::new()
        .top_level("inner", build::root_get(&["outer", "inner"]))
        .setter(build::setter("setOuter", &["outer"]));
    let mut harness = TestHarness::new(&graph, json!({"outer": {"inner": 7}}));

    assert_eq!(harness.get("inner"), v(json!(7)));

    harness.invoke("setOuter", vec![v(json!("inner")), v(json!(8))]);
    assert_eq!(harness.get("inner"), v(json!(8)));

    // Key setter with no value argument removes the key entirely.
    harness.invoke("setOuter", vec![v(json!("inner"))]);
    assert_eq!(harness.get("inner"), Value::Null);
}

#[test]
fn test_setter_materializes_missing_path() {
    let graph = ExprGraph::new()
        .top_level("leaf", build::root_get(&["deep", "leaf"]))
        .setter(build::setter("setDeep", &["deep"]));
    let mut harness = TestHarness::new(&graph, json!({}));

    assert_eq!(harness.get("leaf"), Value::Null);
    harness.invoke("setDeep", vec![v(json!("leaf")), v(json!(42))]);
    assert_eq!(harness.get("leaf"), v(json!(42)));
}

#[test]
fn test_splice_through_keyed_container_is_invalid() {
    let graph = ExprGraph::new()
        .top_level("obj", build::root_get(&["obj"]))
        .setter(build::fixed_setter("spliceObj", SetterKind::Splice, &["obj"]));
    let mut harness = TestHarness::new(&graph, json!({"obj": {"k": 1}}));

    let err = harness
        .instance
        .invoke("spliceObj", vec![v(json!(0)), v(json!(1))])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSetter { .. }));
}

#[test]
fn test_debug_missing_function_fails_at_load() {
    let graph = ExprGraph::new()
        .top_level("mapped", build::map("nope", build::root_get(&["xs"]), None))
        .setter(build::fixed_setter("setXs", SetterKind::Set, &["xs"]));
    let options = trellis_compiler::CompilerOptions {
        debug: true,
        format: trellis_compiler::OutputFormat::Bytecode,
        ..Default::default()
    };
    let output = trellis_compiler::compile(&graph, &options).unwrap();
    let trellis_compiler::Envelope::Binary(blob) = &output.envelope else {
        unreachable!();
    };
    let err = trellis_runtime::Instance::from_blob(
        blob,
        Value::from(json!({"xs": []})),
        trellis_runtime::InstanceOptions {
            debug: true,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::UndefinedFunction(name) if name == "nope"));
}

#[test]
fn test_debug_instance_exposes_ast() {
    let mut harness =
        TestHarness::with_options(&sum_graph(), json!({"a": 1, "b": 2}), FuncLib::new(), true);
    let ast = harness.instance.ast().expect("debug mode embeds the ast");
    assert!(ast.contains("sum"));
    assert!(harness.instance.source().is_none(), "source() is reserved");
    assert_eq!(harness.get("sum"), v(json!(3)));
}
