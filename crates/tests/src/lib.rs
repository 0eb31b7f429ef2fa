//! Test harness for end-to-end trellis execution.
//!
//! Drives the full pipeline: expression graph → compile → bytecode
//! envelope → resident loader → reactive instance. Intentionally goes
//! through the binary envelope so every test also exercises the wire
//! codec.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Once;

use trellis_compiler::{compile, CompilerOptions, Envelope, OutputFormat};
use trellis_expr::ExprGraph;
use trellis_runtime::{FuncLib, Instance, InstanceOptions, Value};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A compiled program with a live instance.
pub struct TestHarness {
    pub instance: Instance,
}

impl TestHarness {
    /// Compile and instantiate with an empty function library.
    ///
    /// # Panics
    ///
    /// Panics if compilation or envelope loading fails.
    pub fn new(graph: &ExprGraph, model: serde_json::Value) -> Self {
        Self::with_options(graph, model, FuncLib::new(), false)
    }

    /// Compile and instantiate with a function library.
    pub fn with_funcs(graph: &ExprGraph, model: serde_json::Value, func_lib: FuncLib) -> Self {
        Self::with_options(graph, model, func_lib, false)
    }

    pub fn with_options(
        graph: &ExprGraph,
        model: serde_json::Value,
        func_lib: FuncLib,
        debug: bool,
    ) -> Self {
        init_tracing();
        let options = CompilerOptions {
            debug,
            format: OutputFormat::Bytecode,
            ..Default::default()
        };
        let output = compile(graph, &options).expect("graph must compile");
        let Envelope::Binary(blob) = &output.envelope else {
            unreachable!("bytecode format emits a binary envelope");
        };
        let instance = Instance::from_blob(
            blob,
            Value::from(model),
            InstanceOptions {
                func_lib,
                debug,
                ast: output.ast.clone(),
                ..Default::default()
            },
        )
        .expect("envelope must load");
        Self { instance }
    }

    /// Read an exported top-level value.
    pub fn get(&mut self, name: &str) -> Value {
        self.instance.get(name).expect("top level read")
    }

    /// Invoke a named setter.
    pub fn invoke(&mut self, name: &str, args: Vec<Value>) {
        self.instance.invoke(name, args).expect("setter call");
    }

    /// Register a listener that counts settles.
    pub fn settle_counter(&mut self) -> Rc<Cell<usize>> {
        let counter = Rc::new(Cell::new(0));
        let c = Rc::clone(&counter);
        self.instance.add_listener(Box::new(move |_| {
            c.set(c.get() + 1);
        }));
        counter
    }
}
