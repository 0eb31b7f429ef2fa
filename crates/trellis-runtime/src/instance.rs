//! The reactive instance.
//!
//! Owns the live model and the per-projection value cache, applies setter
//! mutations, marks invalidations through the precomputed path tables, and
//! drives the recalculate loop that keeps exported top-level values
//! consistent and notifies listeners once per settle.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace};
use trellis_expr::{SetterKind, TokenKind};
use trellis_program::{wire, PackedSetter, Primitive, ProjectionData, Ref, RefSlot};

use crate::error::{Error, Result};
use crate::funclib::FuncLib;
use crate::value::{push_at, set_at, splice_at, Step, Value};

/// Bound on recompute passes within one settle, and on listener-driven
/// settle cycles. Exceeding either fails with `RecalculationDivergence`.
const MAX_PASSES: u32 = 64;

/// Handle to a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener callback, invoked once per settle with a scope that exposes
/// the settled top-level values and queues nested setter calls.
pub type Listener = Box<dyn FnMut(&mut SettleScope<'_>)>;

/// Deferrer invoked on the first setter call after a settled state. Its
/// contract is to call `end_batch` eventually.
pub type BatchingStrategy = Box<dyn FnMut(&mut Instance)>;

/// A queued setter call.
#[derive(Debug, Clone)]
pub(crate) struct PendingCall {
    setter: usize,
    args: Vec<Value>,
}

/// Instance construction options.
#[derive(Default)]
pub struct InstanceOptions {
    pub func_lib: FuncLib,
    pub batching_strategy: Option<BatchingStrategy>,
    pub debug: bool,
    pub type_check: bool,
    /// Embedded AST, surfaced by `ast()` in debug mode.
    pub ast: Option<String>,
}

/// View handed to listeners during a settle.
pub struct SettleScope<'a> {
    exports: &'a IndexMap<String, Value>,
    pending: &'a mut VecDeque<PendingCall>,
    setter_index: &'a IndexMap<String, usize>,
}

impl SettleScope<'_> {
    /// Read a settled top-level value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.exports.get(name)
    }

    /// Queue a setter call; it is applied after this settle completes.
    pub fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<()> {
        let setter = *self
            .setter_index
            .get(name)
            .ok_or_else(|| Error::InvalidSetter {
                name: name.to_string(),
                reason: "unknown setter".into(),
            })?;
        self.pending.push_back(PendingCall { setter, args });
        Ok(())
    }
}

/// A stateful reactive instance of a compiled program.
pub struct Instance {
    pub(crate) program: Arc<ProjectionData>,
    pub(crate) model: Value,
    /// Cached output per projection; absent until first evaluation.
    pub(crate) values: Vec<Option<Value>>,
    /// Projections that must be recomputed.
    pub(crate) dirty: HashSet<usize>,
    /// Reverse argument edges between projections.
    dependents: Vec<Vec<usize>>,
    /// Latest value per top-level projection, hidden ones included.
    top_level_values: Vec<Value>,
    /// Exported surface, refreshed on settle.
    exports: IndexMap<String, Value>,
    setter_index: IndexMap<String, usize>,
    listeners: IndexMap<u64, Listener>,
    next_listener_id: u64,
    pub(crate) func_lib: FuncLib,
    in_batch: bool,
    in_recalculate: bool,
    batch_pending: VecDeque<PendingCall>,
    batching_strategy: Option<BatchingStrategy>,
    pub(crate) debug: bool,
    pub(crate) type_check: bool,
    settled: bool,
    ast: Option<String>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model)
            .field("values", &self.values)
            .field("dirty", &self.dirty)
            .field("dependents", &self.dependents)
            .field("top_level_values", &self.top_level_values)
            .field("exports", &self.exports)
            .field("setter_index", &self.setter_index)
            .field("listeners", &self.listeners.len())
            .field("next_listener_id", &self.next_listener_id)
            .field("in_batch", &self.in_batch)
            .field("in_recalculate", &self.in_recalculate)
            .field("batch_pending", &self.batch_pending)
            .field("batching_strategy", &self.batching_strategy.is_some())
            .field("debug", &self.debug)
            .field("type_check", &self.type_check)
            .field("settled", &self.settled)
            .field("ast", &self.ast)
            .finish()
    }
}

impl Instance {
    /// Build an instance over a compiled program and an initial model.
    ///
    /// The initial settle is deferred until the first observation or
    /// mutation, so listeners registered right after construction observe
    /// it.
    pub fn new(
        program: Arc<ProjectionData>,
        model: Value,
        options: InstanceOptions,
    ) -> Result<Self> {
        program.check_integrity().map_err(Error::Program)?;

        let mut setter_index = IndexMap::new();
        for (i, setter) in program.setters.iter().enumerate() {
            let name = program
                .setter_name(setter)
                .ok_or_else(|| Error::Program(format!("setter {i} has no interned name")))?;
            setter_index.insert(name.to_string(), i);
        }

        let mut dependents = vec![Vec::new(); program.getters.len()];
        for (i, getter) in program.getters.iter().enumerate() {
            for &arg in &getter.args {
                if let RefSlot::Projection(j) = arg.slot() {
                    dependents[j as usize].push(i);
                }
            }
        }

        let instance = Self {
            values: vec![None; program.getters.len()],
            dirty: (0..program.getters.len()).collect(),
            dependents,
            top_level_values: vec![Value::Null; program.top_level_projections.len()],
            exports: IndexMap::new(),
            setter_index,
            listeners: IndexMap::new(),
            next_listener_id: 0,
            func_lib: options.func_lib,
            in_batch: false,
            in_recalculate: false,
            batch_pending: VecDeque::new(),
            batching_strategy: options.batching_strategy,
            debug: options.debug,
            type_check: options.type_check,
            settled: false,
            ast: options.ast,
            model,
            program,
        };

        if instance.debug {
            instance.check_function_library()?;
        }
        Ok(instance)
    }

    /// Resident loader for the bytecode envelope: re-expand the blob into
    /// in-memory tables and build an instance on them.
    pub fn from_blob(blob: &[u8], model: Value, options: InstanceOptions) -> Result<Self> {
        let data = wire::decode(blob).map_err(|e| Error::Program(e.to_string()))?;
        Self::new(Arc::new(data), model, options)
    }

    /// Debug-mode check: every function name the program references must
    /// exist in the library before anything evaluates.
    fn check_function_library(&self) -> Result<()> {
        for getter in &self.program.getters {
            let Some(kind) = self.program.primitive(getter.kind).and_then(Primitive::as_kind)
            else {
                continue;
            };
            if !(kind.is_combinator() || kind == TokenKind::Call) {
                continue;
            }
            let name = getter
                .args
                .first()
                .and_then(|&r| self.program.primitive(r))
                .and_then(Primitive::as_str);
            if let Some(name) = name {
                if !self.func_lib.contains(name) {
                    return Err(Error::UndefinedFunction(name.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Read an exported top-level value, settling first if needed.
    pub fn get(&mut self, name: &str) -> Result<Value> {
        self.ensure_settled()?;
        self.exports
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Program(format!("unknown top level '{name}'")))
    }

    /// The settled exported surface.
    pub fn exports(&mut self) -> Result<&IndexMap<String, Value>> {
        self.ensure_settled()?;
        Ok(&self.exports)
    }

    /// The live model (test and embedding support).
    pub fn model(&self) -> &Value {
        &self.model
    }

    /// Embedded AST, available in debug mode.
    pub fn ast(&self) -> Option<&str> {
        if self.debug {
            self.ast.as_deref()
        } else {
            None
        }
    }

    /// Reserved.
    pub fn source(&self) -> Option<&str> {
        None
    }

    pub fn add_listener(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.insert(id.0, listener);
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.shift_remove(&id.0).is_some()
    }

    pub fn set_batching_strategy(&mut self, strategy: Option<BatchingStrategy>) {
        self.batching_strategy = strategy;
    }

    /// Invoke a named setter with positional arguments.
    pub fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<()> {
        let setter = *self
            .setter_index
            .get(name)
            .ok_or_else(|| Error::InvalidSetter {
                name: name.to_string(),
                reason: "unknown setter".into(),
            })?;

        if self.in_batch || self.in_recalculate || self.batching_strategy.is_some() {
            let first_after_settle = self.batch_pending.is_empty();
            self.batch_pending.push_back(PendingCall { setter, args });
            if first_after_settle
                && !self.in_batch
                && !self.in_recalculate
                && self.batching_strategy.is_some()
            {
                if let Some(mut strategy) = self.batching_strategy.take() {
                    self.in_batch = true;
                    strategy(self);
                    if self.batching_strategy.is_none() {
                        self.batching_strategy = Some(strategy);
                    }
                }
            }
            return Ok(());
        }

        self.ensure_settled()?;
        self.apply_setter_call(setter, &args)?;
        self.recalculate()
    }

    pub fn start_batch(&mut self) {
        self.in_batch = true;
    }

    /// Leave batch mode: drain queued setters in FIFO order, then
    /// recompute once.
    pub fn end_batch(&mut self) -> Result<()> {
        if !self.in_batch {
            return Ok(());
        }
        self.in_batch = false;
        let had_pending = !self.batch_pending.is_empty();
        let pending: Vec<PendingCall> = self.batch_pending.drain(..).collect();
        for call in pending {
            self.apply_setter_call(call.setter, &call.args)?;
        }
        if had_pending || !self.settled {
            self.recalculate()?;
        }
        Ok(())
    }

    /// Run `f` inside a batch scope.
    pub fn run_in_batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        self.start_batch();
        let out = f(self);
        self.end_batch()?;
        Ok(out)
    }

    fn ensure_settled(&mut self) -> Result<()> {
        if !self.settled && !self.in_batch {
            self.recalculate()?;
        }
        Ok(())
    }

    /// Recompute dirty projections to a fixpoint, refresh the exported
    /// surface, and notify listeners once. A no-op while in a batch.
    /// Setters queued during listener execution are drained once per
    /// settle and trigger a follow-up recompute.
    pub fn recalculate(&mut self) -> Result<()> {
        if self.in_batch {
            return Ok(());
        }
        let mut cycles = 0;
        loop {
            cycles += 1;
            if cycles > MAX_PASSES {
                return Err(Error::RecalculationDivergence(MAX_PASSES));
            }

            self.in_recalculate = true;
            let outcome = self.settle_once();
            self.in_recalculate = false;
            outcome?;
            self.settled = true;

            if self.batch_pending.is_empty() {
                return Ok(());
            }
            let pending: Vec<PendingCall> = self.batch_pending.drain(..).collect();
            debug!(queued = pending.len(), "draining setters queued during settle");
            for call in pending {
                self.apply_setter_call(call.setter, &call.args)?;
            }
        }
    }

    /// One settle: derivation passes to a fixpoint, export refresh, one
    /// listener notification round.
    fn settle_once(&mut self) -> Result<()> {
        let program = Arc::clone(&self.program);
        let mut pass = 0;
        loop {
            pass += 1;
            if pass > MAX_PASSES {
                return Err(Error::RecalculationDivergence(MAX_PASSES));
            }

            let mut changed = Vec::new();
            for (j, &r) in program.top_level_projections.iter().enumerate() {
                let value = self.resolve_ref_value(r)?;
                if self.top_level_values[j] != value {
                    self.top_level_values[j] = value;
                    changed.push(j);
                }
            }
            if changed.is_empty() {
                break;
            }
            trace!(pass, changed = changed.len(), "top levels changed");

            let affected = self.collect_top_level_invalidations(&changed)?;
            if affected.is_empty() {
                break;
            }
            self.mark_dirty_with_dependents(&affected);
        }

        for (j, value) in self.top_level_values.iter().enumerate() {
            if let Some(name) = program.top_level_name(j) {
                self.exports.insert(name.to_string(), value.clone());
            }
        }

        self.fire_listeners();
        Ok(())
    }

    fn fire_listeners(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in listeners.values_mut() {
            let mut scope = SettleScope {
                exports: &self.exports,
                pending: &mut self.batch_pending,
                setter_index: &self.setter_index,
            };
            listener(&mut scope);
        }
        self.listeners = listeners;
    }

    /// Apply one setter mutation to the model and mark invalidations.
    fn apply_setter_call(&mut self, setter_idx: usize, args: &[Value]) -> Result<()> {
        let program = Arc::clone(&self.program);
        let setter = &program.setters[setter_idx];
        let name = program.setter_name(setter).unwrap_or_default().to_string();
        let kind = program
            .setter_kind(setter)
            .ok_or_else(|| Error::Program(format!("setter '{name}' has no valid kind tag")))?;
        let token_count = setter.token_count as usize;

        if args.len() < token_count {
            return Err(Error::InvalidSetter {
                name,
                reason: format!(
                    "expected at least {token_count} path arguments, got {}",
                    args.len()
                ),
            });
        }

        let path = self.resolve_setter_path(setter, args, &name)?;
        trace!(setter = %name, ?kind, ?path, "applying setter");

        match kind {
            SetterKind::Set => {
                let value = args.get(token_count).cloned();
                set_at(&mut self.model, &path, value).map_err(|e| named(e, &name))?;
            }
            SetterKind::Push => {
                let value = args.get(token_count).cloned().ok_or_else(|| {
                    Error::InvalidSetter {
                        name: name.clone(),
                        reason: "push requires a value argument".into(),
                    }
                })?;
                push_at(&mut self.model, &path, value).map_err(|e| named(e, &name))?;
            }
            SetterKind::Splice => {
                let start = args
                    .get(token_count)
                    .and_then(Value::as_index)
                    .ok_or_else(|| Error::InvalidSetter {
                        name: name.clone(),
                        reason: "splice requires a non-negative start index".into(),
                    })?;
                let delete_count = args
                    .get(token_count + 1)
                    .and_then(Value::as_index)
                    .ok_or_else(|| Error::InvalidSetter {
                        name: name.clone(),
                        reason: "splice requires a non-negative delete count".into(),
                    })?;
                let items = args[(token_count + 2).min(args.len())..].to_vec();
                splice_at(&mut self.model, &path, start, delete_count, items)
                    .map_err(|e| named(e, &name))?;
            }
        }

        self.mark_model_write(&path)
    }

    /// Resolve a compiled step sequence against call arguments. The first
    /// step is the model root and is not part of the resolved path.
    fn resolve_setter_path(
        &self,
        setter: &PackedSetter,
        args: &[Value],
        name: &str,
    ) -> Result<Vec<Step>> {
        let bad = |reason: String| Error::InvalidSetter {
            name: name.to_string(),
            reason,
        };

        let root_ok = setter
            .steps
            .first()
            .and_then(|&r| self.program.primitive(r))
            .and_then(Primitive::as_kind)
            == Some(TokenKind::Root);
        if !root_ok {
            return Err(Error::Program(format!(
                "setter '{name}' does not start at the model root"
            )));
        }

        let mut path = Vec::with_capacity(setter.steps.len() - 1);
        for &step in &setter.steps[1..] {
            let resolved = match step.slot() {
                RefSlot::Inline(n) => Step::Index(n as usize),
                RefSlot::Primitive(i) => {
                    let prim = self
                        .program
                        .primitives
                        .get(i as usize)
                        .ok_or_else(|| Error::Program("dangling setter step ref".into()))?;
                    match prim {
                        Primitive::Str(s) => Step::Key(s.clone()),
                        Primitive::Num(n) => {
                            let value = Value::Num(*n);
                            Step::Index(value.as_index().ok_or_else(|| {
                                bad(format!("step {n} is not a valid index"))
                            })?)
                        }
                        Primitive::Arg(n) => {
                            let arg = args.get(*n as usize).ok_or_else(|| {
                                bad(format!("missing path argument {n}"))
                            })?;
                            value_to_step(arg).ok_or_else(|| {
                                bad(format!("argument {n} is not a key or index"))
                            })?
                        }
                        other => return Err(bad(format!("unsupported step {other}"))),
                    }
                }
                RefSlot::Projection(_) => {
                    return Err(Error::Program("projection ref in setter path".into()))
                }
            };
            path.push(resolved);
        }
        Ok(path)
    }

    /// Dirty every projection whose invalidation paths cover a written
    /// model path, conditions permitting, then propagate to dependents.
    fn mark_model_write(&mut self, written: &[Step]) -> Result<()> {
        let program = Arc::clone(&self.program);
        let mut affected = Vec::new();
        for (i, getter) in program.getters.iter().enumerate() {
            let meta = &program.meta_data[getter.metadata as usize];
            for &path_idx in &meta.paths {
                let path = &program.paths[path_idx as usize];
                let Some((root, steps)) = self.root_relative_path(path) else {
                    continue;
                };
                if root != TokenKind::Root {
                    // Context paths are call-scoped; no setter writes them.
                    trace!(projection = i, "skipping non-root invalidation path");
                    continue;
                }
                if !prefix_match(&steps, written) {
                    continue;
                }
                if self.condition_holds(path[0])? {
                    affected.push(i);
                    break;
                }
            }
        }
        trace!(?written, affected = affected.len(), "model write marked");
        self.mark_dirty_with_dependents(&affected);
        Ok(())
    }

    /// Dirty projections invalidated by changed top-level values.
    fn collect_top_level_invalidations(&mut self, changed: &[usize]) -> Result<Vec<usize>> {
        let program = Arc::clone(&self.program);
        let mut affected = Vec::new();
        for (i, getter) in program.getters.iter().enumerate() {
            let meta = &program.meta_data[getter.metadata as usize];
            for &path_idx in &meta.paths {
                let path = &program.paths[path_idx as usize];
                let Some((root, steps)) = self.root_relative_path(path) else {
                    continue;
                };
                if root != TokenKind::TopLevel {
                    continue;
                }
                let covers = match steps.first() {
                    Some(Step::Index(j)) => changed.contains(j),
                    _ => false,
                };
                if covers && self.condition_holds(path[0])? {
                    affected.push(i);
                    break;
                }
            }
        }
        Ok(affected)
    }

    /// Split an invalidation path `[cond, root, step...]` into its root
    /// kind and statically resolved steps.
    fn root_relative_path(&self, path: &[Ref]) -> Option<(TokenKind, Vec<Step>)> {
        let root = self
            .program
            .primitive(*path.get(1)?)
            .and_then(Primitive::as_kind)?;
        let mut steps = Vec::with_capacity(path.len() - 2);
        for &r in &path[2..] {
            let step = match r.slot() {
                RefSlot::Inline(n) => Step::Index(n as usize),
                RefSlot::Primitive(i) => match self.program.primitives.get(i as usize)? {
                    Primitive::Str(s) => Step::Key(s.clone()),
                    Primitive::Num(n) => Step::Index(Value::Num(*n).as_index()?),
                    _ => return None,
                },
                RefSlot::Projection(_) => return None,
            };
            steps.push(step);
        }
        Some((root, steps))
    }

    /// Evaluate an invalidation condition. The null primitive is the
    /// unconditional sentinel.
    fn condition_holds(&mut self, cond: Ref) -> Result<bool> {
        match cond.slot() {
            RefSlot::Inline(n) => Ok(n != 0),
            RefSlot::Primitive(i) => {
                match self.program.primitives.get(i as usize) {
                    Some(Primitive::Null) | None => Ok(true),
                    Some(Primitive::Bool(b)) => Ok(*b),
                    Some(Primitive::Num(n)) => Ok(*n != 0.0 && !n.is_nan()),
                    Some(Primitive::Str(s)) => Ok(!s.is_empty()),
                    Some(_) => Ok(true),
                }
            }
            RefSlot::Projection(i) => Ok(self.eval(i as usize)?.truthy()),
        }
    }

    fn mark_dirty_with_dependents(&mut self, seeds: &[usize]) {
        let mut queue: VecDeque<usize> = seeds.iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if !self.dirty.insert(i) {
                continue;
            }
            for &dep in &self.dependents[i] {
                queue.push_back(dep);
            }
        }
    }
}

fn named(e: Error, name: &str) -> Error {
    match e {
        Error::InvalidSetter { reason, .. } => Error::InvalidSetter {
            name: name.to_string(),
            reason,
        },
        other => other,
    }
}

fn value_to_step(v: &Value) -> Option<Step> {
    match v {
        Value::Str(s) => Some(Step::Key(s.clone())),
        Value::Num(_) => v.as_index().map(Step::Index),
        _ => None,
    }
}

/// True when one path is a step-wise prefix of the other: a write to an
/// ancestor dirties descendants and a write below a watched prefix dirties
/// the watcher.
fn prefix_match(a: &[Step], b: &[Step]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}
