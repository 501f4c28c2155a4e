//! Dataflow executor.
//!
//! Every statement of an entered block becomes a task. A task runs when the
//! values it reads are set; otherwise it parks on the first unset one and is
//! re-queued by the write. Declarations happen when a block is entered, so a
//! read never races its own declaration. The executor is single threaded and
//! cooperative; statement order inside a block only decides queue order.
//!
//! A loop opens its iterations in chunks: after each chunk the loop task goes
//! to the back of the ready queue, so iterations already opened can finish
//! and give their scopes back before more are opened.

use crate::call::{self, Activations, FrameId};
use crate::error::{RuntimeError, RuntimeResult};
use crate::eval::{Eval, Evaluator};
use crate::host::{self, Host};
use crate::range::{self, TripDescriptor};
use crate::store::{next_index, ScopeId, TaskId, ValueId, ValueStore, Waiter};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};
use weft_syntax::{Block, Expr, FunctionDef, Program, Scalar, Stmt, Type};

#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    /// Live activations allowed before a call fails with stack exhaustion.
    pub max_activations: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_activations: 100_000,
        }
    }
}

/// Shared flag that aborts a run between two steps.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Iterations a loop opens per scheduling step.
const ITERATION_CHUNK: i64 = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub steps: u64,
    pub writes: u64,
    pub activations: u64,
    pub peak_activations: usize,
    /// Size of the value arena; released slots are reused.
    pub values_allocated: usize,
    pub scopes_allocated: usize,
}

#[derive(Clone, Copy)]
struct Task<'p> {
    scope: ScopeId,
    frame: FrameId,
    stmt: &'p Stmt,
    /// Set once a loop has resolved its range and opened some iterations.
    cursor: Option<LoopCursor>,
}

#[derive(Clone, Copy)]
struct LoopCursor {
    trip: TripDescriptor,
    next: i64,
}

enum Step {
    Done,
    Blocked(ValueId),
    /// A loop with iterations left to open.
    Yield(LoopCursor),
}

pub struct Executor<'p, H: Host> {
    program: &'p Program,
    functions: HashMap<&'p str, &'p FunctionDef>,
    store: ValueStore,
    frames: Activations<'p>,
    globals: ScopeId,
    tasks: Vec<Option<Task<'p>>>,
    free_tasks: Vec<TaskId>,
    ready: VecDeque<TaskId>,
    parked: BTreeMap<TaskId, ValueId>,
    host: H,
    options: RuntimeOptions,
    cancel: Option<CancelToken>,
    steps: u64,
    root_calls: u32,
}

impl<'p, H: Host> Executor<'p, H> {
    pub fn new(program: &'p Program, host: H) -> RuntimeResult<Self> {
        Self::with_options(program, host, RuntimeOptions::default())
    }

    pub fn with_options(program: &'p Program, host: H, options: RuntimeOptions) -> RuntimeResult<Self> {
        let mut store = ValueStore::new();
        let globals = store.open_scope("globals", None, None)?;
        for (name, value) in &program.globals {
            let id = store.declare(globals, name, value.ty())?;
            store.set(id, value.clone())?;
        }
        let functions = program
            .functions
            .iter()
            .map(|f| (f.name.as_str(), f))
            .collect();
        Ok(Self {
            program,
            functions,
            store,
            frames: Activations::new(),
            globals,
            tasks: Vec::new(),
            free_tasks: Vec::new(),
            ready: VecDeque::new(),
            parked: BTreeMap::new(),
            host,
            options,
            cancel: None,
            steps: 0,
            root_calls: 0,
        })
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            steps: self.steps,
            writes: self.store.writes(),
            activations: self.frames.total(),
            peak_activations: self.frames.peak(),
            values_allocated: self.store.slots_allocated(),
            scopes_allocated: self.store.scopes_allocated(),
        }
    }

    /// Run the program's entry function to completion.
    pub fn run(&mut self) -> RuntimeResult<()> {
        let entry = self.program.entry.as_str();
        info!(entry, "running");
        self.call_function(entry, Vec::new())?;
        let stats = self.stats();
        info!(
            steps = stats.steps,
            writes = stats.writes,
            activations = stats.activations,
            peak = stats.peak_activations,
            "finished"
        );
        Ok(())
    }

    /// Call `name` with ready arguments and drive the run until every task
    /// has finished. Returns the output content, if the function has one.
    ///
    /// After an error the executor is left mid-run and should be dropped.
    pub fn call_function(&mut self, name: &str, args: Vec<Scalar>) -> RuntimeResult<Option<Scalar>> {
        let function = self.function(name)?;
        let sink = match &function.output {
            Some(out) => {
                self.root_calls += 1;
                let label = format!("{}#result{}", name, self.root_calls);
                Some(self.store.declare(self.globals, &label, out.ty)?)
            }
            None => None,
        };
        let output = self.activate(function, args, None, 0)?;
        if let (Some(output), Some(sink)) = (output, sink) {
            let woken = self.store.forward(output, sink)?;
            self.wake(woken);
        }
        self.drive()?;
        match sink {
            Some(sink) => match self.store.read(sink)? {
                std::task::Poll::Ready(v) => Ok(Some(v.clone())),
                std::task::Poll::Pending => Err(RuntimeError::UnboundVariable {
                    name: self.store.name(sink).to_string(),
                    scope: "globals".to_string(),
                }),
            },
            None => Ok(None),
        }
    }

    fn function(&self, name: &str) -> RuntimeResult<&'p FunctionDef> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownFunction {
                name: name.to_string(),
            })
    }

    fn activate(
        &mut self,
        function: &'p FunctionDef,
        args: Vec<Scalar>,
        owner: Option<ScopeId>,
        depth: usize,
    ) -> RuntimeResult<Option<ValueId>> {
        let (frame, scope, output) = call::activate(
            &mut self.store,
            &mut self.frames,
            function,
            args,
            self.globals,
            owner,
            depth,
            self.options.max_activations,
        )?;
        self.spawn_block(&function.body, scope, frame)?;
        self.finish_scope(scope)?;
        Ok(output)
    }

    fn drive(&mut self) -> RuntimeResult<()> {
        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                debug!(pending = self.ready.len() + self.parked.len(), "cancelled");
                self.ready.clear();
                self.parked.clear();
                return Err(RuntimeError::Cancelled);
            }
            let Some(id) = self.ready.pop_front() else {
                break;
            };
            let Some(task) = self.tasks[id.0 as usize] else {
                continue;
            };
            self.steps += 1;
            match self.exec(task) {
                Ok(Step::Done) => {
                    self.tasks[id.0 as usize] = None;
                    self.free_tasks.push(id);
                    self.finish_scope(task.scope)
                        .map_err(|e| e.in_construct(self.describe(task)))?;
                }
                Ok(Step::Yield(cursor)) => {
                    self.tasks[id.0 as usize] = Some(Task {
                        cursor: Some(cursor),
                        ..task
                    });
                    self.ready.push_back(id);
                }
                Ok(Step::Blocked(value)) => {
                    trace!(task = id.0, %value, "parked");
                    if self.store.wait(value, Waiter::Task(id))? {
                        self.parked.insert(id, value);
                    } else {
                        self.ready.push_back(id);
                    }
                }
                Err(e) => return Err(e.in_construct(self.describe(task))),
            }
        }
        if let Some((&id, &value)) = self.parked.iter().next() {
            let err = RuntimeError::Deadlock {
                name: self.store.name(value).to_string(),
                waiting: self.parked.len(),
            };
            let construct = self.tasks[id.0 as usize].map(|t| self.describe(t));
            return Err(match construct {
                Some(c) => err.in_construct(c),
                None => err,
            });
        }
        Ok(())
    }

    fn exec(&mut self, task: Task<'p>) -> RuntimeResult<Step> {
        match task.stmt {
            // Declared when the enclosing block was entered.
            Stmt::Declare(_) => Ok(Step::Done),
            Stmt::Assign {
                target,
                value: Expr::Call { function, args },
                ..
            } => {
                let target = self.store.resolve(task.scope, target)?;
                let args = match Evaluator::new(&self.store, task.scope).evaluate_all(args)? {
                    Eval::Ready(v) => v,
                    Eval::Blocked(id) => return Ok(Step::Blocked(id)),
                };
                let callee = self.function(function)?;
                if callee.output.is_none() {
                    return Err(RuntimeError::MissingOutput {
                        function: function.clone(),
                    });
                }
                let depth = self.frames.get(task.frame).map_or(0, |a| a.depth + 1);
                if let Some(output) = self.activate(callee, args, Some(task.scope), depth)? {
                    let woken = self.store.forward(output, target)?;
                    self.wake(woken);
                }
                Ok(Step::Done)
            }
            Stmt::Assign { target, value, .. } => {
                let target = self.store.resolve(task.scope, target)?;
                let content = match Evaluator::new(&self.store, task.scope).evaluate(value)? {
                    Eval::Ready(v) => v,
                    Eval::Blocked(id) => return Ok(Step::Blocked(id)),
                };
                let woken = self.store.set(target, content)?;
                self.wake(woken);
                Ok(Step::Done)
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                let cond = match Evaluator::new(&self.store, task.scope).evaluate(cond)? {
                    Eval::Ready(v) => v,
                    Eval::Blocked(id) => return Ok(Step::Blocked(id)),
                };
                let taken = cond.truthiness().ok_or_else(|| RuntimeError::TypeMismatch {
                    message: format!("if condition must be boolean or int, got `{}`", cond),
                })?;
                let branch = if taken { Some(then_block) } else { else_block.as_ref() };
                if let Some(block) = branch {
                    self.enter_block(block, if taken { "then" } else { "else" }, task)?;
                }
                Ok(Step::Done)
            }
            Stmt::Foreach(lp) => {
                let mut cursor = match task.cursor {
                    Some(cursor) => cursor,
                    None => {
                        let one = Expr::int(1);
                        let step = lp.step.as_ref().unwrap_or(&one);
                        let eval = Evaluator::new(&self.store, task.scope);
                        let trip = match range::analyze(&eval, &lp.lower, &lp.upper, step)? {
                            Eval::Ready(t) => t,
                            Eval::Blocked(id) => return Ok(Step::Blocked(id)),
                        };
                        debug!(var = %lp.var, start = trip.start, count = trip.count, step = trip.step, "foreach");
                        LoopCursor { trip, next: 0 }
                    }
                };
                let trip = cursor.trip;
                let end = trip.count.min(cursor.next.saturating_add(ITERATION_CHUNK));
                for k in cursor.next..end {
                    let value = trip.value_at(k);
                    let scope = self.store.open_scope(
                        format!("foreach {}={}", lp.var, value),
                        Some(task.scope),
                        Some(task.scope),
                    )?;
                    let id = self.store.declare(scope, &lp.var, Type::Int)?;
                    self.store.set(id, Scalar::Int(value))?;
                    self.spawn_block(&lp.body, scope, task.frame)?;
                    self.finish_scope(scope)?;
                }
                cursor.next = end;
                if end < trip.count {
                    Ok(Step::Yield(cursor))
                } else {
                    Ok(Step::Done)
                }
            }
            Stmt::Block(block) => {
                self.enter_block(block, "block", task)?;
                Ok(Step::Done)
            }
            Stmt::Builtin { builtin, args, .. } => {
                let values = match Evaluator::new(&self.store, task.scope).evaluate_all(args)? {
                    Eval::Ready(v) => v,
                    Eval::Blocked(id) => return Ok(Step::Blocked(id)),
                };
                host::run_builtin(&mut self.host, *builtin, &values)?;
                Ok(Step::Done)
            }
        }
    }

    /// Open a child scope of the task's scope for `block` and spawn it.
    fn enter_block(&mut self, block: &'p Block, label: &str, task: Task<'p>) -> RuntimeResult<()> {
        let scope = self
            .store
            .open_scope(label, Some(task.scope), Some(task.scope))?;
        self.spawn_block(block, scope, task.frame)?;
        self.finish_scope(scope)
    }

    fn spawn_block(&mut self, block: &'p Block, scope: ScopeId, frame: FrameId) -> RuntimeResult<()> {
        for stmt in &block.stmts {
            if let Stmt::Declare(decl) = stmt {
                self.store.declare(scope, &decl.name, decl.ty)?;
            }
        }
        for stmt in &block.stmts {
            if matches!(stmt, Stmt::Declare(_)) {
                continue;
            }
            self.spawn(Task {
                scope,
                frame,
                stmt,
                cursor: None,
            })?;
        }
        Ok(())
    }

    fn spawn(&mut self, task: Task<'p>) -> RuntimeResult<()> {
        let id = match self.free_tasks.pop() {
            Some(id) => {
                self.tasks[id.0 as usize] = Some(task);
                id
            }
            None => {
                let id = TaskId(next_index(self.tasks.len(), "tasks")?);
                self.tasks.push(Some(task));
                id
            }
        };
        self.store.hold(task.scope);
        self.ready.push_back(id);
        Ok(())
    }

    fn wake(&mut self, woken: Vec<TaskId>) {
        for id in woken {
            if self.parked.remove(&id).is_some() {
                self.ready.push_back(id);
            }
        }
    }

    /// Release one hold on `scope` and drop the activations of any call
    /// frames that closed with it.
    fn finish_scope(&mut self, scope: ScopeId) -> RuntimeResult<()> {
        for closed in self.store.finish(scope)? {
            if let Some(frame) = self.frames.release_scope(closed) {
                trace!(function = %frame.function.name, depth = frame.depth, "returned");
            }
        }
        Ok(())
    }

    fn describe(&self, task: Task<'p>) -> String {
        let function = self
            .frames
            .get(task.frame)
            .map_or("?", |a| a.function.name.as_str());
        let what = match task.stmt {
            Stmt::Declare(decl) => format!("declaration of `{}`", decl.name),
            Stmt::Assign { target, .. } => format!("assignment to `{}`", target),
            Stmt::If { .. } => "if".to_string(),
            Stmt::Foreach(lp) => format!("foreach `{}`", lp.var),
            Stmt::Block(_) => "block".to_string(),
            Stmt::Builtin { builtin, .. } => builtin.name().to_string(),
        };
        format!("fn {}: {}", function, what)
    }
}

/// Run `program`'s entry function against `host`.
pub fn run_program<H: Host>(program: &Program, host: H, options: RuntimeOptions) -> RuntimeResult<H> {
    let mut exec = Executor::with_options(program, host, options)?;
    exec.run()?;
    Ok(exec.into_host())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use pretty_assertions::assert_eq;
    use weft_syntax::builder::*;
    use weft_syntax::Type;

    fn mult_program() -> Program {
        // (int o) my_mult_helper(int i, int j, int a) {
        //   if (j == 0) { o = a; } else { o = my_mult_helper(i, j - 1, a + i); }
        // }
        let helper = function("my_mult_helper")
            .param("i", Type::Int)
            .param("j", Type::Int)
            .param("a", Type::Int)
            .output("o", Type::Int)
            .body(vec![if_else(
                prim(weft_syntax::Primitive::Eq, vec![var("j"), int(0)]),
                vec![assign("o", var("a"))],
                Some(vec![assign(
                    "o",
                    call(
                        "my_mult_helper",
                        vec![var("i"), minus(var("j"), int(1)), plus(var("a"), var("i"))],
                    ),
                )]),
            )]);
        let mult = function("mult")
            .param("i", Type::Int)
            .param("j", Type::Int)
            .output("o", Type::Int)
            .body(vec![assign(
                "o",
                call("my_mult_helper", vec![var("i"), var("j"), int(0)]),
            )]);
        let main = function("main").body(vec![
            declare("x", Type::Int),
            assign("x", call("mult", vec![int(3), int(3)])),
            trace(vec![var("x")]),
            assert_equal(var("x"), int(9), "3*3"),
        ]);
        Program::with_functions(vec![helper, mult, main])
    }

    fn run(program: &Program) -> RuntimeResult<RecordingHost> {
        run_program(program, RecordingHost::default(), RuntimeOptions::default())
    }

    #[test]
    fn recursive_multiplication() {
        let program = mult_program();
        let host = run(&program).unwrap();
        assert_eq!(host.traced_ints(), vec![9]);

        let mut exec = Executor::new(&program, RecordingHost::default()).unwrap();
        let out = exec
            .call_function("mult", vec![Scalar::Int(7), Scalar::Int(6)])
            .unwrap();
        assert_eq!(out, Some(Scalar::Int(42)));
        assert_eq!(exec.stats().activations, 8);
    }

    #[test]
    fn statements_run_when_their_inputs_are_ready() {
        // trace(y) is listed before y's writer; y = x + 1 is listed before x's.
        let main = function("main").body(vec![
            declare("x", Type::Int),
            declare("y", Type::Int),
            trace(vec![var("y")]),
            assign("y", plus(var("x"), int(1))),
            assign("x", int(4)),
        ]);
        let host = run(&Program::with_functions(vec![main])).unwrap();
        assert_eq!(host.traced_ints(), vec![5]);
    }

    #[test]
    fn loop_bound_from_a_call() {
        // int n; n = f(); foreach (i in [1:n]) { trace(i); }
        let f = function("f")
            .output("r", Type::Int)
            .body(vec![assign("r", int(10))]);
        let main = function("main").body(vec![
            declare("n", Type::Int),
            assign("n", call("f", vec![])),
            foreach("i", int(1), var("n"))
                .body(vec![trace(vec![var("i")])])
                .into_stmt(),
        ]);
        let host = run(&Program::with_functions(vec![f, main])).unwrap();
        assert_eq!(host.traced_ints(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn loop_iterations_get_fresh_locals() {
        let main = function("main").body(vec![foreach("i", int(4), int(12))
            .body(vec![
                declare("j", Type::Int),
                assign("j", plus(var("i"), int(1))),
                trace(vec![var("j")]),
            ])
            .into_stmt()]);
        let host = run(&Program::with_functions(vec![main])).unwrap();
        assert_eq!(host.traced_ints(), (5..=13).collect::<Vec<_>>());
    }

    #[test]
    fn long_loop_reuses_iteration_scopes() {
        let main = function("main").body(vec![foreach("i", int(1), int(10_000))
            .body(vec![
                declare("j", Type::Int),
                assign("j", var("i")),
                trace(vec![var("j")]),
            ])
            .into_stmt()]);
        let program = Program::with_functions(vec![main]);
        let mut exec = Executor::new(&program, RecordingHost::default()).unwrap();
        exec.run().unwrap();
        let stats = exec.stats();
        assert!(stats.scopes_allocated <= 2 * ITERATION_CHUNK as usize, "{:?}", stats);
        assert!(stats.values_allocated <= 4 * ITERATION_CHUNK as usize, "{:?}", stats);
        assert_eq!(stats.writes, 20_000);
        assert_eq!(exec.host().traced_ints(), (1..=10_000).collect::<Vec<_>>());
    }

    #[test]
    fn zero_step_fails_at_runtime() {
        let main = function("main").body(vec![declare("s", Type::Int), assign("s", int(0)), foreach(
            "i",
            int(1),
            int(3),
        )
        .step(var("s"))
        .body(vec![trace(vec![var("i")])])
        .into_stmt()]);
        let err = run(&Program::with_functions(vec![main])).unwrap_err();
        assert_eq!(err.kind(), "InvalidRangeError");
        assert_eq!(err.to_string(), "invalid range: [1:3:0] has a zero step (in fn main: foreach `i`)");
    }

    #[test]
    fn second_write_fails() {
        let main = function("main").body(vec![
            declare("x", Type::Int),
            assign("x", int(1)),
            assign("x", int(2)),
        ]);
        let err = run(&Program::with_functions(vec![main])).unwrap_err();
        assert_eq!(err.kind(), "DoubleAssignmentError");
        assert_eq!(
            err.root(),
            &RuntimeError::DoubleAssignment { name: "x".into() }
        );
    }

    #[test]
    fn read_without_writer_deadlocks() {
        let main = function("main").body(vec![
            declare("x", Type::Int),
            declare("y", Type::Int),
            assign("x", var("y")),
            assign("y", var("x")),
        ]);
        let err = run(&Program::with_functions(vec![main])).unwrap_err();
        assert_eq!(err.kind(), "DeadlockError");
        assert!(matches!(err.root(), RuntimeError::Deadlock { waiting: 2, .. }));
    }

    #[test]
    fn unset_value_at_scope_exit_is_unbound() {
        let main = function("main").body(vec![declare("x", Type::Int), trace(vec![int(1)])]);
        let err = run(&Program::with_functions(vec![main])).unwrap_err();
        assert_eq!(
            err.root(),
            &RuntimeError::UnboundVariable {
                name: "x".into(),
                scope: "fn main".into()
            }
        );
    }

    #[test]
    fn missing_output_write_is_unbound() {
        let f = function("f").output("r", Type::Int).body(vec![trace(vec![int(0)])]);
        let main = function("main").body(vec![
            declare("x", Type::Int),
            assign("x", call("f", vec![])),
        ]);
        let err = run(&Program::with_functions(vec![f, main])).unwrap_err();
        assert_eq!(err.kind(), "UnboundVariableError");
    }

    #[test]
    fn unbounded_recursion_exhausts_the_stack() {
        let down = function("down")
            .param("n", Type::Int)
            .output("o", Type::Int)
            .body(vec![assign("o", call("down", vec![plus(var("n"), int(1))]))]);
        let main = function("main").body(vec![
            declare("x", Type::Int),
            assign("x", call("down", vec![int(0)])),
        ]);
        let program = Program::with_functions(vec![down, main]);
        let err = run_program(
            &program,
            RecordingHost::default(),
            RuntimeOptions { max_activations: 64 },
        )
        .unwrap_err();
        assert_eq!(err.kind(), "StackExhaustionError");
    }

    #[test]
    fn failed_assertion_reports_message() {
        let main = function("main").body(vec![assert_that(
            prim(weft_syntax::Primitive::Ge, vec![int(0), int(1)]),
            "0 >= 1",
        )]);
        let err = run(&Program::with_functions(vec![main])).unwrap_err();
        assert_eq!(err.kind(), "AssertionError");
        assert_eq!(err.to_string(), "assertion failed: 0 >= 1 (in fn main: assert)");
    }

    #[test]
    fn cancelled_run_stops() {
        let main = function("main").body(vec![trace(vec![int(1)])]);
        let program = Program::with_functions(vec![main]);
        let token = CancelToken::new();
        token.cancel();
        let mut exec = Executor::new(&program, RecordingHost::default())
            .unwrap()
            .with_cancel(token);
        assert_eq!(exec.run().unwrap_err(), RuntimeError::Cancelled);
        assert!(exec.host().traces.is_empty());
    }

    #[test]
    fn globals_are_visible_in_every_function() {
        let main = function("main").body(vec![trace(vec![plus(var("N"), int(1))])]);
        let program = Program::with_functions(vec![main]).global("N", Scalar::Int(41));
        let host = run(&program).unwrap();
        assert_eq!(host.traced_ints(), vec![42]);
    }
}
