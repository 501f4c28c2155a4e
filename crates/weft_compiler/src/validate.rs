//! Variable fixup: every name a function reads or writes must resolve, and
//! writes must respect single assignment. Also prunes unused declarations.

use crate::error::CompileError;
use crate::pass::Pass;
use crate::unroll::const_bound;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use weft_syntax::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Local,
    Input,
    Output,
    LoopVar,
    Global,
}

#[derive(Clone, Debug)]
struct Binding {
    id: usize,
    role: Role,
    /// Number of loops enclosing the declaration.
    loop_depth: usize,
}

pub struct Validator<'p> {
    pub diagnostics: Vec<Diagnostic>,
    program: &'p Program,
    functions: HashMap<&'p str, &'p FunctionDef>,
    construct: String,
    scopes: Vec<HashMap<String, Binding>>,
    loops: Vec<String>,
    next_id: usize,
    /// Bindings written somewhere in the function.
    written: HashSet<usize>,
}

impl<'p> Validator<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self {
            diagnostics: Vec::new(),
            program,
            functions: HashMap::new(),
            construct: String::new(),
            scopes: Vec::new(),
            loops: Vec::new(),
            next_id: 0,
            written: HashSet::new(),
        }
    }

    #[allow(clippy::result_unit_err)]
    pub fn check_program(&mut self) -> Result<(), ()> {
        let program = self.program;
        for f in &program.functions {
            if self.functions.insert(f.name.as_str(), f).is_some() {
                self.construct = format!("fn {}", f.name);
                self.error(
                    CompileError::DuplicateDeclaration {
                        name: f.name.clone(),
                    },
                    f.span,
                );
            }
        }
        match self.functions.get(program.entry.as_str()) {
            None => self.diagnostics.push(
                CompileError::MissingEntry {
                    name: program.entry.clone(),
                }
                .to_diagnostic(None, Span::default()),
            ),
            Some(entry) if !entry.params.is_empty() => {
                self.construct = format!("fn {}", entry.name);
                self.error(
                    CompileError::ArityMismatch {
                        name: entry.name.clone(),
                        expected: 0,
                        received: entry.params.len(),
                    },
                    entry.span,
                );
            }
            Some(_) => {}
        }
        for f in &program.functions {
            self.check_fn(f);
        }
        if has_errors(&self.diagnostics) {
            return Err(());
        }
        Ok(())
    }

    fn check_fn(&mut self, f: &FunctionDef) {
        self.construct = format!("fn {}", f.name);
        self.written.clear();
        self.scopes.clear();
        self.loops.clear();
        let globals: Vec<String> = self.program.globals.keys().cloned().collect();
        self.scopes.push(HashMap::new());
        for name in globals {
            self.bind(&name, Role::Global, f.span);
        }
        self.scopes.push(HashMap::new());
        for p in &f.params {
            self.bind(&p.name, Role::Input, f.span);
        }
        let output = f.output.as_ref().map(|o| self.bind(&o.name, Role::Output, f.span));
        let mut assigned = HashSet::new();
        self.check_block(&f.body, &mut assigned, true);
        if let (Some(Some(id)), Some(out)) = (output, &f.output) {
            if !self.written.contains(&id) {
                self.diagnostics.push(
                    Diagnostic::warning(
                        format!("output `{}` is never assigned", out.name),
                        Some(self.construct.clone()),
                    )
                    .with_span(f.span),
                );
            }
        }
    }

    /// Declare `name` in the innermost scope. Returns its id, or `None` after
    /// reporting a duplicate.
    fn bind(&mut self, name: &str, role: Role, span: Span) -> Option<usize> {
        let id = self.next_id;
        self.next_id += 1;
        let binding = Binding {
            id,
            role,
            loop_depth: self.loops.len(),
        };
        if self.scopes.last().is_some_and(|s| s.contains_key(name)) {
            self.error(
                CompileError::DuplicateDeclaration {
                    name: name.to_string(),
                },
                span,
            );
            return None;
        }
        self.scopes.last_mut()?.insert(name.to_string(), binding);
        Some(id)
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn error(&mut self, err: CompileError, span: Span) {
        self.diagnostics
            .push(err.to_diagnostic(Some(self.construct.clone()), span));
    }

    /// `shared` checks the block in the innermost scope instead of a new one
    /// (function bodies share the frame with parameters, loop bodies share
    /// the iteration scope with the loop variable).
    fn check_block(&mut self, block: &Block, assigned: &mut HashSet<usize>, shared: bool) {
        if !shared {
            self.scopes.push(HashMap::new());
        }
        let mut declared = Vec::new();
        for stmt in &block.stmts {
            if let Stmt::Declare(decl) = stmt {
                if let Some(id) = self.bind(&decl.name, Role::Local, block.span) {
                    declared.push((id, decl.name.clone()));
                }
            }
        }
        for stmt in &block.stmts {
            self.check_stmt(stmt, assigned);
        }
        for (id, name) in declared {
            if !self.written.contains(&id) {
                self.diagnostics.push(
                    Diagnostic::warning(
                        format!("`{}` is declared but never assigned", name),
                        Some(self.construct.clone()),
                    )
                    .with_span(block.span),
                );
            }
        }
        if !shared {
            self.scopes.pop();
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, assigned: &mut HashSet<usize>) {
        match stmt {
            Stmt::Declare(_) => {}
            Stmt::Assign {
                target,
                value,
                span,
            } => {
                self.check_expr(value, *span);
                self.check_write(target, *span, assigned);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                span,
            } => {
                self.check_expr(cond, *span);
                let mut then_assigned = assigned.clone();
                self.check_block(then_block, &mut then_assigned, false);
                let mut else_assigned = assigned.clone();
                if let Some(b) = else_block {
                    self.check_block(b, &mut else_assigned, false);
                }
                // Definitely assigned after the `if`: assigned on both paths.
                assigned.extend(then_assigned.intersection(&else_assigned).copied());
            }
            Stmt::Foreach(lp) => self.check_loop(lp, assigned),
            Stmt::Block(b) => self.check_block(b, assigned, false),
            Stmt::Builtin {
                builtin,
                args,
                span,
            } => {
                let (min, max) = match builtin {
                    Builtin::Trace => (0, usize::MAX),
                    Builtin::Assert => (1, 2),
                    Builtin::AssertEqual => (2, 3),
                };
                if args.len() < min || args.len() > max {
                    self.error(
                        CompileError::ArityMismatch {
                            name: builtin.name().to_string(),
                            expected: min,
                            received: args.len(),
                        },
                        *span,
                    );
                }
                for a in args {
                    self.check_expr(a, *span);
                }
            }
        }
    }

    fn check_loop(&mut self, lp: &ForeachLoop, assigned: &HashSet<usize>) {
        if lp.annotations.unroll <= 0 {
            self.error(
                CompileError::InvalidAnnotation {
                    var: lp.var.clone(),
                    factor: lp.annotations.unroll,
                },
                lp.span,
            );
        }
        self.check_expr(&lp.lower, lp.span);
        self.check_expr(&lp.upper, lp.span);
        if let Some(step) = &lp.step {
            self.check_expr(step, lp.span);
            let scopes = &self.scopes;
            let globals = &self.program.globals;
            let lookup = |name: &str| {
                let shadowed = scopes[1..].iter().any(|s| s.contains_key(name));
                if shadowed {
                    None
                } else {
                    globals.get(name)
                }
            };
            if const_bound(step, &lookup) == Some(0) {
                self.error(
                    CompileError::InvalidRange {
                        var: lp.var.clone(),
                        message: "step is zero".to_string(),
                    },
                    lp.span,
                );
            }
        }
        self.loops.push(lp.var.clone());
        self.scopes.push(HashMap::new());
        self.bind(&lp.var, Role::LoopVar, lp.span);
        let mut body_assigned = assigned.clone();
        self.check_block(&lp.body, &mut body_assigned, true);
        self.scopes.pop();
        self.loops.pop();
    }

    fn check_write(&mut self, name: &str, span: Span, assigned: &mut HashSet<usize>) {
        let Some(binding) = self.lookup(name).cloned() else {
            self.error(
                CompileError::UndefinedVariable {
                    name: name.to_string(),
                },
                span,
            );
            return;
        };
        let err = match binding.role {
            Role::Input | Role::LoopVar => Some(CompileError::InputWrite {
                name: name.to_string(),
            }),
            Role::Global => Some(CompileError::GlobalWrite {
                name: name.to_string(),
            }),
            Role::Local | Role::Output if binding.loop_depth < self.loops.len() => {
                Some(CompileError::LoopCarriedWrite {
                    var: self.loops.last().cloned().unwrap_or_default(),
                    name: name.to_string(),
                })
            }
            Role::Local | Role::Output => {
                if assigned.insert(binding.id) {
                    None
                } else {
                    Some(CompileError::DoubleAssignment {
                        name: name.to_string(),
                    })
                }
            }
        };
        self.written.insert(binding.id);
        if let Some(err) = err {
            self.error(err, span);
        }
    }

    fn check_expr(&mut self, expr: &Expr, span: Span) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                if self.lookup(name).is_none() {
                    self.error(
                        CompileError::UndefinedVariable { name: name.clone() },
                        span,
                    );
                }
            }
            Expr::Primitive { op, args } => {
                if args.len() != op.arity() {
                    self.error(
                        CompileError::ArityMismatch {
                            name: op.name().to_string(),
                            expected: op.arity(),
                            received: args.len(),
                        },
                        span,
                    );
                }
                for a in args {
                    self.check_expr(a, span);
                }
            }
            Expr::Call { function, args } => {
                match self.functions.get(function.as_str()).copied() {
                    None => self.error(
                        CompileError::UnknownFunction {
                            name: function.clone(),
                        },
                        span,
                    ),
                    Some(f) => {
                        if f.params.len() != args.len() {
                            self.error(
                                CompileError::ArityMismatch {
                                    name: function.clone(),
                                    expected: f.params.len(),
                                    received: args.len(),
                                },
                                span,
                            );
                        }
                        if f.output.is_none() {
                            self.error(
                                CompileError::NoOutput {
                                    name: function.clone(),
                                },
                                span,
                            );
                        }
                    }
                }
                for a in args {
                    self.check_expr(a, span);
                }
            }
        }
    }
}

/// Validation as a pipeline pass. Warnings are logged; errors fail the build.
#[derive(Debug, Default)]
pub struct Validate;

impl Pass for Validate {
    fn name(&self) -> &'static str {
        "validate"
    }

    fn description(&self) -> &'static str {
        "Resolves every variable and checks single assignment"
    }

    fn apply(&mut self, program: &mut Program) -> Result<bool, Vec<Diagnostic>> {
        let mut validator = Validator::new(program);
        let ok = validator.check_program().is_ok();
        if !ok {
            return Err(validator.diagnostics);
        }
        for d in &validator.diagnostics {
            warn!("{}", d);
        }
        Ok(false)
    }
}

/// Drop global constants no function reads. Returns the removed names.
pub fn prune_globals(program: &mut Program) -> Vec<String> {
    let mut used = HashSet::new();
    for f in &program.functions {
        used.extend(block_usage(&f.body).read);
    }
    let unused: Vec<String> = program
        .globals
        .keys()
        .filter(|name| !used.contains(*name))
        .cloned()
        .collect();
    for name in &unused {
        program.globals.remove(name);
    }
    unused
}

/// Drop local declarations that nothing reads or writes, innermost blocks
/// first. Returns how many were removed.
pub fn prune_locals(block: &mut Block) -> usize {
    let mut removed = 0;
    for stmt in &mut block.stmts {
        match stmt {
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                removed += prune_locals(then_block);
                if let Some(b) = else_block {
                    removed += prune_locals(b);
                }
            }
            Stmt::Foreach(lp) => removed += prune_locals(&mut lp.body),
            Stmt::Block(b) => removed += prune_locals(b),
            _ => {}
        }
    }
    let mut used = HashSet::new();
    for stmt in &block.stmts {
        let usage = stmt_usage(stmt);
        used.extend(usage.read);
        used.extend(usage.written);
    }
    let before = block.stmts.len();
    block
        .stmts
        .retain(|s| !matches!(s, Stmt::Declare(d) if !used.contains(&d.name)));
    removed + before - block.stmts.len()
}

#[derive(Debug, Default)]
pub struct PruneUnused;

impl Pass for PruneUnused {
    fn name(&self) -> &'static str {
        "prune_unused"
    }

    fn description(&self) -> &'static str {
        "Removes unreferenced local declarations and global constants"
    }

    fn apply(&mut self, program: &mut Program) -> Result<bool, Vec<Diagnostic>> {
        let mut locals = 0;
        for f in &mut program.functions {
            locals += prune_locals(&mut f.body);
        }
        let globals = prune_globals(program);
        if locals > 0 || !globals.is_empty() {
            debug!(locals, ?globals, "pruned unused declarations");
        }
        Ok(locals > 0 || !globals.is_empty())
    }
}

/// Run the validator and return every diagnostic, warnings included.
pub fn check(program: &Program) -> Vec<Diagnostic> {
    let mut validator = Validator::new(program);
    let _ = validator.check_program();
    validator.diagnostics
}
