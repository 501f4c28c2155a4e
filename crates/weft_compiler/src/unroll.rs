//! Range-loop unrolling.
//!
//! A loop annotated `@unroll=F` is rewritten into copies of its body, each a
//! block with its own fresh induction binding, plus a remainder loop for the
//! iterations that do not fill a whole group. With a trip count known at
//! compile time the copies carry literal induction values; otherwise the pass
//! emits a run-time grouped loop that runs `F` copies per pass.
//!
//! Unrolling never changes which iterations run: the multiset of induction
//! values, and therefore of body side effects, is that of the original loop.

use crate::error::CompileError;
use crate::pass::Pass;
use std::collections::BTreeMap;
use tracing::debug;
use weft_runtime::{const_eval, RuntimeError, TripDescriptor};
use weft_syntax::builder::{minus, multiply, plus, prim};
use weft_syntax::*;

#[derive(Clone, Debug, PartialEq)]
pub enum Unrolled {
    /// Factor 1: the loop stays as it is.
    NotUnrolled,
    Static(UnrolledFragment),
    Runtime(RuntimeGroupedLoop),
}

/// Expansion of a loop whose trip count is known at compile time.
#[derive(Clone, Debug, PartialEq)]
pub struct UnrolledFragment {
    pub trip: TripDescriptor,
    /// Copies per group; equals `trip.count` for a full unroll.
    pub group_size: i64,
    /// Body copies in iteration order, each binding its own induction value.
    pub full_copies: Vec<Block>,
    /// Trailing iterations that do not fill a whole group.
    pub remainder: Option<ForeachLoop>,
}

impl UnrolledFragment {
    pub fn full_groups(&self) -> i64 {
        if self.group_size == 0 {
            0
        } else {
            self.full_copies.len() as i64 / self.group_size
        }
    }
}

/// Expansion of a loop whose trip count is only known at run time.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeGroupedLoop {
    /// Declares and binds the bounds, trip count and group count once.
    pub prologue: Vec<Stmt>,
    /// One pass per full group; its body holds `factor` copies.
    pub grouped: ForeachLoop,
    /// Runs the trailing iteration indices `[groups * factor : n - 1]`.
    pub remainder: ForeachLoop,
}

impl Unrolled {
    /// Statements that replace `original` in its enclosing block.
    pub fn into_stmts(self, original: ForeachLoop) -> Vec<Stmt> {
        match self {
            Unrolled::NotUnrolled => vec![Stmt::Foreach(original)],
            Unrolled::Static(fragment) => {
                let mut stmts: Vec<Stmt> =
                    fragment.full_copies.into_iter().map(Stmt::Block).collect();
                stmts.extend(fragment.remainder.map(Stmt::Foreach));
                stmts
            }
            Unrolled::Runtime(grouped) => {
                let mut stmts = grouped.prologue;
                stmts.push(Stmt::Foreach(grouped.grouped));
                stmts.push(Stmt::Foreach(grouped.remainder));
                stmts
            }
        }
    }
}

/// Source of names no user program can spell: `base#<tag><n>`.
#[derive(Debug, Default)]
pub struct FreshNames {
    next: u32,
}

impl FreshNames {
    pub fn next_id(&mut self) -> u32 {
        let n = self.next;
        self.next += 1;
        n
    }

    pub fn name(&mut self, base: &str, tag: &str) -> String {
        format!("{}#{}{}", base, tag, self.next_id())
    }
}

/// Unroll `lp` by `factor`. `trip` is the compile-time trip descriptor when
/// all three bounds are constant. A static expansion needing more than
/// `max_copies` copies falls back to the run-time form.
pub fn unroll(
    lp: &ForeachLoop,
    trip: Option<TripDescriptor>,
    factor: i64,
    max_copies: usize,
    fresh: &mut FreshNames,
) -> Result<Unrolled, CompileError> {
    if factor <= 0 {
        return Err(CompileError::InvalidAnnotation {
            var: lp.var.clone(),
            factor,
        });
    }
    if factor == 1 {
        return Ok(Unrolled::NotUnrolled);
    }
    if let Some(trip) = trip {
        if let Some(fragment) = expand_static(lp, trip, factor, max_copies, fresh) {
            return Ok(Unrolled::Static(fragment));
        }
    }
    Ok(Unrolled::Runtime(grouped_loop(lp, factor, fresh)))
}

fn expand_static(
    lp: &ForeachLoop,
    trip: TripDescriptor,
    factor: i64,
    max_copies: usize,
    fresh: &mut FreshNames,
) -> Option<UnrolledFragment> {
    let (copies, group_size) = if factor >= trip.count {
        (trip.count, trip.count)
    } else {
        ((trip.count / factor) * factor, factor)
    };
    if u64::try_from(copies).ok()? > max_copies as u64 {
        debug!(var = %lp.var, copies, max_copies, "too many copies, unrolling at run time");
        return None;
    }
    let full_copies = (0..copies)
        .map(|k| body_copy(lp, Expr::int(trip.value_at(k)), fresh))
        .collect();
    let remainder = match trip.last() {
        Some(last) if copies < trip.count => Some(ForeachLoop {
            var: lp.var.clone(),
            lower: Expr::int(trip.value_at(copies)),
            upper: Expr::int(last),
            step: Some(Expr::int(trip.step)),
            body: lp.body.clone(),
            annotations: LoopAnnotations::default(),
            span: lp.span,
        }),
        _ => None,
    };
    Some(UnrolledFragment {
        trip,
        group_size,
        full_copies,
        remainder,
    })
}

/// `{ int v#uK; v#uK = value; body with v renamed to v#uK }`
fn body_copy(lp: &ForeachLoop, value: Expr, fresh: &mut FreshNames) -> Block {
    let name = fresh.name(&lp.var, "u");
    let mut body = lp.body.clone();
    rename_in_block(&mut body, &lp.var, &name);
    let mut stmts = Vec::with_capacity(body.stmts.len() + 2);
    stmts.push(Stmt::Declare(VarDecl::new(name.clone(), Type::Int)));
    stmts.push(Stmt::Assign {
        target: name,
        value,
        span: lp.span,
    });
    stmts.extend(body.stmts);
    Block {
        stmts,
        span: lp.body.span,
    }
}

fn grouped_loop(lp: &ForeachLoop, factor: i64, fresh: &mut FreshNames) -> RuntimeGroupedLoop {
    let id = fresh.next_id();
    let [lo, hi, step, n, groups, g, k] =
        ["lo", "hi", "step", "n", "groups", "g", "k"].map(|base| format!("{}#r{}", base, id));
    let bind = |name: &str, value: Expr| {
        [
            Stmt::Declare(VarDecl::new(name, Type::Int)),
            Stmt::Assign {
                target: name.to_string(),
                value,
                span: lp.span,
            },
        ]
    };
    let mut prologue = Vec::with_capacity(10);
    prologue.extend(bind(&lo, lp.lower.clone()));
    prologue.extend(bind(&hi, lp.upper.clone()));
    prologue.extend(bind(&step, lp.step_expr()));
    prologue.extend(bind(
        &n,
        prim(
            Primitive::RangeTripCount,
            vec![Expr::var(&lo), Expr::var(&hi), Expr::var(&step)],
        ),
    ));
    prologue.extend(bind(
        &groups,
        prim(Primitive::Divide, vec![Expr::var(&n), Expr::int(factor)]),
    ));
    // Induction values come from iteration indices, which stay below `n`,
    // so no intermediate steps past the last iteration.
    let value_of = |index: Expr| {
        prim(
            Primitive::RangeValue,
            vec![Expr::var(&lo), Expr::var(&step), index],
        )
    };

    // Copy j of pass g runs iteration g * factor + j.
    let copies = (0..factor)
        .map(|j| {
            let index = plus(multiply(Expr::var(&g), Expr::int(factor)), Expr::int(j));
            Stmt::Block(body_copy(lp, value_of(index), fresh))
        })
        .collect();
    let grouped = ForeachLoop {
        var: g,
        lower: Expr::int(0),
        upper: minus(Expr::var(&groups), Expr::int(1)),
        step: None,
        body: Block {
            stmts: copies,
            span: lp.body.span,
        },
        annotations: LoopAnnotations::default(),
        span: lp.span,
    };
    let tail = body_copy(lp, value_of(Expr::var(&k)), fresh);
    let remainder = ForeachLoop {
        var: k,
        lower: multiply(Expr::var(&groups), Expr::int(factor)),
        upper: minus(Expr::var(&n), Expr::int(1)),
        step: None,
        body: Block {
            stmts: vec![Stmt::Block(tail)],
            span: lp.body.span,
        },
        annotations: LoopAnnotations::default(),
        span: lp.span,
    };
    RuntimeGroupedLoop {
        prologue,
        grouped,
        remainder,
    }
}

/// Integer value of a bound built from literals, primitives and the globals
/// `lookup` resolves. `None` when it depends on anything else.
pub fn const_bound<'g>(expr: &Expr, lookup: &impl Fn(&str) -> Option<&'g Scalar>) -> Option<i64> {
    fn substitute<'g>(expr: &mut Expr, lookup: &impl Fn(&str) -> Option<&'g Scalar>) -> bool {
        match expr {
            Expr::Literal(_) => true,
            Expr::Var(name) => match lookup(name) {
                Some(v) => {
                    *expr = Expr::Literal(v.clone());
                    true
                }
                None => false,
            },
            Expr::Primitive { args, .. } => args.iter_mut().all(|a| substitute(a, lookup)),
            Expr::Call { .. } => false,
        }
    }
    let mut folded = expr.clone();
    if !substitute(&mut folded, lookup) {
        return None;
    }
    const_eval(&folded)?.as_int()
}

fn range_error(var: &str, err: RuntimeError) -> CompileError {
    let message = match err.root() {
        RuntimeError::InvalidRange { message } => message.clone(),
        other => other.to_string(),
    };
    CompileError::InvalidRange {
        var: var.to_string(),
        message,
    }
}

/// Loop counts seen by one run of the pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnrollStats {
    pub static_loops: usize,
    pub runtime_loops: usize,
    pub copies: usize,
}

/// Unrolls every annotated loop of the program, innermost first.
#[derive(Debug)]
pub struct UnrollPass {
    max_copies: usize,
    globals: BTreeMap<String, Scalar>,
    fresh: FreshNames,
    diagnostics: Vec<Diagnostic>,
    construct: String,
    pub stats: UnrollStats,
}

impl UnrollPass {
    pub fn new(max_copies: usize) -> Self {
        Self {
            max_copies,
            globals: BTreeMap::new(),
            fresh: FreshNames::default(),
            diagnostics: Vec::new(),
            construct: String::new(),
            stats: UnrollStats::default(),
        }
    }

    /// `locals` holds every name bound around `block`; they shadow globals.
    fn unroll_block(&mut self, block: &mut Block, locals: &mut Vec<String>) {
        let depth = locals.len();
        locals.extend(block.declared().map(|d| d.name.clone()));
        let stmts = std::mem::take(&mut block.stmts);
        for stmt in stmts {
            match stmt {
                Stmt::Foreach(mut lp) => {
                    locals.push(lp.var.clone());
                    self.unroll_block(&mut lp.body, locals);
                    locals.pop();
                    match self.unroll_loop(&lp, locals) {
                        Ok(unrolled) => block.stmts.extend(unrolled.into_stmts(lp)),
                        Err(e) => {
                            self.diagnostics
                                .push(e.to_diagnostic(Some(self.construct.clone()), lp.span));
                            block.stmts.push(Stmt::Foreach(lp));
                        }
                    }
                }
                Stmt::If {
                    cond,
                    mut then_block,
                    mut else_block,
                    span,
                } => {
                    self.unroll_block(&mut then_block, locals);
                    if let Some(b) = &mut else_block {
                        self.unroll_block(b, locals);
                    }
                    block.stmts.push(Stmt::If {
                        cond,
                        then_block,
                        else_block,
                        span,
                    });
                }
                Stmt::Block(mut b) => {
                    self.unroll_block(&mut b, locals);
                    block.stmts.push(Stmt::Block(b));
                }
                other => block.stmts.push(other),
            }
        }
        locals.truncate(depth);
    }

    fn unroll_loop(&mut self, lp: &ForeachLoop, locals: &[String]) -> Result<Unrolled, CompileError> {
        let factor = lp.annotations.unroll;
        if factor == 1 {
            return Ok(Unrolled::NotUnrolled);
        }
        let globals = &self.globals;
        let lookup = |name: &str| {
            if locals.iter().any(|l| l == name) {
                None
            } else {
                globals.get(name)
            }
        };
        let step = lp.step_expr();
        let trip = match (
            const_bound(&lp.lower, &lookup),
            const_bound(&lp.upper, &lookup),
            const_bound(&step, &lookup),
        ) {
            (Some(lo), Some(hi), Some(st)) => {
                Some(TripDescriptor::from_bounds(lo, hi, st).map_err(|e| range_error(&lp.var, e))?)
            }
            _ => None,
        };
        let unrolled = unroll(lp, trip, factor, self.max_copies, &mut self.fresh)?;
        match &unrolled {
            Unrolled::NotUnrolled => {}
            Unrolled::Static(fragment) => {
                debug!(
                    construct = %self.construct,
                    var = %lp.var,
                    factor,
                    count = fragment.trip.count,
                    copies = fragment.full_copies.len(),
                    remainder = fragment.remainder.is_some(),
                    "unrolled loop"
                );
                self.stats.static_loops += 1;
                self.stats.copies += fragment.full_copies.len();
            }
            Unrolled::Runtime(_) => {
                debug!(construct = %self.construct, var = %lp.var, factor, "unrolled loop at run time");
                self.stats.runtime_loops += 1;
                self.stats.copies += factor as usize;
            }
        }
        Ok(unrolled)
    }
}

impl Pass for UnrollPass {
    fn name(&self) -> &'static str {
        "unroll"
    }

    fn description(&self) -> &'static str {
        "Replicates annotated loop bodies into independent copies"
    }

    fn apply(&mut self, program: &mut Program) -> Result<bool, Vec<Diagnostic>> {
        self.globals = program.globals.clone();
        let before = self.stats;
        for f in &mut program.functions {
            self.construct = format!("fn {}", f.name);
            let mut locals: Vec<String> = f.params.iter().map(|p| p.name.clone()).collect();
            locals.extend(f.output.iter().map(|o| o.name.clone()));
            self.unroll_block(&mut f.body, &mut locals);
        }
        if !self.diagnostics.is_empty() {
            return Err(std::mem::take(&mut self.diagnostics));
        }
        Ok(self.stats != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use weft_syntax::builder::{assign, foreach, int, trace, var};

    fn trace_next(lo: Expr, hi: Expr) -> ForeachLoop {
        foreach("i", lo, hi).body(vec![trace(vec![plus(var("i"), int(1))])])
    }

    fn induction_values(fragment: &UnrolledFragment) -> Vec<Expr> {
        fragment
            .full_copies
            .iter()
            .map(|b| match &b.stmts[1] {
                Stmt::Assign { value, .. } => value.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    #[test]
    fn factor_at_least_count_fully_unrolls() {
        let lp = trace_next(int(4), int(12));
        let trip = TripDescriptor::from_bounds(4, 12, 1).unwrap();
        let Unrolled::Static(fragment) =
            unroll(&lp, Some(trip), 10, 1024, &mut FreshNames::default()).unwrap()
        else {
            panic!("expected a static expansion")
        };
        assert_eq!(fragment.full_copies.len(), 9);
        assert_eq!(fragment.full_groups(), 1);
        assert_eq!(fragment.remainder, None);
        assert_eq!(
            induction_values(&fragment),
            (4..=12).map(int).collect::<Vec<_>>()
        );
        assert_eq!(
            fragment.full_copies[0].stmts,
            vec![
                Stmt::Declare(VarDecl::new("i#u0", Type::Int)),
                Stmt::Assign {
                    target: "i#u0".into(),
                    value: int(4),
                    span: Span::default()
                },
                trace(vec![plus(var("i#u0"), int(1))]),
            ]
        );
    }

    #[test]
    fn groups_plus_remainder() {
        let lp = trace_next(int(4), int(12));
        let trip = TripDescriptor::from_bounds(4, 12, 1).unwrap();
        let Unrolled::Static(fragment) =
            unroll(&lp, Some(trip), 4, 1024, &mut FreshNames::default()).unwrap()
        else {
            panic!("expected a static expansion")
        };
        assert_eq!(fragment.full_groups(), 2);
        assert_eq!(fragment.full_copies.len(), 8);
        let remainder = fragment.remainder.unwrap();
        assert_eq!((remainder.lower, remainder.upper), (int(12), int(12)));
        assert_eq!(remainder.body, lp.body);
    }

    #[test]
    fn factor_one_and_invalid_factors() {
        let lp = trace_next(int(1), int(3));
        let mut fresh = FreshNames::default();
        assert_eq!(unroll(&lp, None, 1, 1024, &mut fresh).unwrap(), Unrolled::NotUnrolled);
        assert_eq!(
            unroll(&lp, None, 0, 1024, &mut fresh).unwrap_err(),
            CompileError::InvalidAnnotation {
                var: "i".into(),
                factor: 0
            }
        );
        assert!(unroll(&lp, None, -3, 1024, &mut fresh).is_err());
    }

    #[test]
    fn unknown_trip_count_groups_at_run_time() {
        let lp = trace_next(int(1), var("n"));
        let Unrolled::Runtime(grouped) =
            unroll(&lp, None, 3, 1024, &mut FreshNames::default()).unwrap()
        else {
            panic!("expected a run-time grouped loop")
        };
        assert_eq!(grouped.prologue.len(), 10);
        assert_eq!(grouped.grouped.var, "g#r0");
        assert_eq!(grouped.grouped.body.stmts.len(), 3);
        assert_eq!(grouped.remainder.var, "k#r0");
        assert_eq!(grouped.remainder.upper, minus(var("n#r0"), int(1)));
        let [Stmt::Block(tail)] = grouped.remainder.body.stmts.as_slice() else {
            panic!("expected one body copy in the remainder")
        };
        assert_eq!(
            tail.stmts[1],
            assign(
                "i#u4",
                prim(Primitive::RangeValue, vec![var("lo#r0"), var("step#r0"), var("k#r0")])
            )
        );
    }

    #[test]
    fn oversized_static_expansion_falls_back() {
        let lp = trace_next(int(1), int(100));
        let trip = TripDescriptor::from_bounds(1, 100, 1).unwrap();
        let unrolled = unroll(&lp, Some(trip), 50, 16, &mut FreshNames::default()).unwrap();
        assert!(matches!(unrolled, Unrolled::Runtime(_)));
    }

    #[test]
    fn bounds_fold_through_globals() {
        let globals: BTreeMap<String, Scalar> = [("N".to_string(), Scalar::Int(12))].into();
        let lookup = |name: &str| globals.get(name);
        assert_eq!(const_bound(&minus(var("N"), int(2)), &lookup), Some(10));
        assert_eq!(const_bound(&var("M"), &lookup), None);
    }

    #[test]
    fn pass_unrolls_inner_loops_first() {
        let inner = foreach("j", int(1), int(2))
            .unroll(2)
            .body(vec![trace(vec![var("i"), var("j")])])
            .into_stmt();
        let outer = foreach("i", int(1), int(2)).unroll(2).body(vec![inner]).into_stmt();
        let mut program = Program::with_functions(vec![function_main(vec![outer])]);
        let mut pass = UnrollPass::new(1024);
        assert!(pass.apply(&mut program).unwrap());
        assert_eq!(
            pass.stats,
            UnrollStats {
                static_loops: 2,
                runtime_loops: 0,
                copies: 4
            }
        );
        let body = &program.functions[0].body;
        assert_eq!(body.stmts.len(), 2);
        let Stmt::Block(copy) = &body.stmts[1] else {
            panic!("expected a copy block")
        };
        let Stmt::Block(inner_copy) = &copy.stmts[3] else {
            panic!("expected an inner copy block")
        };
        assert_eq!(
            inner_copy.stmts[2],
            trace(vec![var("i#u3"), var("j#u1")])
        );
    }

    fn function_main(stmts: Vec<Stmt>) -> FunctionDef {
        weft_syntax::builder::function("main").body(stmts)
    }
}
