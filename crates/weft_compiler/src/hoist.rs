//! Call hoisting.
//!
//! Moves every user call that is nested in an expression (or that sits in a
//! loop bound, an `if` condition or a built-in argument) into a fresh
//! temporary `t#N` declared and assigned just before the statement. Afterwards
//! a call only ever appears as the whole right-hand side of an assignment,
//! which is the form the executor evaluates.

use crate::pass::Pass;
use std::collections::HashMap;
use tracing::debug;
use weft_syntax::*;

#[derive(Debug, Default)]
pub struct HoistCalls {
    outputs: HashMap<String, Type>,
    next: usize,
}

impl HoistCalls {
    fn hoist_block(&mut self, block: &mut Block) {
        let stmts = std::mem::take(&mut block.stmts);
        for mut stmt in stmts {
            let mut before = Vec::new();
            self.hoist_stmt(&mut stmt, &mut before);
            block.stmts.extend(before);
            block.stmts.push(stmt);
        }
    }

    fn hoist_stmt(&mut self, stmt: &mut Stmt, before: &mut Vec<Stmt>) {
        let span = stmt.span();
        match stmt {
            Stmt::Declare(_) => {}
            Stmt::Assign { value, .. } => match value {
                // Already statement level; only its arguments may need work.
                Expr::Call { args, .. } => {
                    for a in args {
                        self.hoist_expr(a, before, span);
                    }
                }
                other => self.hoist_expr(other, before, span),
            },
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.hoist_expr(cond, before, span);
                self.hoist_block(then_block);
                if let Some(b) = else_block {
                    self.hoist_block(b);
                }
            }
            Stmt::Foreach(lp) => {
                self.hoist_expr(&mut lp.lower, before, span);
                self.hoist_expr(&mut lp.upper, before, span);
                if let Some(step) = &mut lp.step {
                    self.hoist_expr(step, before, span);
                }
                self.hoist_block(&mut lp.body);
            }
            Stmt::Block(b) => self.hoist_block(b),
            Stmt::Builtin { args, .. } => {
                for a in args {
                    self.hoist_expr(a, before, span);
                }
            }
        }
    }

    fn hoist_expr(&mut self, expr: &mut Expr, before: &mut Vec<Stmt>, span: Span) {
        match expr {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Primitive { args, .. } => {
                for a in args {
                    self.hoist_expr(a, before, span);
                }
            }
            Expr::Call { function, args } => {
                for a in args.iter_mut() {
                    self.hoist_expr(a, before, span);
                }
                let ty = self.outputs.get(function.as_str()).copied().unwrap_or_default();
                let temp = format!("t#{}", self.next);
                self.next += 1;
                let call = std::mem::replace(expr, Expr::Var(temp.clone()));
                before.push(Stmt::Declare(VarDecl::new(temp.clone(), ty)));
                before.push(Stmt::Assign {
                    target: temp,
                    value: call,
                    span,
                });
            }
        }
    }
}

impl Pass for HoistCalls {
    fn name(&self) -> &'static str {
        "hoist_calls"
    }

    fn description(&self) -> &'static str {
        "Moves nested user calls into statement-level temporaries"
    }

    fn apply(&mut self, program: &mut Program) -> Result<bool, Vec<Diagnostic>> {
        self.outputs = program
            .functions
            .iter()
            .filter_map(|f| f.output.as_ref().map(|o| (f.name.clone(), o.ty)))
            .collect();
        let start = self.next;
        for f in &mut program.functions {
            self.hoist_block(&mut f.body);
        }
        let hoisted = self.next - start;
        if hoisted > 0 {
            debug!(hoisted, "hoisted nested calls");
        }
        Ok(hoisted > 0)
    }
}
