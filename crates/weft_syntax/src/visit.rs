//! IR walkers shared by the compiler passes and the executor: variable reads,
//! free-variable usage of blocks, and shadowing-aware renaming.

use crate::ir::*;
use std::collections::BTreeSet;

impl Expr {
    /// Visit every variable read by this expression, including call arguments.
    pub fn for_each_read<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => f(name),
            Expr::Primitive { args, .. } | Expr::Call { args, .. } => {
                for a in args {
                    a.for_each_read(f);
                }
            }
        }
    }

    pub fn reads(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.for_each_read(&mut |n| out.push(n));
        out
    }

    pub fn contains_call(&self) -> bool {
        match self {
            Expr::Call { .. } => true,
            Expr::Literal(_) | Expr::Var(_) => false,
            Expr::Primitive { args, .. } => args.iter().any(Expr::contains_call),
        }
    }

    /// Visit every user call, innermost arguments first.
    pub fn for_each_call<'a>(&'a self, f: &mut impl FnMut(&'a str, &'a [Expr])) {
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Primitive { args, .. } => {
                for a in args {
                    a.for_each_call(f);
                }
            }
            Expr::Call { function, args } => {
                for a in args {
                    a.for_each_call(f);
                }
                f(function, args);
            }
        }
    }

    pub fn rename_var(&mut self, from: &str, to: &str) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                if name == from {
                    *name = to.to_string();
                }
            }
            Expr::Primitive { args, .. } | Expr::Call { args, .. } => {
                for a in args {
                    a.rename_var(from, to);
                }
            }
        }
    }
}

impl Stmt {
    /// Expressions evaluated directly by this statement (not by nested blocks).
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Declare(_) | Stmt::Block(_) => Vec::new(),
            Stmt::Assign { value, .. } => vec![value],
            Stmt::If { cond, .. } => vec![cond],
            Stmt::Foreach(lp) => {
                let mut v = vec![&lp.lower, &lp.upper];
                v.extend(lp.step.as_ref());
                v
            }
            Stmt::Builtin { args, .. } => args.iter().collect(),
        }
    }
}

/// Variables a block touches but does not declare itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub read: BTreeSet<String>,
    pub written: BTreeSet<String>,
}

impl Usage {
    fn add(&mut self, other: Usage) {
        self.read.extend(other.read);
        self.written.extend(other.written);
    }

    fn remove(&mut self, name: &str) {
        self.read.remove(name);
        self.written.remove(name);
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.written.is_empty()
    }
}

/// Free variable usage of a block: reads and writes of names declared outside it.
pub fn block_usage(block: &Block) -> Usage {
    let mut usage = Usage::default();
    for stmt in &block.stmts {
        usage.add(stmt_usage(stmt));
    }
    for decl in block.declared() {
        usage.remove(&decl.name);
    }
    usage
}

pub fn stmt_usage(stmt: &Stmt) -> Usage {
    let mut usage = Usage::default();
    for e in stmt.exprs() {
        e.for_each_read(&mut |n| {
            usage.read.insert(n.to_string());
        });
    }
    match stmt {
        Stmt::Declare(_) | Stmt::Builtin { .. } => {}
        Stmt::Assign { target, .. } => {
            usage.written.insert(target.clone());
        }
        Stmt::If {
            then_block,
            else_block,
            ..
        } => {
            usage.add(block_usage(then_block));
            if let Some(b) = else_block {
                usage.add(block_usage(b));
            }
        }
        Stmt::Foreach(lp) => {
            let mut body = block_usage(&lp.body);
            body.remove(&lp.var);
            usage.add(body);
        }
        Stmt::Block(b) => usage.add(block_usage(b)),
    }
    usage
}

/// Rename free occurrences of `from` to `to` inside `block`. A nested
/// declaration of `from` (or a loop variable named `from`) shadows it, and
/// since declarations cover their whole block, such a block is left alone.
pub fn rename_in_block(block: &mut Block, from: &str, to: &str) {
    if block.declares(from) {
        return;
    }
    for stmt in &mut block.stmts {
        rename_in_stmt(stmt, from, to);
    }
}

fn rename_in_stmt(stmt: &mut Stmt, from: &str, to: &str) {
    match stmt {
        Stmt::Declare(_) => {}
        Stmt::Assign { target, value, .. } => {
            if target == from {
                *target = to.to_string();
            }
            value.rename_var(from, to);
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
            ..
        } => {
            cond.rename_var(from, to);
            rename_in_block(then_block, from, to);
            if let Some(b) = else_block {
                rename_in_block(b, from, to);
            }
        }
        Stmt::Foreach(lp) => {
            lp.lower.rename_var(from, to);
            lp.upper.rename_var(from, to);
            if let Some(step) = &mut lp.step {
                step.rename_var(from, to);
            }
            if lp.var != from {
                rename_in_block(&mut lp.body, from, to);
            }
        }
        Stmt::Block(b) => rename_in_block(b, from, to),
        Stmt::Builtin { args, .. } => {
            for a in args {
                a.rename_var(from, to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn usage_excludes_locals_and_loop_variables() {
        let body = Block::new(vec![
            declare("t", Type::Int),
            assign("t", plus(var("i"), var("s"))),
            Stmt::Foreach(
                foreach("k", int(1), var("n")).body(vec![trace(vec![var("k"), var("t")])]),
            ),
            assign("o", var("t")),
        ]);
        let usage = block_usage(&body);
        assert_eq!(
            usage.read.into_iter().collect::<Vec<_>>(),
            vec!["i", "n", "s"]
        );
        assert_eq!(usage.written.into_iter().collect::<Vec<_>>(), vec!["o"]);
    }

    #[test]
    fn rename_stops_at_shadowing_declarations() {
        let mut body = Block::new(vec![
            trace(vec![plus(var("i"), int(1))]),
            Stmt::Block(Block::new(vec![
                declare("i", Type::Int),
                assign("i", int(7)),
                trace(vec![var("i")]),
            ])),
            Stmt::Foreach(foreach("i", int(0), var("i")).body(vec![trace(vec![var("i")])])),
        ]);
        rename_in_block(&mut body, "i", "i#u0");
        assert_eq!(body.stmts[0], trace(vec![plus(var("i#u0"), int(1))]));
        let Stmt::Block(inner) = &body.stmts[1] else {
            panic!("expected block")
        };
        assert_eq!(inner.stmts[2], trace(vec![var("i")]));
        let Stmt::Foreach(lp) = &body.stmts[2] else {
            panic!("expected loop")
        };
        assert_eq!(lp.upper, var("i#u0"));
        assert_eq!(lp.body.stmts[0], trace(vec![var("i")]));
    }

    #[test]
    fn calls_are_visited_innermost_first() {
        let e = call("f", vec![call("g", vec![var("x")]), int(2)]);
        let mut seen = Vec::new();
        e.for_each_call(&mut |name, _| seen.push(name));
        assert_eq!(seen, vec!["g", "f"]);
        assert!(plus(int(1), e).contains_call());
    }
}
