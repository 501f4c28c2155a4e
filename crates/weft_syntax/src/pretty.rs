//! Readable listing of the IR, used to inspect what the passes produced.

use crate::ir::*;
use std::fmt::{self, Display, Formatter, Write};

const INDENT: &str = "  ";

struct Printer<'a, 'b> {
    out: &'a mut Formatter<'b>,
    depth: usize,
}

impl Printer<'_, '_> {
    fn line(&mut self, text: fmt::Arguments<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            self.out.write_str(INDENT)?;
        }
        self.out.write_fmt(text)?;
        self.out.write_char('\n')
    }

    fn block(&mut self, block: &Block) -> fmt::Result {
        self.depth += 1;
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        self.depth -= 1;
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> fmt::Result {
        match stmt {
            Stmt::Declare(d) => self.line(format_args!("{} {};", d.ty, d.name)),
            Stmt::Assign { target, value, .. } => {
                self.line(format_args!("{} = {};", target, value))
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.line(format_args!("if ({}) {{", cond))?;
                self.block(then_block)?;
                if let Some(b) = else_block {
                    self.line(format_args!("}} else {{"))?;
                    self.block(b)?;
                }
                self.line(format_args!("}}"))
            }
            Stmt::Foreach(lp) => {
                if lp.annotations.unroll != 1 {
                    self.line(format_args!("@unroll={}", lp.annotations.unroll))?;
                }
                match &lp.step {
                    Some(step) => self.line(format_args!(
                        "foreach {} in [{}:{}:{}] {{",
                        lp.var, lp.lower, lp.upper, step
                    ))?,
                    None => self.line(format_args!(
                        "foreach {} in [{}:{}] {{",
                        lp.var, lp.lower, lp.upper
                    ))?,
                }
                self.block(&lp.body)?;
                self.line(format_args!("}}"))
            }
            Stmt::Block(b) => {
                self.line(format_args!("{{"))?;
                self.block(b)?;
                self.line(format_args!("}}"))
            }
            Stmt::Builtin { builtin, args, .. } => {
                self.line(format_args!("{}({});", builtin.name(), CommaList(args)))
            }
        }
    }
}

struct CommaList<'a, T>(&'a [T]);

impl<T: Display> Display for CommaList<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, item) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", item)?;
        }
        Ok(())
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Scalar::Str(s)) => write!(f, "{:?}", s),
            Expr::Literal(s) => write!(f, "{}", s),
            Expr::Var(name) => f.write_str(name),
            Expr::Primitive { op, args } => match (op.infix(), args.as_slice()) {
                (Some(sym), [a, b]) => write!(f, "({} {} {})", a, sym, b),
                _ => write!(f, "{}({})", op.name(), CommaList(args)),
            },
            Expr::Call { function, args } => write!(f, "{}({})", function, CommaList(args)),
        }
    }
}

impl Display for VarDecl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.name)
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut p = Printer { out: &mut *f, depth: 0 };
        for stmt in &self.stmts {
            p.stmt(stmt)?;
        }
        Ok(())
    }
}

impl Display for FunctionDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.output {
            Some(out) => write!(f, "({}) ", out)?,
            None => f.write_str("() ")?,
        }
        writeln!(f, "{}({}) {{", self.name, CommaList(&self.params))?;
        let mut p = Printer { out: &mut *f, depth: 0 };
        p.block(&self.body)?;
        f.write_str("}\n")
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.globals {
            match value {
                Scalar::Str(s) => writeln!(f, "global const {} {} = {:?};", value.ty(), name, s)?,
                _ => writeln!(f, "global const {} {} = {};", value.ty(), name, value)?,
            }
        }
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 || !self.globals.is_empty() {
                f.write_str("\n")?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::*;
    use crate::ir::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prints_unrolled_loop_listing() {
        let main = function("main").body(vec![foreach("i", int(4), int(12))
            .unroll(10)
            .body(vec![
                trace(vec![plus(var("i"), int(1))]),
                assert_that(prim(Primitive::Ge, vec![var("i"), int(4)]), "i range"),
            ])
            .into_stmt()]);
        let expected = "\
() main() {
  @unroll=10
  foreach i in [4:12] {
    trace((i + 1));
    assert((i >= 4), \"i range\");
  }
}
";
        assert_eq!(main.to_string(), expected);
    }

    #[test]
    fn prints_function_signature_and_if() {
        let f = function("helper")
            .param("j", Type::Int)
            .output("o", Type::Int)
            .body(vec![if_else(
                var("j"),
                vec![assign("o", call("helper", vec![minus(var("j"), int(1))]))],
                Some(vec![assign("o", prim(Primitive::Copy, vec![int(0)]))]),
            )]);
        let expected = "\
(int o) helper(int j) {
  if (j) {
    o = helper((j - 1));
  } else {
    o = copy_integer(0);
  }
}
";
        assert_eq!(f.to_string(), expected);
    }
}
