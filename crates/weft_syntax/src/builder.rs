//! Small constructors for building IR in code (tests, the unroller, sample programs).

use crate::ir::*;
use crate::span::Span;

pub fn int(v: i64) -> Expr {
    Expr::int(v)
}

pub fn string(s: &str) -> Expr {
    Expr::Literal(Scalar::from(s))
}

pub fn var(name: &str) -> Expr {
    Expr::var(name)
}

pub fn prim(op: Primitive, args: Vec<Expr>) -> Expr {
    Expr::Primitive { op, args }
}

pub fn plus(a: Expr, b: Expr) -> Expr {
    prim(Primitive::Plus, vec![a, b])
}

pub fn minus(a: Expr, b: Expr) -> Expr {
    prim(Primitive::Minus, vec![a, b])
}

pub fn multiply(a: Expr, b: Expr) -> Expr {
    prim(Primitive::Multiply, vec![a, b])
}

pub fn call(function: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        function: function.to_string(),
        args,
    }
}

pub fn declare(name: &str, ty: Type) -> Stmt {
    Stmt::Declare(VarDecl::new(name, ty))
}

pub fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::Assign {
        target: target.to_string(),
        value,
        span: Span::default(),
    }
}

pub fn trace(args: Vec<Expr>) -> Stmt {
    builtin(Builtin::Trace, args)
}

pub fn assert_that(cond: Expr, message: &str) -> Stmt {
    builtin(Builtin::Assert, vec![cond, string(message)])
}

pub fn assert_equal(a: Expr, b: Expr, message: &str) -> Stmt {
    builtin(Builtin::AssertEqual, vec![a, b, string(message)])
}

pub fn builtin(builtin: Builtin, args: Vec<Expr>) -> Stmt {
    Stmt::Builtin {
        builtin,
        args,
        span: Span::default(),
    }
}

pub fn if_else(cond: Expr, then_stmts: Vec<Stmt>, else_stmts: Option<Vec<Stmt>>) -> Stmt {
    Stmt::If {
        cond,
        then_block: Block::new(then_stmts),
        else_block: else_stmts.map(Block::new),
        span: Span::default(),
    }
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(Block::new(stmts))
}

/// `foreach var in [lower:upper]` with an empty body; chain `.body(..)`.
pub fn foreach(var: &str, lower: Expr, upper: Expr) -> ForeachLoop {
    ForeachLoop {
        var: var.to_string(),
        lower,
        upper,
        step: None,
        body: Block::default(),
        annotations: LoopAnnotations::default(),
        span: Span::default(),
    }
}

impl ForeachLoop {
    pub fn step(mut self, step: Expr) -> Self {
        self.step = Some(step);
        self
    }

    pub fn unroll(mut self, factor: i64) -> Self {
        self.annotations.unroll = factor;
        self
    }

    pub fn body(mut self, stmts: Vec<Stmt>) -> Self {
        self.body = Block::new(stmts);
        self
    }

    pub fn into_stmt(self) -> Stmt {
        Stmt::Foreach(self)
    }
}

pub fn function(name: &str) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        params: Vec::new(),
        output: None,
        body: Block::default(),
        span: Span::default(),
    }
}

impl FunctionDef {
    pub fn param(mut self, name: &str, ty: Type) -> Self {
        self.params.push(VarDecl::new(name, ty));
        self
    }

    pub fn output(mut self, name: &str, ty: Type) -> Self {
        self.output = Some(VarDecl::new(name, ty));
        self
    }

    pub fn body(mut self, stmts: Vec<Stmt>) -> Self {
        self.body = Block::new(stmts);
        self
    }
}

impl Program {
    pub fn with_functions(functions: Vec<FunctionDef>) -> Self {
        Self {
            functions,
            ..Self::default()
        }
    }

    pub fn global(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.globals.insert(name.to_string(), value.into());
        self
    }
}
