//! Weft IR: the validated program the front end hands to the core.
//!
//! Every variable is a single-assignment value. `Declare` introduces an unset
//! binding scoped to the enclosing block; exactly one `Assign` may set it.
//! Statements of a block carry no ordering beyond their data dependencies.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Whole program: function definitions plus global constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
    /// Global constants, readable from every function.
    #[serde(default)]
    pub globals: BTreeMap<String, Scalar>,
    /// Function run by the executor; takes no arguments.
    #[serde(default = "default_entry")]
    pub entry: String,
}

fn default_entry() -> String {
    "main".to_string()
}

impl Default for Program {
    fn default() -> Self {
        Self {
            functions: Vec::new(),
            globals: BTreeMap::new(),
            entry: default_entry(),
        }
    }
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// User function: `(ty output) name(ty param, ...) { body }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<VarDecl>,
    /// Result binding; set by exactly one statement of the body.
    #[serde(default)]
    pub output: Option<VarDecl>,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    #[serde(default)]
    pub ty: Type,
}

impl VarDecl {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Value kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    #[default]
    Int,
    Bool,
    String,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::Int => "int",
            Type::Bool => "boolean",
            Type::String => "string",
        };
        f.write_str(s)
    }
}

/// Content of a ready value, and of literals.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl Scalar {
    pub fn ty(&self) -> Type {
        match self {
            Scalar::Int(_) => Type::Int,
            Scalar::Bool(_) => Type::Bool,
            Scalar::Str(_) => Type::String,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Condition value: booleans as-is, integers are true when non-zero.
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            Scalar::Int(v) => Some(*v != 0),
            Scalar::Str(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            stmts,
            span: Span::default(),
        }
    }

    /// Names declared directly in this block (not in nested blocks).
    pub fn declared(&self) -> impl Iterator<Item = &VarDecl> {
        self.stmts.iter().filter_map(|s| match s {
            Stmt::Declare(d) => Some(d),
            _ => None,
        })
    }

    pub fn declares(&self, name: &str) -> bool {
        self.declared().any(|d| d.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    /// Unset binding visible in the whole enclosing block.
    Declare(VarDecl),
    /// Single write of `target`. A user call may only appear here as the whole `value`
    /// once calls have been hoisted.
    Assign {
        target: String,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    If {
        cond: Expr,
        then_block: Block,
        #[serde(default)]
        else_block: Option<Block>,
        #[serde(default)]
        span: Span,
    },
    Foreach(ForeachLoop),
    Block(Block),
    /// Observability built-in; reads its arguments, writes nothing.
    Builtin {
        builtin: Builtin,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Declare(_) => Span::default(),
            Stmt::Assign { span, .. } | Stmt::If { span, .. } | Stmt::Builtin { span, .. } => {
                *span
            }
            Stmt::Foreach(lp) => lp.span,
            Stmt::Block(b) => b.span,
        }
    }
}

/// `foreach var in [lower:upper:step] { body }`; inclusive on both ends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForeachLoop {
    pub var: String,
    pub lower: Expr,
    pub upper: Expr,
    /// Defaults to 1.
    #[serde(default)]
    pub step: Option<Expr>,
    pub body: Block,
    #[serde(default)]
    pub annotations: LoopAnnotations,
    #[serde(default)]
    pub span: Span,
}

impl ForeachLoop {
    pub fn step_expr(&self) -> Expr {
        self.step.clone().unwrap_or(Expr::Literal(Scalar::Int(1)))
    }
}

/// Compiler directives attached to a loop. They never change semantics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopAnnotations {
    /// Requested unroll factor; 1 disables unrolling.
    #[serde(default = "default_unroll")]
    pub unroll: i64,
}

fn default_unroll() -> i64 {
    1
}

impl Default for LoopAnnotations {
    fn default() -> Self {
        Self {
            unroll: default_unroll(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    Trace,
    Assert,
    #[serde(alias = "assertEqual")]
    AssertEqual,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Trace => "trace",
            Builtin::Assert => "assert",
            Builtin::AssertEqual => "assertEqual",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Scalar),
    Var(String),
    Primitive {
        op: Primitive,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// Call of a user function with an output.
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn int(v: i64) -> Self {
        Expr::Literal(Scalar::Int(v))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }
}

/// Pure operations supplied by the primitive library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    #[serde(alias = "plus_integer")]
    Plus,
    #[serde(alias = "minus_integer")]
    Minus,
    Multiply,
    /// Floor division.
    Divide,
    Mod,
    Negate,
    #[serde(alias = "copy_integer")]
    Copy,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    /// Inclusive trip count of `[lo:hi:step]`.
    RangeTripCount,
    /// Induction value `lo + k * step` of iteration `k`.
    RangeValue,
}

impl Primitive {
    pub const ALL: [Primitive; 18] = [
        Primitive::Plus,
        Primitive::Minus,
        Primitive::Multiply,
        Primitive::Divide,
        Primitive::Mod,
        Primitive::Negate,
        Primitive::Copy,
        Primitive::Eq,
        Primitive::Ne,
        Primitive::Lt,
        Primitive::Le,
        Primitive::Gt,
        Primitive::Ge,
        Primitive::And,
        Primitive::Or,
        Primitive::Not,
        Primitive::RangeTripCount,
        Primitive::RangeValue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Plus => "plus_integer",
            Primitive::Minus => "minus_integer",
            Primitive::Multiply => "multiply",
            Primitive::Divide => "divide",
            Primitive::Mod => "mod",
            Primitive::Negate => "negate",
            Primitive::Copy => "copy_integer",
            Primitive::Eq => "eq",
            Primitive::Ne => "ne",
            Primitive::Lt => "lt",
            Primitive::Le => "le",
            Primitive::Gt => "gt",
            Primitive::Ge => "ge",
            Primitive::And => "and",
            Primitive::Or => "or",
            Primitive::Not => "not",
            Primitive::RangeTripCount => "range_trip_count",
            Primitive::RangeValue => "range_value",
        }
    }

    /// Accepts both the library names and the short operator names.
    pub fn from_name(name: &str) -> Option<Primitive> {
        let short = match name {
            "plus" => Some(Primitive::Plus),
            "minus" => Some(Primitive::Minus),
            "copy" => Some(Primitive::Copy),
            _ => None,
        };
        short.or_else(|| Primitive::ALL.into_iter().find(|p| p.name() == name))
    }

    pub fn arity(&self) -> usize {
        match self {
            Primitive::Negate | Primitive::Copy | Primitive::Not => 1,
            Primitive::RangeTripCount | Primitive::RangeValue => 3,
            _ => 2,
        }
    }

    /// Operator spelling for binary primitives, used by the pretty printer.
    pub fn infix(&self) -> Option<&'static str> {
        match self {
            Primitive::Plus => Some("+"),
            Primitive::Minus => Some("-"),
            Primitive::Multiply => Some("*"),
            Primitive::Divide => Some("%/"),
            Primitive::Mod => Some("%%"),
            Primitive::Eq => Some("=="),
            Primitive::Ne => Some("!="),
            Primitive::Lt => Some("<"),
            Primitive::Le => Some("<="),
            Primitive::Gt => Some(">"),
            Primitive::Ge => Some(">="),
            Primitive::And => Some("&&"),
            Primitive::Or => Some("||"),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_names_resolve_both_spellings() {
        assert_eq!(Primitive::from_name("plus_integer"), Some(Primitive::Plus));
        assert_eq!(Primitive::from_name("plus"), Some(Primitive::Plus));
        assert_eq!(Primitive::from_name("range_trip_count"), Some(Primitive::RangeTripCount));
        assert_eq!(Primitive::from_name("sqrt"), None);
    }

    #[test]
    fn loop_json_uses_defaults() {
        let json = r#"{
            "var": "x",
            "lower": {"literal": 1},
            "upper": {"call": {"function": "f"}},
            "body": {"stmts": [{"builtin": {"builtin": "trace", "args": [{"var": "x"}]}}]}
        }"#;
        let lp: ForeachLoop = serde_json::from_str(json).unwrap();
        assert_eq!(lp.annotations.unroll, 1);
        assert_eq!(lp.step_expr(), Expr::int(1));
        assert_eq!(
            lp.upper,
            Expr::Call {
                function: "f".into(),
                args: vec![]
            }
        );
    }

    #[test]
    fn primitive_aliases_deserialize() {
        let e: Expr = serde_json::from_str(
            r#"{"primitive": {"op": "minus_integer", "args": [{"var": "j"}, {"literal": 1}]}}"#,
        )
        .unwrap();
        assert_eq!(
            e,
            Expr::Primitive {
                op: Primitive::Minus,
                args: vec![Expr::var("j"), Expr::int(1)]
            }
        );
    }

    #[test]
    fn truthiness_of_scalars() {
        assert_eq!(Scalar::Int(0).truthiness(), Some(false));
        assert_eq!(Scalar::Int(-2).truthiness(), Some(true));
        assert_eq!(Scalar::Bool(true).truthiness(), Some(true));
        assert_eq!(Scalar::from("x").truthiness(), None);
    }
}
