//! Expression evaluation against the value store.

use crate::corelib;
use crate::error::{RuntimeError, RuntimeResult};
use crate::store::{ScopeId, ValueId, ValueStore};
use std::task::Poll;
use weft_syntax::{Expr, Scalar};

/// Outcome of evaluating against possibly-unready values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Eval<T> {
    Ready(T),
    /// The evaluation needs this value first; nothing was computed.
    Blocked(ValueId),
}

pub struct Evaluator<'s> {
    store: &'s ValueStore,
    scope: ScopeId,
}

impl<'s> Evaluator<'s> {
    pub fn new(store: &'s ValueStore, scope: ScopeId) -> Self {
        Self { store, scope }
    }

    /// First variable read by `expr` that is not set yet.
    pub fn blocked_on(&self, expr: &Expr) -> RuntimeResult<Option<ValueId>> {
        let mut blocked = None;
        let mut err = None;
        expr.for_each_read(&mut |name| {
            if blocked.is_some() || err.is_some() {
                return;
            }
            match self.store.resolve(self.scope, name) {
                Ok(id) => match self.store.read(id) {
                    Ok(Poll::Pending) => blocked = Some(id),
                    Ok(Poll::Ready(_)) => {}
                    Err(e) => err = Some(e),
                },
                Err(e) => err = Some(e),
            }
        });
        match err {
            Some(e) => Err(e),
            None => Ok(blocked),
        }
    }

    /// Evaluate `expr`, or report the value it is waiting on. Every
    /// sub-expression is computed exactly once per completed evaluation.
    pub fn evaluate(&self, expr: &Expr) -> RuntimeResult<Eval<Scalar>> {
        if let Some(id) = self.blocked_on(expr)? {
            return Ok(Eval::Blocked(id));
        }
        self.compute(expr)
    }

    /// Evaluate several expressions once all of them are ready.
    pub fn evaluate_all(&self, exprs: &[Expr]) -> RuntimeResult<Eval<Vec<Scalar>>> {
        for e in exprs {
            if let Some(id) = self.blocked_on(e)? {
                return Ok(Eval::Blocked(id));
            }
        }
        let mut out = Vec::with_capacity(exprs.len());
        for e in exprs {
            match self.compute(e)? {
                Eval::Ready(v) => out.push(v),
                Eval::Blocked(id) => return Ok(Eval::Blocked(id)),
            }
        }
        Ok(Eval::Ready(out))
    }

    fn compute(&self, expr: &Expr) -> RuntimeResult<Eval<Scalar>> {
        match expr {
            Expr::Literal(v) => Ok(Eval::Ready(v.clone())),
            Expr::Var(name) => {
                let id = self.store.resolve(self.scope, name)?;
                Ok(match self.store.read(id)? {
                    Poll::Ready(v) => Eval::Ready(v.clone()),
                    Poll::Pending => Eval::Blocked(id),
                })
            }
            Expr::Primitive { op, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    match self.compute(a)? {
                        Eval::Ready(v) => values.push(v),
                        Eval::Blocked(id) => return Ok(Eval::Blocked(id)),
                    }
                }
                corelib::apply(*op, &values).map(Eval::Ready)
            }
            Expr::Call { function, .. } => Err(RuntimeError::NestedCall {
                function: function.clone(),
            }),
        }
    }
}

/// Evaluate a closed expression (literals and primitives only). `None` when the
/// expression reads variables, calls functions, or a primitive fails.
pub fn const_eval(expr: &Expr) -> Option<Scalar> {
    match expr {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Var(_) | Expr::Call { .. } => None,
        Expr::Primitive { op, args } => {
            let values = args.iter().map(const_eval).collect::<Option<Vec<_>>>()?;
            corelib::apply(*op, &values).ok()
        }
    }
}
