//! Range analysis: turns a loop's bound expressions into a trip descriptor.

use crate::error::{RuntimeError, RuntimeResult};
use crate::eval::{Eval, Evaluator};
use weft_syntax::{Expr, Scalar};

/// Resolved iteration space of `[lower:upper:step]`, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TripDescriptor {
    pub start: i64,
    /// Number of iterations; 0 means the body never runs.
    pub count: i64,
    pub step: i64,
}

impl TripDescriptor {
    pub fn from_bounds(lower: i64, upper: i64, step: i64) -> RuntimeResult<Self> {
        Ok(Self {
            start: lower,
            count: trip_count(lower, upper, step)?,
            step,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Induction value of iteration `k` (0-based). Only meaningful for `k < count`,
    /// where it lies between the loop bounds and cannot overflow.
    pub fn value_at(&self, k: i64) -> i64 {
        self.start + k * self.step
    }

    pub fn last(&self) -> Option<i64> {
        (self.count > 0).then(|| self.value_at(self.count - 1))
    }
}

/// `floor((upper - lower) / step) + 1` when `upper - lower` is zero or has the
/// sign of `step`, else 0.
pub fn trip_count(lower: i64, upper: i64, step: i64) -> RuntimeResult<i64> {
    if step == 0 {
        return Err(RuntimeError::InvalidRange {
            message: format!("[{}:{}:{}] has a zero step", lower, upper, step),
        });
    }
    let diff = upper as i128 - lower as i128;
    let step = step as i128;
    if diff != 0 && (diff < 0) != (step < 0) {
        return Ok(0);
    }
    let count = diff / step + 1;
    i64::try_from(count).map_err(|_| RuntimeError::InvalidRange {
        message: format!("[{}:{}:{}] has more than {} iterations", lower, upper, step, i64::MAX),
    })
}

/// Induction value `lower + k * step` of iteration `k`, widened so that only
/// a result outside `i64` is an overflow.
pub fn range_value(lower: i64, step: i64, k: i64) -> RuntimeResult<i64> {
    let value = lower as i128 + k as i128 * step as i128;
    i64::try_from(value).map_err(|_| RuntimeError::Overflow { op: "range_value" })
}

/// Evaluate the three bounds (each exactly once, after all of them are ready)
/// and build the trip descriptor.
pub fn analyze(
    eval: &Evaluator<'_>,
    lower: &Expr,
    upper: &Expr,
    step: &Expr,
) -> RuntimeResult<Eval<TripDescriptor>> {
    for e in [lower, upper, step] {
        if let Some(id) = eval.blocked_on(e)? {
            return Ok(Eval::Blocked(id));
        }
    }
    let mut bounds = [0i64; 3];
    for (slot, (what, e)) in bounds
        .iter_mut()
        .zip([("lower bound", lower), ("upper bound", upper), ("step", step)])
    {
        *slot = match eval.evaluate(e)? {
            Eval::Ready(Scalar::Int(v)) => v,
            Eval::Ready(other) => {
                return Err(RuntimeError::TypeMismatch {
                    message: format!("range {} must be int, got `{}`", what, other),
                })
            }
            Eval::Blocked(id) => return Ok(Eval::Blocked(id)),
        };
    }
    let [lo, hi, step] = bounds;
    TripDescriptor::from_bounds(lo, hi, step).map(Eval::Ready)
}
