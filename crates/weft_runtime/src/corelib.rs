//! Primitive library: pure operations over ready values.

use crate::error::{RuntimeError, RuntimeResult};
use crate::range::{range_value, trip_count};
use weft_syntax::{Primitive, Scalar};

pub fn apply(op: Primitive, args: &[Scalar]) -> RuntimeResult<Scalar> {
    if args.len() != op.arity() {
        return Err(RuntimeError::ArityMismatch {
            name: op.name().to_string(),
            expected: op.arity(),
            received: args.len(),
        });
    }
    let name = op.name();
    let v = match op {
        Primitive::Plus => binary(name, args, i64::checked_add)?,
        Primitive::Minus => binary(name, args, i64::checked_sub)?,
        Primitive::Multiply => binary(name, args, i64::checked_mul)?,
        Primitive::Divide => Scalar::Int(floor_div(name, int(name, &args[0])?, int(name, &args[1])?)?),
        Primitive::Mod => {
            let (a, b) = (int(name, &args[0])?, int(name, &args[1])?);
            let q = floor_div(name, a, b)?;
            Scalar::Int(checked(name, q.checked_mul(b).and_then(|qb| a.checked_sub(qb)))?)
        }
        Primitive::Negate => Scalar::Int(checked(name, int(name, &args[0])?.checked_neg())?),
        Primitive::Copy => args[0].clone(),
        Primitive::Eq => Scalar::Bool(same_kind(name, &args[0], &args[1])? && args[0] == args[1]),
        Primitive::Ne => Scalar::Bool(!(same_kind(name, &args[0], &args[1])? && args[0] == args[1])),
        Primitive::Lt => Scalar::Bool(int(name, &args[0])? < int(name, &args[1])?),
        Primitive::Le => Scalar::Bool(int(name, &args[0])? <= int(name, &args[1])?),
        Primitive::Gt => Scalar::Bool(int(name, &args[0])? > int(name, &args[1])?),
        Primitive::Ge => Scalar::Bool(int(name, &args[0])? >= int(name, &args[1])?),
        Primitive::And => Scalar::Bool(truth(name, &args[0])? && truth(name, &args[1])?),
        Primitive::Or => Scalar::Bool(truth(name, &args[0])? || truth(name, &args[1])?),
        Primitive::Not => Scalar::Bool(!truth(name, &args[0])?),
        Primitive::RangeTripCount => Scalar::Int(trip_count(
            int(name, &args[0])?,
            int(name, &args[1])?,
            int(name, &args[2])?,
        )?),
        Primitive::RangeValue => Scalar::Int(range_value(
            int(name, &args[0])?,
            int(name, &args[1])?,
            int(name, &args[2])?,
        )?),
    };
    Ok(v)
}

fn binary(
    op: &'static str,
    args: &[Scalar],
    f: fn(i64, i64) -> Option<i64>,
) -> RuntimeResult<Scalar> {
    let (a, b) = (int(op, &args[0])?, int(op, &args[1])?);
    checked(op, f(a, b)).map(Scalar::Int)
}

fn int(op: &str, v: &Scalar) -> RuntimeResult<i64> {
    v.as_int().ok_or_else(|| RuntimeError::TypeMismatch {
        message: format!("`{}` expects int operands, got `{}`", op, v),
    })
}

fn truth(op: &str, v: &Scalar) -> RuntimeResult<bool> {
    v.truthiness().ok_or_else(|| RuntimeError::TypeMismatch {
        message: format!("`{}` expects a condition, got string `{}`", op, v),
    })
}

fn same_kind(op: &str, a: &Scalar, b: &Scalar) -> RuntimeResult<bool> {
    if a.ty() != b.ty() {
        return Err(RuntimeError::TypeMismatch {
            message: format!("`{}` compares {} with {}", op, a.ty(), b.ty()),
        });
    }
    Ok(true)
}

fn checked(op: &'static str, v: Option<i64>) -> RuntimeResult<i64> {
    v.ok_or(RuntimeError::Overflow { op })
}

fn floor_div(op: &'static str, a: i64, b: i64) -> RuntimeResult<i64> {
    if b == 0 {
        return Err(RuntimeError::DivisionByZero { op });
    }
    let q = checked(op, a.checked_div(b))?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}
