use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Failures of the core. None of them is recovered from: each aborts the run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("double assignment to `{name}`")]
    DoubleAssignment { name: String },
    #[error("`{name}` was never assigned before `{scope}` exited")]
    UnboundVariable { name: String, scope: String },
    #[error("deadlock: {waiting} statement(s) wait forever, e.g. on `{name}`")]
    Deadlock { name: String, waiting: usize },
    #[error("invalid range: {message}")]
    InvalidRange { message: String },
    #[error("stack exhausted calling `{function}`: more than {limit} live activations")]
    StackExhaustion { function: String, limit: usize },
    #[error("assertion failed: {message}")]
    AssertionFailed { message: String },
    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("division by zero in `{op}`")]
    DivisionByZero { op: &'static str },
    #[error("integer overflow in `{op}`")]
    Overflow { op: &'static str },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error("`{name}` expected {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String },
    #[error("`{name}` declared twice in `{scope}`")]
    Redeclared { name: String, scope: String },
    #[error("call to `{function}` nested inside an expression; hoist calls first")]
    NestedCall { function: String },
    #[error("`{name}` used after its scope was released")]
    ReleasedValue { name: String },
    #[error("function `{function}` has no output to assign")]
    MissingOutput { function: String },
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("trace output failed: {message}")]
    HostOutput { message: String },
    #[error("store exhausted: no room for more {what}")]
    StoreExhausted { what: &'static str },
    #[error("{error} (in {construct})")]
    InConstruct {
        construct: String,
        error: Box<RuntimeError>,
    },
}

impl RuntimeError {
    /// The error without any construct context.
    pub fn root(&self) -> &RuntimeError {
        match self {
            RuntimeError::InConstruct { error, .. } => error.root(),
            other => other,
        }
    }

    /// Stable name of the failure kind, as reported to test harnesses.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            RuntimeError::DoubleAssignment { .. } => "DoubleAssignmentError",
            RuntimeError::UnboundVariable { .. } => "UnboundVariableError",
            RuntimeError::Deadlock { .. } => "DeadlockError",
            RuntimeError::InvalidRange { .. } => "InvalidRangeError",
            RuntimeError::StackExhaustion { .. } => "StackExhaustionError",
            RuntimeError::AssertionFailed { .. } => "AssertionError",
            RuntimeError::TypeMismatch { .. } => "TypeMismatchError",
            RuntimeError::DivisionByZero { .. } => "DivisionByZeroError",
            RuntimeError::Overflow { .. } => "OverflowError",
            RuntimeError::UnknownFunction { .. } => "UnknownFunctionError",
            RuntimeError::ArityMismatch { .. } => "ArityMismatchError",
            RuntimeError::UndefinedVariable { .. } => "UndefinedVariableError",
            RuntimeError::Redeclared { .. } => "RedeclaredError",
            RuntimeError::NestedCall { .. } => "NestedCallError",
            RuntimeError::ReleasedValue { .. } => "ReleasedValueError",
            RuntimeError::MissingOutput { .. } => "MissingOutputError",
            RuntimeError::Cancelled => "CancelledError",
            RuntimeError::StoreExhausted { .. } => "StoreExhaustedError",
            RuntimeError::HostOutput { .. } => "HostOutputError",
            RuntimeError::InConstruct { .. } => unreachable!("root() strips construct context"),
        }
    }

    pub fn in_construct(self, construct: impl Into<String>) -> Self {
        match self {
            already @ RuntimeError::InConstruct { .. } => already,
            error => RuntimeError::InConstruct {
                construct: construct.into(),
                error: Box::new(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_context_wraps_once() {
        let e = RuntimeError::DoubleAssignment { name: "x".into() }
            .in_construct("fn main: assignment to `x`")
            .in_construct("outer");
        assert_eq!(e.kind(), "DoubleAssignmentError");
        assert_eq!(
            e.to_string(),
            "double assignment to `x` (in fn main: assignment to `x`)"
        );
    }
}
