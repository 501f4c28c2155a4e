//! Compile-time failures. Passes collect them as diagnostics.

use thiserror::Error;
use weft_syntax::{Diagnostic, Span};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("unroll factor {factor} on loop over `{var}` must be a positive integer")]
    InvalidAnnotation { var: String, factor: i64 },
    #[error("invalid range on loop over `{var}`: {message}")]
    InvalidRange { var: String, message: String },
    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String },
    #[error("`{name}` is declared twice in the same scope")]
    DuplicateDeclaration { name: String },
    #[error("`{name}` is assigned more than once")]
    DoubleAssignment { name: String },
    #[error("loop over `{var}` writes `{name}`, which is declared outside the loop")]
    LoopCarriedWrite { var: String, name: String },
    #[error("cannot assign to input `{name}`")]
    InputWrite { name: String },
    #[error("cannot assign to global constant `{name}`")]
    GlobalWrite { name: String },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error("`{name}` expects {expected} arguments but is given {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("function `{name}` has no output and cannot be used as a value")]
    NoOutput { name: String },
    #[error("entry function `{name}` is not defined")]
    MissingEntry { name: String },
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::InvalidAnnotation { .. } => "InvalidAnnotationError",
            CompileError::InvalidRange { .. } => "InvalidRangeError",
            CompileError::UndefinedVariable { .. } => "UndefinedVariableError",
            CompileError::DuplicateDeclaration { .. } => "DuplicateDeclarationError",
            CompileError::DoubleAssignment { .. } => "DoubleAssignmentError",
            CompileError::LoopCarriedWrite { .. } => "LoopCarriedWriteError",
            CompileError::InputWrite { .. } => "InputWriteError",
            CompileError::GlobalWrite { .. } => "GlobalWriteError",
            CompileError::UnknownFunction { .. } => "UnknownFunctionError",
            CompileError::ArityMismatch { .. } => "ArityMismatchError",
            CompileError::NoOutput { .. } => "NoOutputError",
            CompileError::MissingEntry { .. } => "MissingEntryError",
        }
    }

    pub fn to_diagnostic(&self, construct: Option<String>, span: Span) -> Diagnostic {
        Diagnostic::error(self.to_string(), construct).with_span(span)
    }
}
