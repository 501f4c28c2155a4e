//! Diagnostics (errors, warnings) naming the offending IR construct.

use crate::span::Span;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    /// Function (and, where useful, statement) the diagnostic refers to.
    pub construct: Option<String>,
    pub span: Option<Span>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, construct: Option<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
            construct,
            span: None,
        }
    }

    pub fn warning(message: impl Into<String>, construct: Option<String>) -> Self {
        Self {
            level: Level::Warning,
            message: message.into(),
            construct,
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        if !span.is_dummy() {
            self.span = Some(span);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::Error => "error",
            Level::Warning => "warning",
        };
        write!(f, "{}", level)?;
        if let Some(construct) = &self.construct {
            write!(f, " in {}", construct)?;
        }
        if let Some(span) = &self.span {
            write!(f, " at {}", span)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// True if any diagnostic is an error (warnings alone do not fail a build).
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_construct_and_span() {
        let d = Diagnostic::error("undefined variable `x`", Some("fn main".into()))
            .with_span(Span::new(3, 7));
        assert_eq!(d.to_string(), "error in fn main at 3..7: undefined variable `x`");
        let w = Diagnostic::warning("unused", None).with_span(Span::default());
        assert_eq!(w.to_string(), "warning: unused");
        assert!(!has_errors(&[w]));
    }
}
