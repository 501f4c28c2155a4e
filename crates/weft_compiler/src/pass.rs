//! IR-to-IR passes run by the compile pipeline.

use weft_syntax::{Diagnostic, Program};

/// A whole-program pass. Passes run in order; the first failing one stops
/// the pipeline with its diagnostics.
pub trait Pass {
    /// Unique name, used in logs.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Returns whether the program changed.
    fn apply(&mut self, program: &mut Program) -> Result<bool, Vec<Diagnostic>>;
}
