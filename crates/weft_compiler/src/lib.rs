//! Weft compiler: IR loading, validation, global pruning, call hoisting,
//! loop unrolling, and the pipeline that runs them.

mod error;
pub mod hoist;
pub mod pass;
pub mod unroll;
pub mod validate;

pub use error::CompileError;
pub use pass::Pass;
pub use unroll::{unroll, FreshNames, RuntimeGroupedLoop, Unrolled, UnrolledFragment, UnrollPass};
pub use validate::check;

use std::path::Path;
use thiserror::Error;
use tracing::debug;
use weft_runtime::{run_program, Host, RuntimeError, RuntimeOptions};
use weft_syntax::{Diagnostic, Program};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Apply `@unroll` annotations. Annotations are validated either way.
    pub unroll: bool,
    /// Cap on statically expanded copies per loop.
    pub max_expanded_copies: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            unroll: true,
            max_expanded_copies: 1024,
        }
    }
}

/// Print diagnostics to stderr.
pub fn print_diagnostics(diags: &[Diagnostic]) {
    for d in diags {
        eprintln!("{}", d);
    }
}

/// Decode a program from its JSON encoding.
pub fn parse_program(json: &str) -> Result<Program, Vec<Diagnostic>> {
    serde_json::from_str(json)
        .map_err(|e| vec![Diagnostic::error(format!("invalid program: {}", e), None)])
}

/// Read and decode a JSON program file.
pub fn load_program(path: &Path) -> Result<Program, Vec<Diagnostic>> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        vec![Diagnostic::error(
            format!("failed to read {}: {}", path.display(), e),
            None,
        )]
    })?;
    let program = parse_program(&source)?;
    debug!(
        path = %path.display(),
        functions = program.functions.len(),
        globals = program.globals.len(),
        "loaded program"
    );
    Ok(program)
}

/// Validate and transform `program` into the form the executor runs.
pub fn compile(mut program: Program, options: &CompileOptions) -> Result<Program, Vec<Diagnostic>> {
    let mut passes: Vec<Box<dyn Pass>> = vec![
        Box::new(validate::Validate),
        Box::new(validate::PruneUnused),
        Box::new(hoist::HoistCalls::default()),
    ];
    if options.unroll {
        passes.push(Box::new(UnrollPass::new(options.max_expanded_copies)));
    }
    for pass in &mut passes {
        let changed = pass.apply(&mut program)?;
        debug!(pass = pass.name(), changed, "pass finished");
    }
    Ok(program)
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("compilation failed with {} diagnostic(s)", .0.len())]
    Compile(Vec<Diagnostic>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Compile `program` and run its entry function against `host`.
pub fn compile_and_run<H: Host>(
    program: Program,
    options: &CompileOptions,
    runtime: RuntimeOptions,
    host: H,
) -> Result<H, RunError> {
    let program = compile(program, options).map_err(RunError::Compile)?;
    Ok(run_program(&program, host, runtime)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_runtime::RecordingHost;

    #[test]
    fn json_programs_decode_with_defaults() {
        let program = parse_program(
            r#"{"functions": [{"name": "main", "body": {"stmts": [
                {"builtin": {"builtin": "trace", "args": [{"literal": 7}]}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(program.entry, "main");
        let host = compile_and_run(
            program,
            &CompileOptions::default(),
            RuntimeOptions::default(),
            RecordingHost::default(),
        )
        .unwrap();
        assert_eq!(host.traced_ints(), vec![7]);
    }

    #[test]
    fn malformed_json_is_a_diagnostic() {
        let diags = parse_program("{").unwrap_err();
        assert!(diags[0].message.starts_with("invalid program:"));
    }
}
