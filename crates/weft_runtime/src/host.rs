//! Observability built-ins and the host they report to.
//!
//! Built-ins read ready values and never write any. `trace` goes to the host;
//! a failed assertion aborts the run, and so does a host that cannot emit a
//! trace.

use crate::error::{RuntimeError, RuntimeResult};
use std::io::{self, Write};
use weft_syntax::{Builtin, Scalar};

pub trait Host {
    fn trace(&mut self, values: &[Scalar]) -> io::Result<()>;
}

/// Writes `trace: a,b,...` lines to stdout.
#[derive(Debug, Default)]
pub struct StdoutHost;

impl Host for StdoutHost {
    fn trace(&mut self, values: &[Scalar]) -> io::Result<()> {
        let line = format_trace(values);
        tracing::debug!(%line, "trace");
        let mut out = io::stdout().lock();
        writeln!(out, "{}", line)
    }
}

/// Keeps every trace call, for tests and embedding.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub traces: Vec<Vec<Scalar>>,
}

impl Host for RecordingHost {
    fn trace(&mut self, values: &[Scalar]) -> io::Result<()> {
        self.traces.push(values.to_vec());
        Ok(())
    }
}

impl RecordingHost {
    /// Single-argument integer traces, in the order they happened.
    pub fn traced_ints(&self) -> Vec<i64> {
        self.traces
            .iter()
            .filter_map(|t| match t.as_slice() {
                [Scalar::Int(v)] => Some(*v),
                _ => None,
            })
            .collect()
    }
}

pub fn format_trace(values: &[Scalar]) -> String {
    let parts: Vec<String> = values.iter().map(Scalar::to_string).collect();
    format!("trace: {}", parts.join(","))
}

pub fn run_builtin(host: &mut dyn Host, builtin: Builtin, args: &[Scalar]) -> RuntimeResult<()> {
    match builtin {
        Builtin::Trace => host.trace(args).map_err(|e| {
            tracing::warn!(error = %e, "trace output failed");
            RuntimeError::HostOutput {
                message: e.to_string(),
            }
        }),
        Builtin::Assert => {
            let Some(cond) = args.first() else {
                return Err(arity(builtin, 1, args.len()));
            };
            let holds = cond.truthiness().ok_or_else(|| RuntimeError::TypeMismatch {
                message: format!("assert condition must be boolean or int, got `{}`", cond),
            })?;
            if holds {
                return Ok(());
            }
            let message = match args.get(1) {
                Some(m) => m.to_string(),
                None => "assertion failed".to_string(),
            };
            Err(RuntimeError::AssertionFailed { message })
        }
        Builtin::AssertEqual => {
            let [a, b, rest @ ..] = args else {
                return Err(arity(builtin, 2, args.len()));
            };
            if a == b {
                return Ok(());
            }
            let message = match rest.first().map(Scalar::to_string) {
                Some(m) if !m.is_empty() => format!("{}: {} != {}", m, a, b),
                _ => format!("{} != {}", a, b),
            };
            Err(RuntimeError::AssertionFailed { message })
        }
    }
}

fn arity(builtin: Builtin, expected: usize, received: usize) -> RuntimeError {
    RuntimeError::ArityMismatch {
        name: builtin.name().to_string(),
        expected,
        received,
    }
}
