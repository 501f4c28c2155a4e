//! Weft runtime: single-assignment value store, expression evaluation, and a
//! dataflow executor that runs statements as their inputs become ready.

pub mod call;
pub mod corelib;
pub mod error;
pub mod eval;
pub mod exec;
pub mod host;
pub mod range;
pub mod store;

pub use error::{RuntimeError, RuntimeResult};
pub use eval::{const_eval, Eval, Evaluator};
pub use exec::{run_program, CancelToken, Executor, RunStats, RuntimeOptions};
pub use host::{Host, RecordingHost, StdoutHost};
pub use range::{range_value, trip_count, TripDescriptor};
pub use store::{ScopeId, ValueId, ValueStore};
