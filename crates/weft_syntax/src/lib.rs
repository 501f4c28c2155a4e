//! Weft syntax: IR nodes, spans, diagnostics, visitors, builders, pretty printer.

pub mod builder;
pub mod diagnostics;
pub mod ir;
pub mod pretty;
pub mod span;
pub mod visit;

pub use diagnostics::*;
pub use ir::*;
pub use span::*;
pub use visit::*;
