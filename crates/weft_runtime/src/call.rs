//! Activation records for user function calls.
//!
//! Every call gets a fresh scope whose lexical parent is the global scope, so
//! a recursive call never sees the caller's locals. Records live in an arena
//! indexed by frame id; the host stack only carries control flow.

use crate::error::{RuntimeError, RuntimeResult};
use crate::store::{next_index, ScopeId, ValueId, ValueStore};
use std::collections::HashMap;
use tracing::trace;
use weft_syntax::{FunctionDef, Scalar};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

#[derive(Debug)]
pub struct Activation<'p> {
    pub function: &'p FunctionDef,
    pub scope: ScopeId,
    pub output: Option<ValueId>,
    pub depth: usize,
}

#[derive(Debug, Default)]
pub struct Activations<'p> {
    frames: Vec<Option<Activation<'p>>>,
    free: Vec<FrameId>,
    by_scope: HashMap<ScopeId, FrameId>,
    live: usize,
    peak: usize,
    total: u64,
}

impl<'p> Activations<'p> {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            free: Vec::new(),
            by_scope: HashMap::new(),
            live: 0,
            peak: 0,
            total: 0,
        }
    }

    fn push(&mut self, activation: Activation<'p>) -> RuntimeResult<FrameId> {
        let scope = activation.scope;
        let id = match self.free.pop() {
            Some(id) => {
                self.frames[id.0 as usize] = Some(activation);
                id
            }
            None => {
                let id = FrameId(next_index(self.frames.len(), "activations")?);
                self.frames.push(Some(activation));
                id
            }
        };
        self.by_scope.insert(scope, id);
        self.live += 1;
        self.total += 1;
        self.peak = self.peak.max(self.live);
        Ok(id)
    }

    pub fn get(&self, id: FrameId) -> Option<&Activation<'p>> {
        self.frames.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Drop the activation owning `scope`, if `scope` is a call frame.
    pub fn release_scope(&mut self, scope: ScopeId) -> Option<Activation<'p>> {
        let id = self.by_scope.remove(&scope)?;
        let activation = self.frames[id.0 as usize].take()?;
        self.free.push(id);
        self.live -= 1;
        Some(activation)
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Create the activation for one call: a fresh scope, each parameter bound to
/// a fresh value set from its argument, and an unset output value. The caller
/// spawns the body into the returned scope.
#[allow(clippy::too_many_arguments)]
pub fn activate<'p>(
    store: &mut ValueStore,
    frames: &mut Activations<'p>,
    function: &'p FunctionDef,
    args: Vec<Scalar>,
    globals: ScopeId,
    owner: Option<ScopeId>,
    depth: usize,
    max_activations: usize,
) -> RuntimeResult<(FrameId, ScopeId, Option<ValueId>)> {
    if args.len() != function.params.len() {
        return Err(RuntimeError::ArityMismatch {
            name: function.name.clone(),
            expected: function.params.len(),
            received: args.len(),
        });
    }
    if frames.live() >= max_activations {
        return Err(RuntimeError::StackExhaustion {
            function: function.name.clone(),
            limit: max_activations,
        });
    }
    let scope = store.open_scope(format!("fn {}", function.name), Some(globals), owner)?;
    for (param, arg) in function.params.iter().zip(args) {
        let id = store.declare(scope, &param.name, param.ty)?;
        store.set(id, arg)?;
    }
    let output = match &function.output {
        Some(out) => Some(store.declare(scope, &out.name, out.ty)?),
        None => None,
    };
    let frame = frames.push(Activation {
        function,
        scope,
        output,
        depth,
    })?;
    trace!(function = %function.name, depth, live = frames.live(), "activate");
    Ok((frame, scope, output))
}
