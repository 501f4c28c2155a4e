//! Single-assignment value store.
//!
//! Values live in an arena and are owned by scopes. A value goes from unset
//! to set exactly once; readers of an unset value register a waiter and are
//! woken by the single write. Scopes keep a count of outstanding work (tasks
//! and child scopes); when it drops to zero the scope closes, every value it
//! declared must be set, and the values are released. Released slots and
//! closed scopes go on free lists and are reused; a value id carries the
//! generation of its slot, so a stale id never reads a later value.

use crate::error::{RuntimeError, RuntimeResult};
use std::collections::HashMap;
use std::fmt;
use std::task::Poll;
use tracing::trace;
use weft_syntax::{Scalar, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId {
    index: u32,
    generation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.index)
    }
}

/// Who is notified when a value becomes set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waiter {
    /// A parked task to re-queue.
    Task(TaskId),
    /// Copy the content into another value (callee output into caller target).
    Forward(ValueId),
}

#[derive(Debug)]
enum State {
    Unset(Vec<Waiter>),
    Set(Scalar),
    Released,
}

#[derive(Debug)]
struct Slot {
    name: String,
    ty: Type,
    state: State,
    generation: u32,
}

#[derive(Debug)]
struct Scope {
    label: String,
    /// Lexical parent for name lookup.
    parent: Option<ScopeId>,
    /// Scope whose lifetime covers this one; notified when this one closes.
    owner: Option<ScopeId>,
    names: HashMap<String, ValueId>,
    values: Vec<ValueId>,
    outstanding: usize,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct ValueStore {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    scopes: Vec<Scope>,
    free_scopes: Vec<ScopeId>,
    writes: u64,
}

/// Arena index for the next new entry of a table holding `len` entries.
pub(crate) fn next_index(len: usize, what: &'static str) -> RuntimeResult<u32> {
    u32::try_from(len).map_err(|_| RuntimeError::StoreExhausted { what })
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope. It starts with one outstanding hold that the opener
    /// releases with [`ValueStore::finish`] once its initial work is spawned.
    pub fn open_scope(
        &mut self,
        label: impl Into<String>,
        parent: Option<ScopeId>,
        owner: Option<ScopeId>,
    ) -> RuntimeResult<ScopeId> {
        let scope = Scope {
            label: label.into(),
            parent,
            owner,
            names: HashMap::new(),
            values: Vec::new(),
            outstanding: 1,
            closed: false,
        };
        let id = match self.free_scopes.pop() {
            Some(id) => {
                self.scopes[id.0 as usize] = scope;
                id
            }
            None => {
                let id = ScopeId(next_index(self.scopes.len(), "scopes")?);
                self.scopes.push(scope);
                id
            }
        };
        if let Some(owner) = owner {
            self.scopes[owner.0 as usize].outstanding += 1;
        }
        Ok(id)
    }

    pub fn is_closed(&self, scope: ScopeId) -> bool {
        self.scopes[scope.0 as usize].closed
    }

    pub fn declare(&mut self, scope: ScopeId, name: &str, ty: Type) -> RuntimeResult<ValueId> {
        let s = &self.scopes[scope.0 as usize];
        if s.names.contains_key(name) {
            return Err(RuntimeError::Redeclared {
                name: name.to_string(),
                scope: s.label.clone(),
            });
        }
        let id = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.name.clear();
                slot.name.push_str(name);
                slot.ty = ty;
                slot.state = State::Unset(Vec::new());
                ValueId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = next_index(self.slots.len(), "values")?;
                self.slots.push(Slot {
                    name: name.to_string(),
                    ty,
                    state: State::Unset(Vec::new()),
                    generation: 0,
                });
                ValueId {
                    index,
                    generation: 0,
                }
            }
        };
        let s = &mut self.scopes[scope.0 as usize];
        s.names.insert(name.to_string(), id);
        s.values.push(id);
        Ok(id)
    }

    /// The slot behind `id`, unless it has been reused since.
    fn slot(&self, id: ValueId) -> RuntimeResult<&Slot> {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation => Ok(slot),
            _ => Err(RuntimeError::ReleasedValue {
                name: id.to_string(),
            }),
        }
    }

    fn slot_mut(&mut self, id: ValueId) -> RuntimeResult<&mut Slot> {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation => Ok(slot),
            _ => Err(RuntimeError::ReleasedValue {
                name: id.to_string(),
            }),
        }
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<ValueId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id.0 as usize];
            if let Some(v) = s.names.get(name) {
                return Some(*v);
            }
            current = s.parent;
        }
        None
    }

    pub fn resolve(&self, scope: ScopeId, name: &str) -> RuntimeResult<ValueId> {
        self.lookup(scope, name)
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: name.to_string(),
            })
    }

    pub fn name(&self, id: ValueId) -> &str {
        self.slot(id).map_or("<released>", |slot| slot.name.as_str())
    }

    /// Content of a set value, or `Pending` while it is unset.
    pub fn read(&self, id: ValueId) -> RuntimeResult<Poll<&Scalar>> {
        let slot = self.slot(id)?;
        match &slot.state {
            State::Set(v) => Ok(Poll::Ready(v)),
            State::Unset(_) => Ok(Poll::Pending),
            State::Released => Err(RuntimeError::ReleasedValue {
                name: slot.name.clone(),
            }),
        }
    }

    pub fn is_set(&self, id: ValueId) -> bool {
        matches!(self.slot(id).map(|slot| &slot.state), Ok(State::Set(_)))
    }

    /// Register `waiter` on an unset value. Returns false if the value is
    /// already set (nothing to wait for).
    pub fn wait(&mut self, id: ValueId, waiter: Waiter) -> RuntimeResult<bool> {
        let slot = self.slot_mut(id)?;
        match &mut slot.state {
            State::Unset(waiters) => {
                waiters.push(waiter);
                Ok(true)
            }
            State::Set(_) => Ok(false),
            State::Released => Err(RuntimeError::ReleasedValue {
                name: slot.name.clone(),
            }),
        }
    }

    /// The single write of `id`. Returns the tasks to wake. Forward chains are
    /// followed iteratively.
    pub fn set(&mut self, id: ValueId, content: Scalar) -> RuntimeResult<Vec<TaskId>> {
        let mut woken = Vec::new();
        let mut pending = vec![(id, content)];
        while let Some((id, content)) = pending.pop() {
            let slot = self.slot_mut(id)?;
            if content.ty() != slot.ty {
                return Err(RuntimeError::TypeMismatch {
                    message: format!(
                        "`{}` is {} but was assigned {} `{}`",
                        slot.name,
                        slot.ty,
                        content.ty(),
                        content
                    ),
                });
            }
            let waiters = match &mut slot.state {
                State::Unset(waiters) => std::mem::take(waiters),
                State::Set(_) => {
                    return Err(RuntimeError::DoubleAssignment {
                        name: slot.name.clone(),
                    })
                }
                State::Released => {
                    return Err(RuntimeError::ReleasedValue {
                        name: slot.name.clone(),
                    })
                }
            };
            trace!(value = %id, name = %slot.name, %content, "set");
            slot.state = State::Set(content.clone());
            self.writes += 1;
            for waiter in waiters {
                match waiter {
                    Waiter::Task(task) => woken.push(task),
                    Waiter::Forward(target) => pending.push((target, content.clone())),
                }
            }
        }
        Ok(woken)
    }

    /// Make `to` receive the content of `from` as soon as `from` is set.
    pub fn forward(&mut self, from: ValueId, to: ValueId) -> RuntimeResult<Vec<TaskId>> {
        let content = match self.read(from)? {
            Poll::Ready(v) => v.clone(),
            Poll::Pending => {
                self.wait(from, Waiter::Forward(to))?;
                return Ok(Vec::new());
            }
        };
        self.set(to, content)
    }

    /// Add one unit of outstanding work (a spawned task) to `scope`.
    pub fn hold(&mut self, scope: ScopeId) {
        self.scopes[scope.0 as usize].outstanding += 1;
    }

    /// Release one unit of outstanding work. Returns every scope that closed
    /// as a result, innermost first.
    pub fn finish(&mut self, scope: ScopeId) -> RuntimeResult<Vec<ScopeId>> {
        let mut closed = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &mut self.scopes[id.0 as usize];
            debug_assert!(s.outstanding > 0, "scope {} finished too often", s.label);
            s.outstanding -= 1;
            if s.outstanding > 0 {
                break;
            }
            self.close(id)?;
            closed.push(id);
            current = self.scopes[id.0 as usize].owner;
        }
        Ok(closed)
    }

    fn close(&mut self, id: ScopeId) -> RuntimeResult<()> {
        let scope = &mut self.scopes[id.0 as usize];
        scope.closed = true;
        let values = std::mem::take(&mut scope.values);
        scope.names.clear();
        for v in &values {
            let slot = self.slot(*v)?;
            if let State::Unset(_) = slot.state {
                return Err(RuntimeError::UnboundVariable {
                    name: slot.name.clone(),
                    scope: self.scopes[id.0 as usize].label.clone(),
                });
            }
        }
        for v in values {
            self.slot_mut(v)?.state = State::Released;
            self.free_slots.push(v.index);
        }
        trace!(scope = %self.scopes[id.0 as usize].label, "closed");
        self.free_scopes.push(id);
        Ok(())
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Value slots allocated so far, live or waiting for reuse.
    pub fn slots_allocated(&self) -> usize {
        self.slots.len()
    }

    pub fn scopes_allocated(&self) -> usize {
        self.scopes.len()
    }
}
