// Resource state transitions
//
// Every resource is in exactly one access state at a time. Changing how
// the GPU uses it requires a barrier from the old state to the new one;
// the tracker remembers the last declared state so callers only name
// where they want to go.

use std::collections::HashMap;
use std::hash::Hash;

/// How the GPU is about to access a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Contents are undefined (freshly created or discarded).
    Undefined,
    /// Host-written staging data, readable by copies.
    GenericRead,
    CopySource,
    CopyDest,
    RenderTarget,
    ShaderRead,
    Present,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
}

impl ResourceState {
    pub fn is_write(self) -> bool {
        matches!(self, Self::CopyDest | Self::RenderTarget)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub before: ResourceState,
    pub after: ResourceState,
}

impl Transition {
    pub const fn new(before: ResourceState, after: ResourceState) -> Self {
        Self { before, after }
    }

    /// The same transition, undone.
    pub const fn reversed(self) -> Self {
        Self {
            before: self.after,
            after: self.before,
        }
    }
}

/// Last known state per resource key.
#[derive(Debug, Clone)]
pub struct StateTracker<K> {
    states: HashMap<K, ResourceState>,
}

impl<K: Eq + Hash + Clone> StateTracker<K> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// Register a resource in its creation state, replacing any previous entry.
    pub fn register(&mut self, key: K, state: ResourceState) {
        self.states.insert(key, state);
    }

    pub fn state(&self, key: &K) -> Option<ResourceState> {
        self.states.get(key).copied()
    }

    /// Declare the next use of `key`.
    ///
    /// Returns the barrier to record, or `None` when the resource is already
    /// in `after`. Unknown keys start from `Undefined`.
    pub fn transition(&mut self, key: &K, after: ResourceState) -> Option<Transition> {
        let before = self.states.insert(key.clone(), after).unwrap_or(ResourceState::Undefined);
        (before != after).then(|| Transition::new(before, after))
    }
}

impl<K: Eq + Hash + Clone> Default for StateTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
