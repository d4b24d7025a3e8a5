//! GC root tracking
//!
//! Roots are starting points for GC traversal and include:
//! - Operand stack values and frame state
//! - The global object and core types
//! - Pinned handles held by the host
//! - The pending exception and last result

use crate::value::{ObjRef, Value};
use rustc_hash::FxHashMap;

/// Handle returned by [`RootSet::pin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinHandle(u64);

/// Root set for garbage collection
#[derive(Debug, Default)]
pub struct RootSet {
    /// Roots gathered from interpreter state before a collection
    stack_roots: Vec<ObjRef>,

    /// Long-lived roots pinned by the host
    pinned: FxHashMap<PinHandle, Value>,

    next_pin: u64,
}

impl RootSet {
    /// Create an empty root set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transient root
    pub fn add_stack_root(&mut self, value: &Value) {
        if let Some(obj) = value.as_object() {
            self.stack_roots.push(obj);
        }
    }

    /// Add a transient root by handle
    pub fn add_object(&mut self, obj: ObjRef) {
        self.stack_roots.push(obj);
    }

    /// Clear transient roots
    pub fn clear_stack_roots(&mut self) {
        self.stack_roots.clear();
    }

    /// Keep `value` alive until unpinned
    pub fn pin(&mut self, value: Value) -> PinHandle {
        self.next_pin += 1;
        let handle = PinHandle(self.next_pin);
        self.pinned.insert(handle, value);
        handle
    }

    /// Release a pinned value
    pub fn unpin(&mut self, handle: PinHandle) -> Option<Value> {
        self.pinned.remove(&handle)
    }

    /// Pinned value
    pub fn pinned(&self, handle: PinHandle) -> Option<&Value> {
        self.pinned.get(&handle)
    }

    /// Iterate over all roots
    pub fn iter(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.stack_roots
            .iter()
            .copied()
            .chain(self.pinned.values().filter_map(Value::as_object))
    }

    /// Get total number of roots
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
