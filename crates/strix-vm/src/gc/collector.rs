//! Mark-sweep garbage collector
//!
//! Marking starts from the [`RootSet`] the interpreter gathers at a safe
//! point and follows every reference an object holds. Sweeping frees the
//! unmarked cells and prunes intern table entries no value refers to.

use super::heap::Heap;
use super::roots::RootSet;
use crate::intern::InternTable;
use std::time::{Duration, Instant};
use tracing::debug;

/// Garbage collector statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Objects alive after the last collection
    pub live_objects: usize,

    /// Interned strings dropped
    pub strings_pruned: usize,

    /// Total pause time
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

impl GcStats {
    fn update(&mut self, freed: usize, live: usize, pruned: usize, pause: Duration) {
        self.collections += 1;
        self.objects_freed += freed;
        self.live_objects = live;
        self.strings_pruned += pruned;
        self.last_pause_time = pause;
        self.total_pause_time += pause;
    }
}

/// Mark-sweep garbage collector
#[derive(Debug)]
pub struct GarbageCollector {
    /// Object arena
    pub(crate) heap: Heap,

    /// Root set
    pub(crate) roots: RootSet,

    /// Statistics
    stats: GcStats,

    /// Nesting depth of pause requests
    paused: usize,
}

impl GarbageCollector {
    /// Create a collector over a fresh heap
    pub fn new(quota: usize, max_objects: Option<usize>) -> Self {
        Self {
            heap: Heap::new(quota, max_objects),
            roots: RootSet::new(),
            stats: GcStats::default(),
            paused: 0,
        }
    }

    /// Heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Suspend automatic collection
    pub fn pause(&mut self) {
        self.paused += 1;
    }

    /// Undo one [`Self::pause`]
    pub fn resume(&mut self) {
        self.paused = self.paused.saturating_sub(1);
    }

    /// True while paused
    pub fn is_paused(&self) -> bool {
        self.paused > 0
    }

    /// True when automatic collection should run at the next safe point
    pub fn should_collect(&self) -> bool {
        self.paused == 0 && self.heap.collection_requested()
    }

    /// Run a full cycle from the current root set; returns objects freed
    pub fn collect(&mut self, strings: &InternTable) -> usize {
        let start = Instant::now();

        self.mark();
        let freed = self.heap.sweep();
        let pruned = strings.prune();
        self.roots.clear_stack_roots();

        let pause = start.elapsed();
        self.stats.update(freed, self.heap.live(), pruned, pause);
        debug!(
            freed,
            live = self.heap.live(),
            pruned,
            pause_us = pause.as_micros() as u64,
            "gc cycle complete"
        );
        freed
    }

    /// Mark phase: mark all reachable objects
    fn mark(&mut self) {
        self.heap.clear_marks();
        let mut worklist: Vec<_> = self.roots.iter().collect();
        let mut children = Vec::new();
        while let Some(obj) = worklist.pop() {
            if !self.heap.mark(obj) {
                continue;
            }
            if let Ok(object) = self.heap.get(obj) {
                object.trace(&mut children);
                worklist.append(&mut children);
            }
        }
    }

    /// Get GC statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{HeapObject, ObjKind, PropertyStore, QualifiedName, SlotHint};
    use crate::object::Attributes;
    use crate::value::{ObjRef, Value};

    fn plain(ty: ObjRef) -> HeapObject {
        HeapObject::new(ty, true, ObjKind::Object(PropertyStore::new()))
    }

    #[test]
    fn test_collect_frees_unreachable() {
        let strings = InternTable::new();
        let mut gc = GarbageCollector::new(1024, None);
        let ty = gc.heap.allocate(plain(ObjRef::from_index(0))).unwrap();
        let child = gc.heap.allocate(plain(ty)).unwrap();
        let parent = gc.heap.allocate(plain(ty)).unwrap();
        let garbage = gc.heap.allocate(plain(ty)).unwrap();

        let name = QualifiedName::new(strings.intern("public"), strings.intern("child"));
        gc.heap
            .get_mut(parent)
            .unwrap()
            .store_mut()
            .define(name, None, Attributes::empty(), Value::Object(child), SlotHint::Next)
            .unwrap();

        gc.roots.add_object(parent);
        assert_eq!(gc.collect(&strings), 1);
        assert!(gc.heap.contains(ty));
        assert!(gc.heap.contains(child));
        assert!(!gc.heap.contains(garbage));
        assert_eq!(gc.stats().collections, 1);
        assert_eq!(gc.stats().live_objects, 3);
    }

    #[test]
    fn test_pause_blocks_automatic_collection() {
        let mut gc = GarbageCollector::new(1, None);
        gc.heap.allocate(plain(ObjRef::from_index(0))).unwrap();
        assert!(gc.should_collect());
        gc.pause();
        assert!(!gc.should_collect());
        gc.resume();
        assert!(gc.should_collect());
    }
}
