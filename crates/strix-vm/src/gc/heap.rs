//! Object arena
//!
//! Objects live in a vector of cells addressed by [`ObjRef`] index. Freed
//! cells go on a free list and are handed out again, most recently freed
//! first.

use crate::defaults::EMERGENCY_RESERVE;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::object::HeapObject;
use crate::value::ObjRef;

/// Arena of heap objects
#[derive(Debug, Default)]
pub struct Heap {
    cells: Vec<Option<HeapObject>>,
    free: Vec<u32>,
    live: usize,
    allocated_since_gc: usize,
    quota: usize,
    max_objects: Option<usize>,
    requested: bool,
}

impl Heap {
    /// Create a heap that requests a collection every `quota` allocations
    pub fn new(quota: usize, max_objects: Option<usize>) -> Self {
        Self {
            quota: quota.max(1),
            max_objects,
            ..Self::default()
        }
    }

    /// Allocate an object
    ///
    /// Fails with `OutOfMemoryError` once the object ceiling is reached.
    pub fn allocate(&mut self, object: HeapObject) -> VmResult<ObjRef> {
        if let Some(max) = self.max_objects {
            if self.live >= max {
                self.requested = true;
                return Err(VmError::raise(
                    ErrorKind::OutOfMemoryError,
                    format!("Heap limit of {} objects reached", max),
                ));
            }
        }
        Ok(self.place(object))
    }

    /// Allocate from the emergency reserve above the object ceiling
    pub fn allocate_reserve(&mut self, object: HeapObject) -> Option<ObjRef> {
        if let Some(max) = self.max_objects {
            if self.live >= max + EMERGENCY_RESERVE {
                return None;
            }
        }
        Some(self.place(object))
    }

    fn place(&mut self, object: HeapObject) -> ObjRef {
        self.live += 1;
        self.allocated_since_gc += 1;
        if self.allocated_since_gc >= self.quota {
            self.requested = true;
        }
        match self.free.pop() {
            Some(index) => {
                self.cells[index as usize] = Some(object);
                ObjRef::from_index(index as usize)
            }
            None => {
                self.cells.push(Some(object));
                ObjRef::from_index(self.cells.len() - 1)
            }
        }
    }

    /// Object behind a handle
    pub fn get(&self, obj: ObjRef) -> VmResult<&HeapObject> {
        self.cells
            .get(obj.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| VmError::internal(format!("Dangling object reference {}", obj)))
    }

    /// Mutable object behind a handle
    pub fn get_mut(&mut self, obj: ObjRef) -> VmResult<&mut HeapObject> {
        self.cells
            .get_mut(obj.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| VmError::internal(format!("Dangling object reference {}", obj)))
    }

    /// True when the handle refers to a live object
    pub fn contains(&self, obj: ObjRef) -> bool {
        matches!(self.cells.get(obj.index()), Some(Some(_)))
    }

    /// Live object count
    pub fn live(&self) -> usize {
        self.live
    }

    /// Total cells, free ones included
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Allocations since the last collection
    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    /// True when the allocation quota has been used up
    pub fn collection_requested(&self) -> bool {
        self.requested
    }

    /// Ask for a collection at the next safe point
    pub fn request_collection(&mut self) {
        self.requested = true;
    }

    /// Change the allocation quota
    pub fn set_quota(&mut self, quota: usize) {
        self.quota = quota.max(1);
    }

    pub(crate) fn clear_marks(&mut self) {
        for object in self.cells.iter_mut().flatten() {
            object.header.visited = false;
        }
    }

    /// Mark `obj`; returns true if it was not already marked
    pub(crate) fn mark(&mut self, obj: ObjRef) -> bool {
        match self.cells.get_mut(obj.index()) {
            Some(Some(object)) if !object.header.visited => {
                object.header.visited = true;
                true
            }
            _ => false,
        }
    }

    /// Free every unmarked object; returns the number freed
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, cell) in self.cells.iter_mut().enumerate() {
            if matches!(cell, Some(object) if !object.header.visited) {
                *cell = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        self.allocated_since_gc = 0;
        self.requested = false;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjKind, PropertyStore};

    fn plain() -> HeapObject {
        HeapObject::new(ObjRef::from_index(0), true, ObjKind::Object(PropertyStore::new()))
    }

    #[test]
    fn test_allocate_and_get() {
        let mut heap = Heap::new(8, None);
        let a = heap.allocate(plain()).unwrap();
        let b = heap.allocate(plain()).unwrap();
        assert_ne!(a, b);
        assert_eq!(heap.live(), 2);
        assert!(heap.get(a).is_ok());
        assert!(heap.get(ObjRef::from_index(99)).is_err());
    }

    #[test]
    fn test_quota_requests_collection() {
        let mut heap = Heap::new(2, None);
        heap.allocate(plain()).unwrap();
        assert!(!heap.collection_requested());
        heap.allocate(plain()).unwrap();
        assert!(heap.collection_requested());
    }

    #[test]
    fn test_sweep_reuses_cells() {
        let mut heap = Heap::new(100, None);
        let keep = heap.allocate(plain()).unwrap();
        let drop = heap.allocate(plain()).unwrap();
        heap.clear_marks();
        assert!(heap.mark(keep));
        assert!(!heap.mark(keep));
        assert_eq!(heap.sweep(), 1);
        assert!(!heap.contains(drop));
        let again = heap.allocate(plain()).unwrap();
        assert_eq!(again, drop);
        assert_eq!(heap.capacity(), 2);
    }

    #[test]
    fn test_limit_and_reserve() {
        let mut heap = Heap::new(100, Some(1));
        heap.allocate(plain()).unwrap();
        let err = heap.allocate(plain()).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::OutOfMemoryError));
        for _ in 0..EMERGENCY_RESERVE {
            assert!(heap.allocate_reserve(plain()).is_some());
        }
        assert!(heap.allocate_reserve(plain()).is_none());
    }
}
