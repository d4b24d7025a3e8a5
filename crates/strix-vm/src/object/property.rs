//! Slot vector plus namespace-qualified hash index
//!
//! Every object, block, activation record and type keeps its properties in a
//! [`PropertyStore`]. Slots are addressed by stable indices; deleting a
//! property marks its slot rather than compacting the vector, so bytecode
//! compiled against fixed slot numbers stays valid.
//!
//! Stores with fewer than [`HASH_MIN_PROP`] properties are searched
//! linearly. Larger stores keep a chained hash keyed on the property name
//! (not the namespace), so wildcard lookups use the same buckets as
//! qualified ones. A lookup that walks a chain longer than
//! [`MAX_COLLISIONS`] flags the store, and the next mutation rebuilds the
//! index with the next table size.

use crate::defaults::{round_slots, HASH_MIN_PROP, HASH_SIZES, MAX_COLLISIONS, MAX_TRAITS};
use crate::error::PropertyError;
use crate::intern::IStr;
use crate::object::attributes::Attributes;
use crate::object::name::QualifiedName;
use crate::value::{ObjRef, Value};
use std::cell::Cell;

/// Declared type and attribute bits of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trait {
    /// Declared type, `None` for untyped
    pub ty: Option<ObjRef>,
    /// Attribute bits
    pub attributes: Attributes,
}

impl Trait {
    /// Create a trait
    pub fn new(ty: Option<ObjRef>, attributes: Attributes) -> Self {
        Self { ty, attributes }
    }
}

/// One property record
#[derive(Debug, Clone, Default)]
pub struct Slot {
    /// Property name, `None` for unnamed or deleted slots
    pub name: Option<QualifiedName>,
    /// Declared type and attributes
    pub traits: Trait,
    /// Current value
    pub value: Value,
    chain: Option<u32>,
}

impl Slot {
    /// True when the slot has been deleted
    pub fn is_deleted(&self) -> bool {
        self.traits.attributes.contains(Attributes::DELETED)
    }
}

/// Storage layout of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Fixed capacity; growing fails with `ImmutableLayout`
    Sealed,
    /// Growable
    Separate,
}

/// Where `define` should place a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotHint {
    /// Redefine an existing name in place, else append after the last slot
    Next,
    /// Use exactly this slot
    At(usize),
}

#[derive(Debug, Clone)]
struct HashIndex {
    buckets: Vec<Option<u32>>,
    size_class: usize,
}

/// Slot vector with an optional name index
#[derive(Debug, Clone)]
pub struct PropertyStore {
    slots: Vec<Slot>,
    capacity: usize,
    layout: Layout,
    hash: Option<HashIndex>,
    rehash_pending: Cell<bool>,
}

impl PropertyStore {
    /// Create an empty growable store
    pub fn new() -> Self {
        Self::with_capacity(Layout::Separate, 0)
    }

    /// Create an empty store with room for `capacity` slots
    pub fn with_capacity(layout: Layout, capacity: usize) -> Self {
        let capacity = match layout {
            Layout::Sealed => capacity,
            Layout::Separate if capacity == 0 => 0,
            Layout::Separate => round_slots(capacity),
        };
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            layout,
            hash: None,
            rehash_pending: Cell::new(false),
        }
    }

    /// Copy this store's slots into a new store with `extra` free slots
    pub fn clone_as(&self, layout: Layout, extra: usize) -> Self {
        let wanted = self.slots.len() + extra;
        let capacity = match layout {
            Layout::Sealed => wanted,
            Layout::Separate => round_slots(wanted),
        };
        let mut copy = Self {
            slots: self.slots.clone(),
            capacity,
            layout,
            hash: None,
            rehash_pending: Cell::new(false),
        };
        copy.reindex();
        copy
    }

    /// Number of slots in use, deleted ones included
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slot is in use
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Allocated slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Storage layout
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// True when the store keeps a hash index
    pub fn is_hashed(&self) -> bool {
        self.hash.is_some()
    }

    /// Number of hash buckets, 0 without an index
    pub fn hash_size(&self) -> usize {
        self.hash.as_ref().map_or(0, |h| h.buckets.len())
    }

    /// Switch between sealed and growable storage
    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    /// Define a property and return its slot
    pub fn define(
        &mut self,
        name: QualifiedName,
        ty: Option<ObjRef>,
        attributes: Attributes,
        value: Value,
        hint: SlotHint,
    ) -> Result<usize, PropertyError> {
        self.apply_pending_rehash();
        let existing = self.find_exact(&name);
        let slot = match (hint, existing) {
            (SlotHint::At(slot), Some(found)) if found != slot => {
                return Err(PropertyError::DuplicateName(name.to_string()));
            }
            (SlotHint::At(slot), _) => slot,
            (SlotHint::Next, Some(found)) => found,
            (SlotHint::Next, None) => self.slots.len(),
        };
        if slot >= MAX_TRAITS {
            return Err(PropertyError::SlotExhausted(slot));
        }
        if let Some(found) = existing {
            if self.slots[found].traits.attributes.contains(Attributes::FIXED) {
                return Err(PropertyError::ReadOnlyProperty(name.to_string()));
            }
        }
        if slot >= self.capacity {
            self.grow(slot + 1)?;
        }
        if slot >= self.slots.len() {
            self.slots.resize_with(slot + 1, Slot::default);
        }

        if existing != Some(slot) {
            self.unlink(slot);
            self.slots[slot].name = Some(name);
        }
        let mut attributes = attributes & !Attributes::DELETED;
        if attributes.intersects(Attributes::READONLY | Attributes::FIXED) && !value.is_undefined() {
            attributes.insert(Attributes::INITIALIZED);
        }
        let entry = &mut self.slots[slot];
        entry.traits = Trait::new(ty, attributes);
        entry.value = value;

        if existing != Some(slot) && !self.ensure_index() {
            self.link(slot);
        }
        Ok(slot)
    }

    /// Find the slot holding `name`. A wildcard namespace matches any
    /// namespace; among several matches the lowest slot wins.
    pub fn lookup(&self, name: &QualifiedName) -> Option<usize> {
        self.lookup_preferring(name, &[])
    }

    /// Like [`Self::lookup`], but a wildcard match in a namespace that
    /// appears earlier in `preferred` beats a lower slot.
    pub fn lookup_preferring(&self, name: &QualifiedName, preferred: &[IStr]) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        let mut consider = |slot: usize, space: &IStr| {
            let rank = if name.is_wildcard() {
                preferred.iter().position(|p| p == space).unwrap_or(preferred.len())
            } else {
                0
            };
            let better = match best {
                None => true,
                Some((best_rank, best_slot)) => rank < best_rank || (rank == best_rank && slot < best_slot),
            };
            if better {
                best = Some((rank, slot));
            }
        };

        match &self.hash {
            Some(index) => {
                let mut cursor = index.buckets[bucket_of(&name.name, index.buckets.len())];
                let mut walked = 0;
                while let Some(slot) = cursor {
                    let slot = slot as usize;
                    if let Some(defined) = &self.slots[slot].name {
                        if name.matches(defined) {
                            consider(slot, &defined.space);
                        }
                    }
                    walked += 1;
                    cursor = self.slots[slot].chain;
                }
                if walked > MAX_COLLISIONS {
                    self.rehash_pending.set(true);
                }
            }
            None => {
                for (slot, entry) in self.slots.iter().enumerate() {
                    if let Some(defined) = &entry.name {
                        if name.matches(defined) {
                            consider(slot, &defined.space);
                        }
                    }
                }
            }
        }
        best.map(|(_, slot)| slot)
    }

    /// Value in `slot`
    pub fn get(&self, slot: usize) -> Result<&Value, PropertyError> {
        self.slots.get(slot).map(|s| &s.value).ok_or(PropertyError::OutOfBounds(slot))
    }

    /// Store `value` in `slot`. A readonly or fixed slot accepts exactly one
    /// write, its initializer.
    pub fn set(&mut self, slot: usize, value: Value) -> Result<(), PropertyError> {
        let entry = self.slots.get_mut(slot).ok_or(PropertyError::OutOfBounds(slot))?;
        let attributes = &mut entry.traits.attributes;
        if attributes.intersects(Attributes::READONLY | Attributes::FIXED) {
            if attributes.contains(Attributes::INITIALIZED) {
                let name = entry.name.as_ref().map_or_else(|| format!("#{}", slot), |n| n.to_string());
                return Err(PropertyError::ReadOnlyProperty(name));
            }
            attributes.insert(Attributes::INITIALIZED);
        }
        entry.value = value;
        Ok(())
    }

    /// Store `value` in `slot`, growing the store if needed
    pub fn set_growing(&mut self, slot: usize, value: Value) -> Result<(), PropertyError> {
        if slot >= MAX_TRAITS {
            return Err(PropertyError::SlotExhausted(slot));
        }
        if slot >= self.slots.len() {
            if slot >= self.capacity {
                self.grow(slot + 1)?;
            }
            self.slots.resize_with(slot + 1, Slot::default);
        }
        self.set(slot, value)
    }

    /// Store a value bypassing readonly checks. Used when copying templates.
    pub(crate) fn init_value(&mut self, slot: usize, value: Value) -> Result<(), PropertyError> {
        let entry = self.slots.get_mut(slot).ok_or(PropertyError::OutOfBounds(slot))?;
        entry.value = value;
        Ok(())
    }

    /// Full slot record
    pub fn slot(&self, slot: usize) -> Result<&Slot, PropertyError> {
        self.slots.get(slot).ok_or(PropertyError::OutOfBounds(slot))
    }

    /// Name of `slot`
    pub fn name(&self, slot: usize) -> Result<Option<&QualifiedName>, PropertyError> {
        Ok(self.slot(slot)?.name.as_ref())
    }

    /// Rename `slot`. Naming a deleted slot revives it.
    pub fn set_name(&mut self, slot: usize, name: QualifiedName) -> Result<(), PropertyError> {
        self.apply_pending_rehash();
        if slot >= self.slots.len() {
            return Err(PropertyError::OutOfBounds(slot));
        }
        if let Some(found) = self.find_exact(&name) {
            if found != slot {
                return Err(PropertyError::DuplicateName(name.to_string()));
            }
            return Ok(());
        }
        self.unlink(slot);
        let entry = &mut self.slots[slot];
        entry.name = Some(name);
        entry.traits.attributes.remove(Attributes::DELETED);
        if !self.ensure_index() {
            self.link(slot);
        }
        Ok(())
    }

    /// Declared type and attributes of `slot`
    pub fn traits(&self, slot: usize) -> Result<Trait, PropertyError> {
        Ok(self.slot(slot)?.traits)
    }

    /// Replace the declared type and attributes of `slot`. Making a slot
    /// readonly after it holds a value counts as its initialization.
    pub fn set_traits(&mut self, slot: usize, ty: Option<ObjRef>, attributes: Attributes) -> Result<(), PropertyError> {
        let entry = self.slots.get_mut(slot).ok_or(PropertyError::OutOfBounds(slot))?;
        let mut attributes = attributes;
        if attributes.intersects(Attributes::READONLY | Attributes::FIXED) && !entry.value.is_undefined() {
            attributes.insert(Attributes::INITIALIZED);
        }
        entry.traits = Trait::new(ty, attributes);
        Ok(())
    }

    /// Delete the property in `slot`. The slot index is not reused.
    pub fn delete(&mut self, slot: usize) -> Result<(), PropertyError> {
        self.apply_pending_rehash();
        let entry = self.slots.get(slot).ok_or(PropertyError::OutOfBounds(slot))?;
        if entry.traits.attributes.contains(Attributes::FIXED) {
            let name = entry.name.as_ref().map_or_else(|| format!("#{}", slot), |n| n.to_string());
            return Err(PropertyError::ReadOnlyProperty(name));
        }
        self.unlink(slot);
        let entry = &mut self.slots[slot];
        entry.name = None;
        entry.value = Value::Undefined;
        entry.traits.attributes.insert(Attributes::DELETED);
        Ok(())
    }

    /// Ensure room for at least `min_slots` slots. Existing slots keep
    /// their indices and values.
    pub fn grow(&mut self, min_slots: usize) -> Result<(), PropertyError> {
        if min_slots <= self.capacity {
            return Ok(());
        }
        if self.layout == Layout::Sealed {
            return Err(PropertyError::ImmutableLayout);
        }
        if min_slots > MAX_TRAITS {
            return Err(PropertyError::SlotExhausted(min_slots));
        }
        self.capacity = round_slots(min_slots).min(MAX_TRAITS);
        self.slots.reserve(self.capacity.saturating_sub(self.slots.len()));
        if self.hash.is_some() {
            self.reindex();
        }
        Ok(())
    }

    /// Live slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots.iter().enumerate().filter(|(_, s)| !s.is_deleted())
    }

    /// Every value and declared type held by the store
    pub fn references(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.slots
            .iter()
            .flat_map(|s| s.value.as_object().into_iter().chain(s.traits.ty))
    }

    fn find_exact(&self, name: &QualifiedName) -> Option<usize> {
        match &self.hash {
            Some(index) => {
                let mut cursor = index.buckets[bucket_of(&name.name, index.buckets.len())];
                while let Some(slot) = cursor {
                    let slot = slot as usize;
                    if self.slots[slot].name.as_ref() == Some(name) {
                        return Some(slot);
                    }
                    cursor = self.slots[slot].chain;
                }
                None
            }
            None => self.slots.iter().position(|s| s.name.as_ref() == Some(name)),
        }
    }

    fn apply_pending_rehash(&mut self) {
        if self.rehash_pending.replace(false) {
            if let Some(index) = &mut self.hash {
                index.size_class = (index.size_class + 1).min(HASH_SIZES.len() - 1);
            }
            self.reindex();
        }
    }

    /// Build the index once the store is large enough. Returns true when
    /// the index was rebuilt, which links every named slot.
    fn ensure_index(&mut self) -> bool {
        if self.hash.is_none() && self.slots.len() >= HASH_MIN_PROP {
            self.reindex();
            return true;
        }
        false
    }

    /// Rebuild the hash index from scratch
    fn reindex(&mut self) {
        if self.slots.len() < HASH_MIN_PROP && self.hash.is_none() {
            return;
        }
        let wanted = HASH_SIZES
            .iter()
            .position(|size| *size > self.capacity.max(self.slots.len()))
            .unwrap_or(HASH_SIZES.len() - 1);
        let size_class = self.hash.as_ref().map_or(wanted, |h| h.size_class.max(wanted));
        self.hash = Some(HashIndex {
            buckets: vec![None; HASH_SIZES[size_class]],
            size_class,
        });
        for slot in 0..self.slots.len() {
            self.slots[slot].chain = None;
            if self.slots[slot].name.is_some() {
                self.link(slot);
            }
        }
    }

    fn link(&mut self, slot: usize) {
        let Some(index) = &mut self.hash else { return };
        let Some(name) = &self.slots[slot].name else { return };
        let bucket = bucket_of(&name.name, index.buckets.len());
        self.slots[slot].chain = index.buckets[bucket];
        index.buckets[bucket] = Some(slot as u32);
    }

    fn unlink(&mut self, slot: usize) {
        let Some(index) = &mut self.hash else { return };
        let Some(name) = &self.slots[slot].name else { return };
        let bucket = bucket_of(&name.name, index.buckets.len());
        let next = self.slots[slot].chain.take();
        if index.buckets[bucket] == Some(slot as u32) {
            index.buckets[bucket] = next;
            return;
        }
        let mut cursor = index.buckets[bucket];
        while let Some(current) = cursor {
            let current = current as usize;
            if self.slots[current].chain == Some(slot as u32) {
                self.slots[current].chain = next;
                return;
            }
            cursor = self.slots[current].chain;
        }
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket_of(name: &IStr, buckets: usize) -> usize {
    (name.hash_code() % buckets as u64) as usize
}
