//! Helpers for property-store-backed objects
//!
//! Reads by name look in the object's own store first, then walk the
//! prototype templates of its type and base types. Accessor slots run
//! their getter or setter with the object as `this`.

use super::value::convert_primitive;
use crate::defaults::MAX_BASE_CLASSES;
use crate::error::{PropertyError, VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::{Attributes, HeapObject, Layout, ObjKind, QualifiedName, SlotHint, Trait};
use crate::value::{ObjRef, Value};
use rustc_hash::FxHashMap;

/// Heap handle of an object value
pub(crate) fn obj_ref(interp: &Interpreter, value: &Value) -> VmResult<ObjRef> {
    value.as_object().ok_or_else(|| {
        VmError::type_error(format!("Expected an object, got {}", interp.type_name_of(value)))
    })
}

/// `ty` followed by its base types, nearest first
pub(crate) fn type_chain(interp: &Interpreter, ty: ObjRef) -> VmResult<Vec<ObjRef>> {
    let mut chain = Vec::new();
    let mut cursor = Some(ty);
    while let Some(current) = cursor {
        if chain.len() >= MAX_BASE_CLASSES {
            return Err(VmError::internal("Inheritance chain is too deep"));
        }
        chain.push(current);
        cursor = interp.type_obj(current)?.base;
    }
    Ok(chain)
}

/// Find `name` in the prototype templates of `ty` and its bases
pub(crate) fn prototype_slot(
    interp: &Interpreter,
    ty: ObjRef,
    name: &QualifiedName,
) -> VmResult<Option<(Value, Attributes)>> {
    for current in type_chain(interp, ty)? {
        let prototype = &interp.type_obj(current)?.prototype;
        if let Some(slot) = prototype.lookup(name) {
            let entry = prototype.slot(slot)?;
            return Ok(Some((entry.value.clone(), entry.traits.attributes)));
        }
    }
    Ok(None)
}

/// Read `name` through the prototype chain of `ty`, running getters
pub(crate) fn prototype_get(
    interp: &mut Interpreter,
    this: &Value,
    ty: ObjRef,
    name: &QualifiedName,
) -> VmResult<Option<Value>> {
    match prototype_slot(interp, ty, name)? {
        Some((value, attributes)) => Ok(Some(accessor_read(interp, this, value, attributes)?)),
        None => Ok(None),
    }
}

/// Value a slot read produces: the getter's result for accessor slots
pub(crate) fn accessor_read(
    interp: &mut Interpreter,
    this: &Value,
    value: Value,
    attributes: Attributes,
) -> VmResult<Value> {
    if attributes.contains(Attributes::GETTER) {
        return interp.call_function(&value, this.clone(), &[]);
    }
    if attributes.contains(Attributes::SETTER) {
        return Ok(Value::Undefined);
    }
    Ok(value)
}

/// Setter to run for a write to an accessor slot
fn accessor_setter(interp: &Interpreter, current: &Value, attributes: Attributes) -> VmResult<Option<Value>> {
    if attributes.contains(Attributes::SETTER) {
        return Ok(Some(current.clone()));
    }
    if attributes.contains(Attributes::GETTER) {
        if let Some(getter) = current.as_object() {
            let setter = interp.gc.heap.get(getter)?.as_function().and_then(|f| f.setter);
            return Ok(setter.map(Value::Object));
        }
    }
    Ok(None)
}

/// Write through an accessor slot. `Ok(false)` when the slot is a plain
/// data slot.
pub(crate) fn accessor_write(
    interp: &mut Interpreter,
    this: &Value,
    name: &QualifiedName,
    current: &Value,
    attributes: Attributes,
    value: Value,
) -> VmResult<bool> {
    if !attributes.intersects(Attributes::GETTER | Attributes::SETTER) {
        return Ok(false);
    }
    match accessor_setter(interp, current, attributes)? {
        Some(setter) => {
            interp.call_function(&setter, this.clone(), &[value])?;
            Ok(true)
        }
        None => Err(VmError::reference_error(format!("Property \"{}\" has no setter", name))),
    }
}

pub(super) fn create(interp: &mut Interpreter, ty: ObjRef, extra: usize) -> VmResult<Value> {
    let (template, dynamic) = {
        let t = interp.type_obj(ty)?;
        if t.needs_fixup {
            return Err(VmError::internal(format!("Type {} is used before its base is resolved", t.qname)));
        }
        if t.is_interface() {
            return Err(VmError::type_error(format!("Cannot instantiate interface {}", t.qname)));
        }
        let dynamic = t.has_dynamic_instances();
        let layout = if dynamic { Layout::Separate } else { Layout::Sealed };
        (t.instance.clone_as(layout, extra), dynamic)
    };
    let obj = interp.alloc(HeapObject::new(ty, dynamic, ObjKind::Object(template)))?;
    Ok(Value::Object(obj))
}

pub(super) fn cast(interp: &mut Interpreter, value: &Value, target: ObjRef) -> VmResult<Value> {
    match convert_primitive(interp, value, target)? {
        Some(converted) => Ok(converted),
        None => Err(VmError::type_error(format!(
            "Cannot cast {} to {}",
            interp.type_name_of(value),
            interp.type_display_name(target)
        ))),
    }
}

pub(super) fn clone(interp: &mut Interpreter, value: &Value, deep: bool) -> VmResult<Value> {
    let obj = obj_ref(interp, value)?;
    let mut copies = FxHashMap::default();
    clone_object(interp, obj, deep, &mut copies).map(Value::Object)
}

enum Child {
    Slot(usize),
    Element(usize),
}

fn clone_object(
    interp: &mut Interpreter,
    obj: ObjRef,
    deep: bool,
    copies: &mut FxHashMap<ObjRef, ObjRef>,
) -> VmResult<ObjRef> {
    if let Some(copy) = copies.get(&obj) {
        return Ok(*copy);
    }
    let original = interp.gc.heap.get(obj)?.clone();
    let copy = interp.alloc(original)?;
    copies.insert(obj, copy);
    if !deep {
        return Ok(copy);
    }

    // Only plain objects and arrays are copied; functions and types are shared
    let children: Vec<(Child, ObjRef)> = {
        let object = interp.gc.heap.get(copy)?;
        let mut children: Vec<(Child, ObjRef)> = object
            .store()
            .iter()
            .filter_map(|(slot, entry)| entry.value.as_object().map(|r| (Child::Slot(slot), r)))
            .collect();
        if let Some(array) = object.as_array() {
            children.extend(
                array
                    .elements
                    .iter()
                    .enumerate()
                    .filter_map(|(i, v)| v.as_object().map(|r| (Child::Element(i), r))),
            );
        }
        children
    };
    for (position, child) in children {
        let copyable = matches!(interp.gc.heap.get(child)?.kind, ObjKind::Object(_) | ObjKind::Array(_));
        if !copyable {
            continue;
        }
        let child_copy = clone_object(interp, child, true, copies)?;
        let object = interp.gc.heap.get_mut(copy)?;
        match position {
            Child::Slot(slot) => object.store_mut().init_value(slot, Value::Object(child_copy))?,
            Child::Element(index) => {
                if let Some(array) = object.as_array_mut() {
                    array.elements[index] = Value::Object(child_copy);
                }
            }
        }
    }
    Ok(copy)
}

pub(super) fn define_property(
    interp: &mut Interpreter,
    value: &Value,
    hint: SlotHint,
    name: QualifiedName,
    ty: Option<ObjRef>,
    attributes: Attributes,
    initial: Value,
) -> VmResult<usize> {
    let obj = obj_ref(interp, value)?;
    let slot = interp
        .gc
        .heap
        .get_mut(obj)?
        .store_mut()
        .define(name, ty, attributes, initial, hint)?;
    Ok(slot)
}

pub(super) fn delete_property(interp: &mut Interpreter, value: &Value, slot: usize) -> VmResult<()> {
    let obj = obj_ref(interp, value)?;
    interp.gc.heap.get_mut(obj)?.store_mut().delete(slot)?;
    Ok(())
}

pub(super) fn delete_property_by_name(interp: &mut Interpreter, value: &Value, name: &QualifiedName) -> VmResult<bool> {
    let obj = obj_ref(interp, value)?;
    let store = interp.gc.heap.get_mut(obj)?.store_mut();
    match store.lookup(name) {
        Some(slot) => {
            store.delete(slot)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub(super) fn get_property(interp: &mut Interpreter, value: &Value, slot: usize) -> VmResult<Value> {
    let obj = obj_ref(interp, value)?;
    Ok(interp.gc.heap.get(obj)?.store().get(slot)?.clone())
}

pub(super) fn get_property_by_name(interp: &mut Interpreter, value: &Value, name: &QualifiedName) -> VmResult<Value> {
    let obj = obj_ref(interp, value)?;
    let own = {
        let store = interp.gc.heap.get(obj)?.store();
        match store.lookup(name) {
            Some(slot) => {
                let entry = store.slot(slot)?;
                Some((entry.value.clone(), entry.traits.attributes))
            }
            None => None,
        }
    };
    if let Some((current, attributes)) = own {
        return accessor_read(interp, value, current, attributes);
    }
    let ty = interp.type_of(value);
    Ok(prototype_get(interp, value, ty, name)?.unwrap_or_default())
}

pub(super) fn get_property_count(interp: &Interpreter, value: &Value) -> VmResult<usize> {
    let obj = obj_ref(interp, value)?;
    Ok(interp.gc.heap.get(obj)?.store().len())
}

pub(super) fn get_property_name(interp: &Interpreter, value: &Value, slot: usize) -> VmResult<Option<QualifiedName>> {
    let obj = obj_ref(interp, value)?;
    let entry = interp.gc.heap.get(obj)?.store().slot(slot)?;
    if entry.is_deleted() || entry.traits.attributes.contains(Attributes::HIDDEN) {
        return Ok(None);
    }
    Ok(entry.name.clone())
}

pub(super) fn get_property_traits(interp: &Interpreter, value: &Value, slot: usize) -> VmResult<Trait> {
    let obj = obj_ref(interp, value)?;
    Ok(interp.gc.heap.get(obj)?.store().traits(slot)?)
}

pub(super) fn lookup_property(interp: &Interpreter, value: &Value, name: &QualifiedName) -> VmResult<Option<usize>> {
    let obj = obj_ref(interp, value)?;
    Ok(interp.gc.heap.get(obj)?.store().lookup(name))
}

pub(super) fn set_property(interp: &mut Interpreter, value: &Value, slot: usize, new: Value) -> VmResult<()> {
    let obj = obj_ref(interp, value)?;
    let object = interp.gc.heap.get_mut(obj)?;
    let dynamic = object.header.dynamic;
    let store = object.store_mut();
    if slot >= store.len() && dynamic {
        store.set_growing(slot, new)?;
    } else {
        store.set(slot, new)?;
    }
    Ok(())
}

pub(super) fn set_property_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
    new: Value,
) -> VmResult<()> {
    let obj = obj_ref(interp, value)?;
    let own = {
        let store = interp.gc.heap.get(obj)?.store();
        match store.lookup(name) {
            Some(slot) => {
                let entry = store.slot(slot)?;
                Some((slot, entry.value.clone(), entry.traits.attributes))
            }
            None => None,
        }
    };

    match own {
        Some((slot, current, attributes)) => {
            if accessor_write(interp, value, name, &current, attributes, new.clone())? {
                return Ok(());
            }
            interp.gc.heap.get_mut(obj)?.store_mut().set(slot, new)?;
            Ok(())
        }
        None => {
            let ty = interp.type_of(value);
            if let Some((current, attributes)) = prototype_slot(interp, ty, name)? {
                if accessor_write(interp, value, name, &current, attributes, new.clone())? {
                    return Ok(());
                }
            }
            let object = interp.gc.heap.get_mut(obj)?;
            if !object.header.dynamic {
                return Err(PropertyError::ImmutableLayout.into());
            }
            object
                .store_mut()
                .define(name.clone(), None, Attributes::ENUMERABLE, new, SlotHint::Next)?;
            Ok(())
        }
    }
}

pub(super) fn set_property_name(interp: &mut Interpreter, value: &Value, slot: usize, name: QualifiedName) -> VmResult<()> {
    let obj = obj_ref(interp, value)?;
    interp.gc.heap.get_mut(obj)?.store_mut().set_name(slot, name)?;
    Ok(())
}

pub(super) fn set_property_traits(
    interp: &mut Interpreter,
    value: &Value,
    slot: usize,
    ty: Option<ObjRef>,
    attributes: Attributes,
) -> VmResult<()> {
    let obj = obj_ref(interp, value)?;
    interp.gc.heap.get_mut(obj)?.store_mut().set_traits(slot, ty, attributes)?;
    Ok(())
}
