//! Helpers for scope blocks and type objects
//!
//! Block lookups prefer the namespaces opened in the block. Type objects
//! resolve statics through their base chain, so a static defined on a base
//! is visible through every derived type.

use super::pot::{accessor_read, accessor_write, obj_ref, prototype_get, type_chain};
use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::intern::IStr;
use crate::object::{Attributes, QualifiedName, SlotHint};
use crate::value::{ObjRef, Value};

pub(super) fn create(interp: &mut Interpreter, ty: ObjRef, _extra: usize) -> VmResult<Value> {
    Err(VmError::type_error(format!(
        "Cannot create instances of {}",
        interp.type_display_name(ty)
    )))
}

/// Open namespaces, most recent first
fn preferences(interp: &Interpreter, obj: ObjRef) -> VmResult<Vec<IStr>> {
    Ok(interp.gc.heap.get(obj)?.namespaces().iter().rev().cloned().collect())
}

pub(super) fn lookup_property(interp: &Interpreter, value: &Value, name: &QualifiedName) -> VmResult<Option<usize>> {
    let obj = obj_ref(interp, value)?;
    let preferred = preferences(interp, obj)?;
    Ok(interp.gc.heap.get(obj)?.store().lookup_preferring(name, &preferred))
}

/// Slot, value and attributes of `name` in the block's own store
fn own_entry(
    interp: &Interpreter,
    value: &Value,
    name: &QualifiedName,
) -> VmResult<Option<(usize, Value, Attributes)>> {
    let obj = obj_ref(interp, value)?;
    match lookup_property(interp, value, name)? {
        Some(slot) => {
            let entry = interp.gc.heap.get(obj)?.store().slot(slot)?;
            Ok(Some((slot, entry.value.clone(), entry.traits.attributes)))
        }
        None => Ok(None),
    }
}

pub(super) fn get_property_by_name(interp: &mut Interpreter, value: &Value, name: &QualifiedName) -> VmResult<Value> {
    match own_entry(interp, value, name)? {
        Some((_, current, attributes)) => accessor_read(interp, value, current, attributes),
        None => Ok(Value::Undefined),
    }
}

pub(super) fn set_property_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
    new: Value,
) -> VmResult<()> {
    let obj = obj_ref(interp, value)?;
    match own_entry(interp, value, name)? {
        Some((slot, current, attributes)) => {
            if !accessor_write(interp, value, name, &current, attributes, new.clone())? {
                interp.gc.heap.get_mut(obj)?.store_mut().set(slot, new)?;
            }
        }
        None => {
            interp
                .gc
                .heap
                .get_mut(obj)?
                .store_mut()
                .define(name.clone(), None, Attributes::empty(), new, SlotHint::Next)?;
        }
    }
    Ok(())
}

/// Type owning the static `name`, with the slot it lives in
pub(crate) fn find_static(
    interp: &Interpreter,
    ty: ObjRef,
    name: &QualifiedName,
) -> VmResult<Option<(ObjRef, usize)>> {
    for current in type_chain(interp, ty)? {
        if let Some(slot) = interp.type_obj(current)?.statics.lookup(name) {
            return Ok(Some((current, slot)));
        }
    }
    Ok(None)
}

pub(super) fn get_static_by_name(interp: &mut Interpreter, value: &Value, name: &QualifiedName) -> VmResult<Value> {
    let obj = obj_ref(interp, value)?;
    if let Some((owner, slot)) = find_static(interp, obj, name)? {
        let entry = interp.type_obj(owner)?.statics.slot(slot)?;
        let (current, attributes) = (entry.value.clone(), entry.traits.attributes);
        return accessor_read(interp, value, current, attributes);
    }
    // Methods shared by all types live on the prototype of `Type`
    let ty = interp.type_of(value);
    Ok(prototype_get(interp, value, ty, name)?.unwrap_or_default())
}

pub(super) fn set_static_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
    new: Value,
) -> VmResult<()> {
    let obj = obj_ref(interp, value)?;
    match find_static(interp, obj, name)? {
        Some((owner, slot)) => {
            let entry = interp.type_obj(owner)?.statics.slot(slot)?;
            let (current, attributes) = (entry.value.clone(), entry.traits.attributes);
            if !accessor_write(interp, value, name, &current, attributes, new.clone())? {
                interp.type_obj_mut(owner)?.statics.set(slot, new)?;
            }
        }
        None => {
            interp.type_obj_mut(obj)?.statics.define(
                name.clone(),
                None,
                Attributes::STATIC,
                new,
                SlotHint::Next,
            )?;
        }
    }
    Ok(())
}
