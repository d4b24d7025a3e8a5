//! Helpers for arrays
//!
//! Slot numbers address elements; named properties live in a side store.
//! `length` is computed from the element vector and writing it truncates
//! or extends the array.

use super::pot::{self, obj_ref};
use crate::defaults::MAX_ARRAY_LENGTH;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::{ArrayObj, HeapObject, ObjKind, QualifiedName};
use crate::value::{ObjRef, Value};

fn elements<'a>(interp: &'a Interpreter, value: &Value) -> VmResult<&'a Vec<Value>> {
    let obj = obj_ref(interp, value)?;
    interp
        .gc
        .heap
        .get(obj)?
        .as_array()
        .map(|a| &a.elements)
        .ok_or_else(|| VmError::internal("Array helpers applied to a non-array"))
}

fn elements_mut<'a>(interp: &'a mut Interpreter, value: &Value) -> VmResult<&'a mut Vec<Value>> {
    let obj = obj_ref(interp, value)?;
    interp
        .gc
        .heap
        .get_mut(obj)?
        .as_array_mut()
        .map(|a| &mut a.elements)
        .ok_or_else(|| VmError::internal("Array helpers applied to a non-array"))
}

fn check_length(length: usize) -> VmResult<()> {
    if length > MAX_ARRAY_LENGTH {
        return Err(VmError::raise(
            ErrorKind::ResourceError,
            format!("Array length {} exceeds the limit of {}", length, MAX_ARRAY_LENGTH),
        ));
    }
    Ok(())
}

fn element_index(name: &QualifiedName) -> Option<usize> {
    let text = name.name.as_str();
    if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
        return None;
    }
    text.parse().ok()
}

pub(super) fn create(interp: &mut Interpreter, ty: ObjRef, extra: usize) -> VmResult<Value> {
    check_length(extra)?;
    let array = ArrayObj {
        elements: Vec::with_capacity(extra),
        ..ArrayObj::default()
    };
    let obj = interp.alloc(HeapObject::new(ty, true, ObjKind::Array(array)))?;
    Ok(Value::Object(obj))
}

pub(super) fn delete_property(interp: &mut Interpreter, value: &Value, slot: usize) -> VmResult<()> {
    if let Some(element) = elements_mut(interp, value)?.get_mut(slot) {
        *element = Value::Undefined;
    }
    Ok(())
}

pub(super) fn get_property(interp: &mut Interpreter, value: &Value, slot: usize) -> VmResult<Value> {
    Ok(elements(interp, value)?.get(slot).cloned().unwrap_or_default())
}

pub(super) fn set_property(interp: &mut Interpreter, value: &Value, slot: usize, new: Value) -> VmResult<()> {
    check_length(slot + 1)?;
    let elements = elements_mut(interp, value)?;
    if slot >= elements.len() {
        elements.resize(slot + 1, Value::Undefined);
    }
    elements[slot] = new;
    Ok(())
}

pub(super) fn get_property_count(interp: &Interpreter, value: &Value) -> VmResult<usize> {
    Ok(elements(interp, value)?.len())
}

pub(super) fn get_property_name(interp: &Interpreter, value: &Value, slot: usize) -> VmResult<Option<QualifiedName>> {
    if slot >= elements(interp, value)?.len() {
        return Ok(None);
    }
    Ok(Some(QualifiedName::new(
        interp.names.empty.clone(),
        interp.intern(&slot.to_string()),
    )))
}

pub(super) fn get_property_by_name(interp: &mut Interpreter, value: &Value, name: &QualifiedName) -> VmResult<Value> {
    if name.name == interp.names.length {
        return Ok(Value::Number(elements(interp, value)?.len() as f64));
    }
    if let Some(index) = element_index(name) {
        return get_property(interp, value, index);
    }
    pot::get_property_by_name(interp, value, name)
}

pub(super) fn set_property_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
    new: Value,
) -> VmResult<()> {
    if name.name == interp.names.length {
        let length = match new {
            Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            _ => return Err(VmError::argument_error("Array length must be a non-negative integer")),
        };
        check_length(length)?;
        elements_mut(interp, value)?.resize(length, Value::Undefined);
        return Ok(());
    }
    if let Some(index) = element_index(name) {
        return set_property(interp, value, index, new);
    }
    pot::set_property_by_name(interp, value, name, new)
}
