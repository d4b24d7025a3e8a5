//! Helpers for primitives: booleans, numbers, strings, null and undefined
//!
//! Primitives carry no property storage. Reads by name fall through to the
//! prototype of the primitive's type, so methods bound on `Number` or
//! `String` are reachable from values.

use super::operators::{display_string, to_number};
use super::pot::prototype_get;
use crate::error::{PropertyError, VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::{Attributes, QualifiedName, SlotHint, Trait};
use crate::value::{ObjRef, Value};

pub(super) fn create(interp: &mut Interpreter, ty: ObjRef, _extra: usize) -> VmResult<Value> {
    let core = interp.core;
    Ok(if ty == core.boolean {
        Value::Boolean(false)
    } else if ty == core.number {
        Value::Number(0.0)
    } else if ty == core.string {
        Value::String(interp.names.empty.clone())
    } else if ty == core.null {
        Value::Null
    } else {
        Value::Undefined
    })
}

/// Convert to a primitive core type. `None` when `target` is not one.
pub(crate) fn convert_primitive(interp: &mut Interpreter, value: &Value, target: ObjRef) -> VmResult<Option<Value>> {
    let core = interp.core;
    let converted = if target == core.string {
        let text = display_string(interp, value)?;
        Value::String(interp.intern(&text))
    } else if target == core.number {
        Value::Number(to_number(interp, value)?)
    } else if target == core.boolean {
        Value::Boolean(value.truthy())
    } else {
        return Ok(None);
    };
    Ok(Some(converted))
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

pub(super) fn clone(_interp: &mut Interpreter, value: &Value, _deep: bool) -> VmResult<Value> {
    Ok(value.clone())
}

pub(super) fn define_property(
    interp: &mut Interpreter,
    value: &Value,
    _hint: SlotHint,
    name: QualifiedName,
    _ty: Option<ObjRef>,
    _attributes: Attributes,
    _initial: Value,
) -> VmResult<usize> {
    Err(VmError::type_error(format!(
        "Cannot define property \"{}\" on {}",
        name,
        interp.type_name_of(value)
    )))
}

pub(super) fn delete_property(_interp: &mut Interpreter, _value: &Value, _slot: usize) -> VmResult<()> {
    Ok(())
}

pub(super) fn delete_property_by_name(_interp: &mut Interpreter, _value: &Value, _name: &QualifiedName) -> VmResult<bool> {
    Ok(false)
}

pub(super) fn get_property(_interp: &mut Interpreter, _value: &Value, _slot: usize) -> VmResult<Value> {
    Ok(Value::Undefined)
}

pub(super) fn get_property_by_name(interp: &mut Interpreter, value: &Value, name: &QualifiedName) -> VmResult<Value> {
    let ty = interp.type_of(value);
    Ok(prototype_get(interp, value, ty, name)?.unwrap_or_default())
}

/// Strings expose `length` and single-character indexing
pub(super) fn get_string_property_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
) -> VmResult<Value> {
    if let Value::String(text) = value {
        if name.name.as_str() == "length" {
            return Ok(Value::Number(text.chars().count() as f64));
        }
        if let Ok(index) = name.name.parse::<usize>() {
            return Ok(match text.chars().nth(index) {
                Some(c) => Value::String(interp.intern(c.encode_utf8(&mut [0; 4]))),
                None => Value::Undefined,
            });
        }
    }
    get_property_by_name(interp, value, name)
}

pub(super) fn nullish_get_property_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
) -> VmResult<Value> {
    Err(VmError::type_error(format!(
        "Cannot read property \"{}\" of {}",
        name,
        interp.type_name_of(value)
    )))
}

pub(super) fn nullish_set_property_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
    _new: Value,
) -> VmResult<()> {
    Err(VmError::type_error(format!(
        "Cannot set property \"{}\" of {}",
        name,
        interp.type_name_of(value)
    )))
}

pub(super) fn get_property_count(_interp: &Interpreter, _value: &Value) -> VmResult<usize> {
    Ok(0)
}

pub(super) fn get_property_name(_interp: &Interpreter, _value: &Value, _slot: usize) -> VmResult<Option<QualifiedName>> {
    Ok(None)
}

pub(super) fn get_property_traits(_interp: &Interpreter, _value: &Value, slot: usize) -> VmResult<Trait> {
    Err(PropertyError::OutOfBounds(slot).into())
}

pub(super) fn lookup_property(_interp: &Interpreter, _value: &Value, _name: &QualifiedName) -> VmResult<Option<usize>> {
    Ok(None)
}

pub(super) fn set_property(interp: &mut Interpreter, value: &Value, slot: usize, _new: Value) -> VmResult<()> {
    Err(VmError::type_error(format!(
        "Cannot set slot {} of {}",
        slot,
        interp.type_name_of(value)
    )))
}

pub(super) fn set_property_by_name(
    interp: &mut Interpreter,
    value: &Value,
    name: &QualifiedName,
    _new: Value,
) -> VmResult<()> {
    Err(VmError::type_error(format!(
        "Cannot set property \"{}\" on {}",
        name,
        interp.type_name_of(value)
    )))
}

pub(super) fn set_property_name(interp: &mut Interpreter, value: &Value, _slot: usize, name: QualifiedName) -> VmResult<()> {
    Err(VmError::type_error(format!(
        "Cannot rename property to \"{}\" on {}",
        name,
        interp.type_name_of(value)
    )))
}

pub(super) fn set_property_traits(
    interp: &mut Interpreter,
    value: &Value,
    slot: usize,
    _ty: Option<ObjRef>,
    _attributes: Attributes,
) -> VmResult<()> {
    Err(VmError::type_error(format!(
        "Cannot change traits of slot {} on {}",
        slot,
        interp.type_name_of(value)
    )))
}
