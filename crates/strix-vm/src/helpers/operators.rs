//! Operator semantics
//!
//! `invoke` implements the generic rules: `+` concatenates when either side
//! is a string or object, otherwise it adds numbers; relational operators
//! compare two strings lexically and everything else numerically; `==`
//! coerces, `===` does not. Number and string tables install fast paths
//! that fall back to the generic rules for mixed operands.

use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::{ObjKind, QualifiedName};
use crate::value::{number_to_string, string_to_number, ObjRef, Value};
use std::cmp::Ordering;
use strix_bytecode::Opcode;

/// Nesting depth at which array display stops descending
const MAX_DISPLAY_DEPTH: usize = 8;

pub(crate) fn invoke(interp: &mut Interpreter, lhs: &Value, op: Opcode, rhs: Option<&Value>) -> VmResult<Value> {
    match op {
        Opcode::Neg => Ok(Value::Number(-to_number(interp, lhs)?)),
        Opcode::BitNot => Ok(Value::Number(f64::from(!to_int32(to_number(interp, lhs)?)))),
        Opcode::LogicalNot => Ok(Value::Boolean(!lhs.truthy())),
        _ => {
            let rhs = rhs.ok_or_else(|| VmError::instruction(format!("{} needs two operands", op.name())))?;
            binary(interp, lhs, op, rhs)
        }
    }
}

fn binary(interp: &mut Interpreter, lhs: &Value, op: Opcode, rhs: &Value) -> VmResult<Value> {
    match op {
        Opcode::Add | Opcode::Inc => add(interp, lhs, rhs),
        Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem => {
            let a = to_number(interp, lhs)?;
            let b = to_number(interp, rhs)?;
            Ok(Value::Number(arithmetic(op, a, b)))
        }
        Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor | Opcode::Shl | Opcode::Shr | Opcode::Ushr => {
            let a = to_number(interp, lhs)?;
            let b = to_number(interp, rhs)?;
            Ok(Value::Number(bitwise(op, a, b)))
        }
        Opcode::CompareEq => Ok(Value::Boolean(loose_equals(interp, lhs, rhs)?)),
        Opcode::CompareNe => Ok(Value::Boolean(!loose_equals(interp, lhs, rhs)?)),
        Opcode::CompareStrictEq => Ok(Value::Boolean(lhs.strict_equals(rhs))),
        Opcode::CompareStrictNe => Ok(Value::Boolean(!lhs.strict_equals(rhs))),
        Opcode::CompareLt | Opcode::CompareLe | Opcode::CompareGt | Opcode::CompareGe => {
            let ordering = compare(interp, lhs, rhs)?;
            Ok(Value::Boolean(relational(op, ordering)))
        }
        _ => Err(VmError::instruction(format!("{} is not an operator", op.name()))),
    }
}

/// Numeric fast path
pub(crate) fn invoke_number(interp: &mut Interpreter, lhs: &Value, op: Opcode, rhs: Option<&Value>) -> VmResult<Value> {
    if let (Value::Number(a), Some(Value::Number(b))) = (lhs, rhs) {
        let (a, b) = (*a, *b);
        let result = match op {
            Opcode::Add | Opcode::Inc => Value::Number(a + b),
            Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem => Value::Number(arithmetic(op, a, b)),
            Opcode::CompareEq | Opcode::CompareStrictEq => Value::Boolean(a == b),
            Opcode::CompareNe | Opcode::CompareStrictNe => Value::Boolean(a != b),
            Opcode::CompareLt | Opcode::CompareLe | Opcode::CompareGt | Opcode::CompareGe => {
                Value::Boolean(relational(op, a.partial_cmp(&b)))
            }
            _ => return invoke(interp, lhs, op, rhs),
        };
        return Ok(result);
    }
    invoke(interp, lhs, op, rhs)
}

/// String fast path
pub(crate) fn invoke_string(interp: &mut Interpreter, lhs: &Value, op: Opcode, rhs: Option<&Value>) -> VmResult<Value> {
    if let (Value::String(a), Some(Value::String(b))) = (lhs, rhs) {
        let result = match op {
            Opcode::Add => {
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);
                Value::String(interp.intern(&joined))
            }
            Opcode::CompareEq | Opcode::CompareStrictEq => Value::Boolean(a == b),
            Opcode::CompareNe | Opcode::CompareStrictNe => Value::Boolean(a != b),
            Opcode::CompareLt | Opcode::CompareLe | Opcode::CompareGt | Opcode::CompareGe => {
                Value::Boolean(relational(op, Some(a.as_str().cmp(b.as_str()))))
            }
            _ => return invoke(interp, lhs, op, rhs),
        };
        return Ok(result);
    }
    invoke(interp, lhs, op, rhs)
}

fn add(interp: &mut Interpreter, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    let concatenates = |v: &Value| matches!(v, Value::String(_) | Value::Object(_));
    if concatenates(lhs) || concatenates(rhs) {
        let mut joined = display_string(interp, lhs)?;
        joined.push_str(&display_string(interp, rhs)?);
        return Ok(Value::String(interp.intern(&joined)));
    }
    Ok(Value::Number(to_number(interp, lhs)? + to_number(interp, rhs)?))
}

fn arithmetic(op: Opcode, a: f64, b: f64) -> f64 {
    match op {
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        Opcode::Rem => a % b,
        _ => a + b,
    }
}

fn bitwise(op: Opcode, a: f64, b: f64) -> f64 {
    let shift = to_uint32(b) & 31;
    match op {
        Opcode::BitAnd => f64::from(to_int32(a) & to_int32(b)),
        Opcode::BitOr => f64::from(to_int32(a) | to_int32(b)),
        Opcode::BitXor => f64::from(to_int32(a) ^ to_int32(b)),
        Opcode::Shl => f64::from(to_int32(a).wrapping_shl(shift)),
        Opcode::Shr => f64::from(to_int32(a) >> shift),
        _ => f64::from(to_uint32(a) >> shift),
    }
}

fn relational(op: Opcode, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        Opcode::CompareLt => ordering == Ordering::Less,
        Opcode::CompareLe => ordering != Ordering::Greater,
        Opcode::CompareGt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    }
}

/// Ordering of two values; `None` when either side is NaN
fn compare(interp: &mut Interpreter, lhs: &Value, rhs: &Value) -> VmResult<Option<Ordering>> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Ok(Some(a.as_str().cmp(b.as_str())));
    }
    let a = to_number(interp, lhs)?;
    let b = to_number(interp, rhs)?;
    Ok(a.partial_cmp(&b))
}

/// `==` semantics
pub(crate) fn loose_equals(interp: &mut Interpreter, lhs: &Value, rhs: &Value) -> VmResult<bool> {
    Ok(match (lhs, rhs) {
        (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
        (Value::Object(a), Value::Object(b)) => a == b,
        (Value::Boolean(b), other) | (other, Value::Boolean(b)) => {
            let n = if *b { 1.0 } else { 0.0 };
            return loose_equals(interp, &Value::Number(n), other);
        }
        (Value::Object(_), other) | (other, Value::Object(_)) => {
            let object = if lhs.as_object().is_some() { lhs } else { rhs };
            let text = display_string(interp, object)?;
            let primitive = Value::String(interp.intern(&text));
            return loose_equals(interp, &primitive, other);
        }
        (Value::String(a), Value::String(b)) => a == b,
        (a, b) => to_number(interp, a)? == to_number(interp, b)?,
    })
}

/// Numeric conversion
pub(crate) fn to_number(interp: &mut Interpreter, value: &Value) -> VmResult<f64> {
    Ok(match value {
        Value::Undefined => f64::NAN,
        Value::Null => 0.0,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Number(n) => *n,
        Value::String(s) => string_to_number(s),
        Value::Object(_) => string_to_number(&display_string(interp, value)?),
    })
}

/// 32-bit signed conversion used by the bitwise operators
pub(crate) fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// String conversion; objects are asked for their `toString`
pub(crate) fn display_string(interp: &mut Interpreter, value: &Value) -> VmResult<String> {
    display(interp, value, 0)
}

fn display(interp: &mut Interpreter, value: &Value, depth: usize) -> VmResult<String> {
    Ok(match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::String(s) => s.to_string(),
        Value::Object(obj) => {
            if depth > MAX_DISPLAY_DEPTH {
                return Ok("...".to_string());
            }
            let name = QualifiedName::new(interp.names.empty.clone(), interp.names.to_string.clone());
            let method = interp.get_property_by_name(value, &name)?;
            if interp.is_callable(&method) {
                match interp.call_function(&method, value.clone(), &[])? {
                    Value::Object(_) => default_object_string(interp, *obj, depth)?,
                    result => display(interp, &result, depth + 1)?,
                }
            } else {
                default_object_string(interp, *obj, depth)?
            }
        }
    })
}

/// Text used when an object has no `toString` of its own: arrays join
/// their elements, functions and types show their name.
pub(crate) fn default_object_string(interp: &mut Interpreter, obj: ObjRef, depth: usize) -> VmResult<String> {
    enum Shape {
        Elements(Vec<Value>),
        Named(String),
        Instance(ObjRef),
    }

    let shape = {
        let object = interp.gc.heap.get(obj)?;
        match &object.kind {
            ObjKind::Array(array) => Shape::Elements(array.elements.clone()),
            ObjKind::Function(function) => Shape::Named(format!("[function {}]", function.name)),
            ObjKind::Type(ty) => Shape::Named(format!("[type {}]", ty.qname)),
            _ => Shape::Instance(object.header.ty),
        }
    };
    Ok(match shape {
        Shape::Elements(elements) => {
            let mut parts = Vec::with_capacity(elements.len());
            for element in &elements {
                parts.push(match element {
                    Value::Undefined | Value::Null => String::new(),
                    other => display(interp, other, depth + 1)?,
                });
            }
            parts.join(",")
        }
        Shape::Named(text) => text,
        Shape::Instance(ty) => format!("[object {}]", interp.type_display_name(ty)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_conversion_wraps() {
        assert_eq!(to_int32(1.0), 1);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn test_bitwise_shifts() {
        assert_eq!(bitwise(Opcode::Shl, 1.0, 33.0), 2.0);
        assert_eq!(bitwise(Opcode::Shr, -8.0, 1.0), -4.0);
        assert_eq!(bitwise(Opcode::Ushr, -1.0, 28.0), 15.0);
        assert_eq!(bitwise(Opcode::BitXor, 6.0, 3.0), 5.0);
    }

    #[test]
    fn test_relational_with_nan() {
        assert!(!relational(Opcode::CompareLt, None));
        assert!(!relational(Opcode::CompareGe, None));
        assert!(relational(Opcode::CompareLe, Some(Ordering::Equal)));
        assert!(relational(Opcode::CompareGt, Some(Ordering::Greater)));
    }
}
