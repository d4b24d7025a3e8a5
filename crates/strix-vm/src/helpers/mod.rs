//! Per-type operation tables
//!
//! Every type carries a [`Helpers`] table of plain function pointers. The
//! interpreter never inspects an object's payload to read or write a
//! property; it asks the table of the value's type. Three canonical tables
//! exist:
//!
//! - [`Helpers::value`] for primitives without property storage
//! - [`Helpers::pot`] for property-store-backed objects
//! - [`Helpers::block`] for scope blocks, with namespace-aware lookup
//!
//! Specialized types start from one of them and override single entries
//! with struct update syntax, e.g. numbers replace only `invoke_operator`.

mod array;
pub(crate) mod block;
pub(crate) mod operators;
pub(crate) mod pot;
mod value;

use crate::error::VmResult;
use crate::interpreter::Interpreter;
use crate::object::{Attributes, QualifiedName, SlotHint, Trait};
use crate::value::{ObjRef, Value};
use std::fmt;
use strix_bytecode::Opcode;

/// Allocate an instance of a type with `extra` free slots
pub type CreateFn = fn(&mut Interpreter, ObjRef, usize) -> VmResult<Value>;
/// Convert a value to a target type
pub type CastFn = fn(&mut Interpreter, &Value, ObjRef) -> VmResult<Value>;
/// Copy a value, deeply when the flag is set
pub type CloneFn = fn(&mut Interpreter, &Value, bool) -> VmResult<Value>;
/// Define a property, returning its slot
pub type DefinePropertyFn =
    fn(&mut Interpreter, &Value, SlotHint, QualifiedName, Option<ObjRef>, Attributes, Value) -> VmResult<usize>;
/// Delete the property in a slot
pub type DeletePropertyFn = fn(&mut Interpreter, &Value, usize) -> VmResult<()>;
/// Delete a property by name; false when it does not exist
pub type DeletePropertyByNameFn = fn(&mut Interpreter, &Value, &QualifiedName) -> VmResult<bool>;
/// Read a slot
pub type GetPropertyFn = fn(&mut Interpreter, &Value, usize) -> VmResult<Value>;
/// Read a property by name; `undefined` when it does not exist
pub type GetPropertyByNameFn = fn(&mut Interpreter, &Value, &QualifiedName) -> VmResult<Value>;
/// Number of slots to enumerate
pub type GetPropertyCountFn = fn(&Interpreter, &Value) -> VmResult<usize>;
/// Name of an enumerable slot; `None` for deleted or hidden slots
pub type GetPropertyNameFn = fn(&Interpreter, &Value, usize) -> VmResult<Option<QualifiedName>>;
/// Declared type and attributes of a slot
pub type GetPropertyTraitsFn = fn(&Interpreter, &Value, usize) -> VmResult<Trait>;
/// Apply an operator; unary operators get `None` as right operand
pub type InvokeOperatorFn = fn(&mut Interpreter, &Value, Opcode, Option<&Value>) -> VmResult<Value>;
/// Find the slot holding a name in the value itself
pub type LookupPropertyFn = fn(&Interpreter, &Value, &QualifiedName) -> VmResult<Option<usize>>;
/// Write a slot
pub type SetPropertyFn = fn(&mut Interpreter, &Value, usize, Value) -> VmResult<()>;
/// Write a property by name, creating it on dynamic objects
pub type SetPropertyByNameFn = fn(&mut Interpreter, &Value, &QualifiedName, Value) -> VmResult<()>;
/// Rename a slot
pub type SetPropertyNameFn = fn(&mut Interpreter, &Value, usize, QualifiedName) -> VmResult<()>;
/// Replace the declared type and attributes of a slot
pub type SetPropertyTraitsFn = fn(&mut Interpreter, &Value, usize, Option<ObjRef>, Attributes) -> VmResult<()>;

/// Operation table of a type
#[derive(Clone, Copy)]
pub struct Helpers {
    /// Allocate an instance
    pub create: CreateFn,
    /// Convert to another type
    pub cast: CastFn,
    /// Copy
    pub clone: CloneFn,
    /// Define a property
    pub define_property: DefinePropertyFn,
    /// Delete by slot
    pub delete_property: DeletePropertyFn,
    /// Delete by name
    pub delete_property_by_name: DeletePropertyByNameFn,
    /// Read by slot
    pub get_property: GetPropertyFn,
    /// Read by name
    pub get_property_by_name: GetPropertyByNameFn,
    /// Slot count for enumeration
    pub get_property_count: GetPropertyCountFn,
    /// Slot name for enumeration
    pub get_property_name: GetPropertyNameFn,
    /// Slot traits
    pub get_property_traits: GetPropertyTraitsFn,
    /// Operators
    pub invoke_operator: InvokeOperatorFn,
    /// Own-slot lookup
    pub lookup_property: LookupPropertyFn,
    /// Write by slot
    pub set_property: SetPropertyFn,
    /// Write by name
    pub set_property_by_name: SetPropertyByNameFn,
    /// Rename
    pub set_property_name: SetPropertyNameFn,
    /// Retype
    pub set_property_traits: SetPropertyTraitsFn,
}

impl Helpers {
    /// Table for primitives (booleans, numbers, null, undefined)
    pub fn value() -> Self {
        Self {
            create: value::create,
            cast: value::cast,
            clone: value::clone,
            define_property: value::define_property,
            delete_property: value::delete_property,
            delete_property_by_name: value::delete_property_by_name,
            get_property: value::get_property,
            get_property_by_name: value::get_property_by_name,
            get_property_count: value::get_property_count,
            get_property_name: value::get_property_name,
            get_property_traits: value::get_property_traits,
            invoke_operator: operators::invoke,
            lookup_property: value::lookup_property,
            set_property: value::set_property,
            set_property_by_name: value::set_property_by_name,
            set_property_name: value::set_property_name,
            set_property_traits: value::set_property_traits,
        }
    }

    /// Table for property-store-backed objects
    pub fn pot() -> Self {
        Self {
            create: pot::create,
            cast: pot::cast,
            clone: pot::clone,
            define_property: pot::define_property,
            delete_property: pot::delete_property,
            delete_property_by_name: pot::delete_property_by_name,
            get_property: pot::get_property,
            get_property_by_name: pot::get_property_by_name,
            get_property_count: pot::get_property_count,
            get_property_name: pot::get_property_name,
            get_property_traits: pot::get_property_traits,
            invoke_operator: operators::invoke,
            lookup_property: pot::lookup_property,
            set_property: pot::set_property,
            set_property_by_name: pot::set_property_by_name,
            set_property_name: pot::set_property_name,
            set_property_traits: pot::set_property_traits,
        }
    }

    /// Table for scope blocks: lookups prefer the block's open namespaces
    pub fn block() -> Self {
        Self {
            create: block::create,
            lookup_property: block::lookup_property,
            get_property_by_name: block::get_property_by_name,
            set_property_by_name: block::set_property_by_name,
            ..Self::pot()
        }
    }

    /// Table for type objects: statics are inherited from base types
    pub fn type_object() -> Self {
        Self {
            create: block::create,
            get_property_by_name: block::get_static_by_name,
            set_property_by_name: block::set_static_by_name,
            ..Self::pot()
        }
    }

    /// Table for function objects
    pub fn function() -> Self {
        Self {
            create: block::create,
            ..Self::pot()
        }
    }

    /// Table for numbers
    pub fn number() -> Self {
        Self {
            invoke_operator: operators::invoke_number,
            ..Self::value()
        }
    }

    /// Table for strings
    pub fn string() -> Self {
        Self {
            invoke_operator: operators::invoke_string,
            get_property_by_name: value::get_string_property_by_name,
            ..Self::value()
        }
    }

    /// Table for `null` and `undefined`: every property access fails
    pub fn nullish() -> Self {
        Self {
            get_property_by_name: value::nullish_get_property_by_name,
            set_property_by_name: value::nullish_set_property_by_name,
            ..Self::value()
        }
    }

    /// Table for arrays: slots are elements, `length` is virtual
    pub fn array() -> Self {
        Self {
            create: array::create,
            delete_property: array::delete_property,
            get_property: array::get_property,
            get_property_by_name: array::get_property_by_name,
            get_property_count: array::get_property_count,
            get_property_name: array::get_property_name,
            set_property: array::set_property,
            set_property_by_name: array::set_property_by_name,
            ..Self::pot()
        }
    }
}

impl fmt::Debug for Helpers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helpers").finish_non_exhaustive()
    }
}

/// Dispatch through the value's type
impl Interpreter {
    /// Read a property by qualified name
    pub fn get_property_by_name(&mut self, obj: &Value, name: &QualifiedName) -> VmResult<Value> {
        let helpers = self.helpers_of(obj)?;
        (helpers.get_property_by_name)(self, obj, name)
    }

    /// Write a property by qualified name
    pub fn set_property_by_name(&mut self, obj: &Value, name: &QualifiedName, value: Value) -> VmResult<()> {
        let helpers = self.helpers_of(obj)?;
        (helpers.set_property_by_name)(self, obj, name, value)
    }

    /// Delete a property by qualified name
    pub fn delete_property_by_name(&mut self, obj: &Value, name: &QualifiedName) -> VmResult<bool> {
        let helpers = self.helpers_of(obj)?;
        (helpers.delete_property_by_name)(self, obj, name)
    }

    /// Read a slot
    pub fn get_property(&mut self, obj: &Value, slot: usize) -> VmResult<Value> {
        let helpers = self.helpers_of(obj)?;
        (helpers.get_property)(self, obj, slot)
    }

    /// Write a slot
    pub fn set_property(&mut self, obj: &Value, slot: usize, value: Value) -> VmResult<()> {
        let helpers = self.helpers_of(obj)?;
        (helpers.set_property)(self, obj, slot, value)
    }

    /// Delete a slot
    pub fn delete_property(&mut self, obj: &Value, slot: usize) -> VmResult<()> {
        let helpers = self.helpers_of(obj)?;
        (helpers.delete_property)(self, obj, slot)
    }

    /// Find the slot holding a name
    pub fn lookup_property(&self, obj: &Value, name: &QualifiedName) -> VmResult<Option<usize>> {
        let helpers = self.helpers_of(obj)?;
        (helpers.lookup_property)(self, obj, name)
    }

    /// Define a property on any value
    pub fn define_property_on(
        &mut self,
        obj: &Value,
        hint: SlotHint,
        name: QualifiedName,
        ty: Option<ObjRef>,
        attributes: Attributes,
        value: Value,
    ) -> VmResult<usize> {
        let helpers = self.helpers_of(obj)?;
        (helpers.define_property)(self, obj, hint, name, ty, attributes, value)
    }

    /// Slot count for enumeration
    pub fn get_property_count(&self, obj: &Value) -> VmResult<usize> {
        let helpers = self.helpers_of(obj)?;
        (helpers.get_property_count)(self, obj)
    }

    /// Name of an enumerable slot
    pub fn get_property_name(&self, obj: &Value, slot: usize) -> VmResult<Option<QualifiedName>> {
        let helpers = self.helpers_of(obj)?;
        (helpers.get_property_name)(self, obj, slot)
    }

    /// Traits of a slot
    pub fn get_property_traits(&self, obj: &Value, slot: usize) -> VmResult<Trait> {
        let helpers = self.helpers_of(obj)?;
        (helpers.get_property_traits)(self, obj, slot)
    }

    /// Rename a slot
    pub fn set_property_name(&mut self, obj: &Value, slot: usize, name: QualifiedName) -> VmResult<()> {
        let helpers = self.helpers_of(obj)?;
        (helpers.set_property_name)(self, obj, slot, name)
    }

    /// Retype a slot
    pub fn set_property_traits(
        &mut self,
        obj: &Value,
        slot: usize,
        ty: Option<ObjRef>,
        attributes: Attributes,
    ) -> VmResult<()> {
        let helpers = self.helpers_of(obj)?;
        (helpers.set_property_traits)(self, obj, slot, ty, attributes)
    }

    /// Copy a value
    pub fn clone_value(&mut self, value: &Value, deep: bool) -> VmResult<Value> {
        let helpers = self.helpers_of(value)?;
        (helpers.clone)(self, value, deep)
    }

    /// Apply an operator, dispatching on the left operand's type
    pub fn invoke_operator(&mut self, lhs: &Value, op: Opcode, rhs: Option<&Value>) -> VmResult<Value> {
        let helpers = self.helpers_of(lhs)?;
        (helpers.invoke_operator)(self, lhs, op, rhs)
    }

    /// Allocate an instance of `ty` without running its constructor
    pub fn create_instance(&mut self, ty: ObjRef, extra: usize) -> VmResult<Value> {
        let helpers = self.type_obj(ty)?.helpers;
        (helpers.create)(self, ty, extra)
    }

    /// Convert `value` to `target`. Values already of the target type are
    /// returned unchanged; otherwise the source type's cast helper decides.
    pub fn cast(&mut self, value: &Value, target: ObjRef) -> VmResult<Value> {
        if self.is_instance_of(value, target) {
            return Ok(value.clone());
        }
        let helpers = self.helpers_of(value)?;
        (helpers.cast)(self, value, target)
    }
}
