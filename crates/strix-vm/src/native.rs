//! Registration surface for native code
//!
//! Native modules create types, define properties and bind Rust functions
//! into the slots a compiled module declared. Binding into a slot that
//! already holds a function gives that function a native body, so its name,
//! owner and accessor pairing are kept.

use crate::error::{VmError, VmResult};
use crate::helpers::Helpers;
use crate::interpreter::Interpreter;
use crate::object::{Attributes, Function, FunctionBody, HeapObject, NativeFn, ObjKind, QualifiedName, SlotHint, TypeObj};
use crate::value::{ObjRef, Value};
use tracing::trace;

impl Interpreter {
    /// Allocate a native function object
    pub fn native_function(&mut self, name: &str, f: NativeFn, num_args: usize) -> VmResult<ObjRef> {
        let name = self.qname("", name);
        let function = Function::native(name, f, num_args);
        self.alloc(HeapObject::new(self.core.function, false, ObjKind::Function(Box::new(function))))
    }

    /// Create a type and define it on the global object
    ///
    /// With `helpers` unset the type takes its base's helpers. Without a
    /// base the type derives from `Object`.
    pub fn create_type(
        &mut self,
        name: QualifiedName,
        base: Option<ObjRef>,
        helpers: Option<Helpers>,
        attributes: Attributes,
    ) -> VmResult<ObjRef> {
        let mut t = TypeObj::new(name.clone(), helpers.unwrap_or_else(Helpers::pot));
        t.attributes = attributes;
        t.scope = Some(self.global);
        t.helpers_inherited = helpers.is_none();
        let ty = self.alloc(HeapObject::new(self.core.ty, false, ObjKind::Type(Box::new(t))))?;

        let base = base.unwrap_or(self.core.object);
        self.inherit(ty, base)?;

        let type_type = self.core.ty;
        let global = self.global;
        self.gc
            .heap
            .get_mut(global)?
            .store_mut()
            .define(name, Some(type_type), Attributes::empty(), Value::Object(ty), SlotHint::Next)?;
        Ok(ty)
    }

    /// Define a property on any value through its type's helpers
    pub fn define_property(
        &mut self,
        obj: &Value,
        name: QualifiedName,
        value: Value,
        attributes: Attributes,
    ) -> VmResult<usize> {
        self.define_property_on(obj, SlotHint::Next, name, None, attributes, value)
    }

    /// Give the method in prototype slot `slot` of `ty` a native body
    pub fn bind_method(&mut self, ty: ObjRef, slot: usize, f: NativeFn) -> VmResult<()> {
        let current = {
            let prototype = &self.type_obj(ty)?.prototype;
            if slot >= prototype.len() {
                return Err(VmError::reference_error(format!(
                    "{} has no method in slot {}",
                    self.type_display_name(ty),
                    slot
                )));
            }
            prototype.get(slot)?.clone()
        };
        self.bind_into(current, f)
    }

    /// Give the function in slot `slot` of `obj` a native body. For types
    /// the slot is a static.
    pub fn bind_slot(&mut self, obj: &Value, slot: usize, f: NativeFn) -> VmResult<()> {
        let current = self.get_property(obj, slot)?;
        self.bind_into(current, f)
    }

    /// Define an accessor on the prototype of `ty`
    pub fn bind_access(
        &mut self,
        ty: ObjRef,
        name: QualifiedName,
        getter: NativeFn,
        setter: Option<NativeFn>,
    ) -> VmResult<usize> {
        let get = self.native_function(&name.name, getter, 0)?;
        if let Some(setter) = setter {
            let set = self.native_function(&name.name, setter, 1)?;
            if let Some(f) = self.gc.heap.get_mut(get)?.as_function_mut() {
                f.setter = Some(set);
            }
        }
        let slot = self.type_obj_mut(ty)?.prototype.define(
            name,
            None,
            Attributes::GETTER | Attributes::HIDDEN,
            Value::Object(get),
            SlotHint::Next,
        )?;
        Ok(slot)
    }

    /// Define a native function on the global object
    pub fn define_global_function(
        &mut self,
        name: &str,
        f: NativeFn,
        num_args: usize,
    ) -> VmResult<usize> {
        let function = self.native_function(name, f, num_args)?;
        let name = self.qname("", name);
        let global = self.global();
        self.define_property(&global, name, Value::Object(function), Attributes::empty())
    }

    fn bind_into(&mut self, current: Value, f: NativeFn) -> VmResult<()> {
        let target = current.as_object();
        let function = match target {
            Some(obj) => self.gc.heap.get_mut(obj)?.as_function_mut(),
            None => None,
        };
        let Some(function) = function else {
            return Err(VmError::type_error("Slot does not hold a function"));
        };
        function.body = FunctionBody::Native(f);
        function.attributes.insert(Attributes::NATIVE);
        trace!(function = %function.name, "native bound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::Interpreter;
    use crate::module::Service;
    use crate::object::Attributes;
    use crate::options::VmOptions;
    use crate::value::Value;
    use std::sync::Arc;

    fn answer(_interp: &mut Interpreter, _this: Value, _args: &[Value]) -> crate::error::VmResult<Value> {
        Ok(Value::Number(42.0))
    }

    fn interp() -> Interpreter {
        Interpreter::new(Arc::new(Service::new()), VmOptions::default()).unwrap()
    }

    #[test]
    fn test_global_function_is_callable_by_name() {
        let mut interp = interp();
        interp.define_global_function("answer", answer, 0).unwrap();
        let function = interp.get_global("answer").unwrap();
        let result = interp.run_function(&function, Value::Undefined, &[]).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn test_created_type_derives_from_object() {
        let mut interp = interp();
        let name = interp.qname("app", "Point");
        let ty = interp.create_type(name, None, None, Attributes::DYNAMIC_INSTANCES).unwrap();
        let object = interp.core_types().object;
        let instance = interp.run_function(&Value::Object(ty), Value::Undefined, &[]).unwrap();
        assert!(interp.is_instance_of(&instance, ty));
        assert!(interp.is_instance_of(&instance, object));
        assert_eq!(interp.get_global("Point").unwrap(), Value::Object(ty));
    }

    #[test]
    fn test_accessor_runs_native_getter() {
        let mut interp = interp();
        let name = interp.qname("app", "Box");
        let ty = interp.create_type(name, None, None, Attributes::DYNAMIC_INSTANCES).unwrap();
        let size = interp.qname("app", "size");
        interp.bind_access(ty, size.clone(), answer, None).unwrap();
        let instance = interp.run_function(&Value::Object(ty), Value::Undefined, &[]).unwrap();
        assert_eq!(interp.get_property_by_name(&instance, &size).unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_bind_slot_rejects_non_functions() {
        let mut interp = interp();
        let global = interp.global();
        let name = interp.qname("", "x");
        let slot = interp.define_property(&global, name, Value::Number(1.0), Attributes::empty()).unwrap();
        assert!(interp.bind_slot(&global, slot, answer).is_err());
    }
}
