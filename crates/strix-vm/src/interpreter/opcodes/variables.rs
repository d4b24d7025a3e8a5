//! Slot and name access
//!
//! Unqualified names resolve innermost first: the frame's open blocks, its
//! activation, then `this` (own slots, prototype members, statics), then
//! the scope chain the function was defined in, ending at the global
//! object. A wildcard namespace prefers the namespaces opened by the scopes
//! already walked, most recently opened first.

use super::{misrouted, Operands};
use crate::error::{VmError, VmResult};
use crate::helpers::block::find_static;
use crate::helpers::operators::display_string;
use crate::helpers::pot::{accessor_read, accessor_write, prototype_slot};
use crate::intern::IStr;
use crate::interpreter::execution::ControlFlow;
use crate::interpreter::Interpreter;
use crate::object::{Code, ObjKind, QualifiedName};
use crate::value::{ObjRef, Value};
use strix_bytecode::Opcode;

/// Where a resolved name lives
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    /// Own slot of a scope or object
    Slot { holder: ObjRef, slot: usize },
    /// Static slot of a type or one of its bases
    Static { owner: ObjRef, slot: usize },
    /// Prototype member reached through `this`
    Member { this: Value },
}

impl Interpreter {
    pub(in crate::interpreter) fn exec_variable_ops(
        &mut self,
        opcode: Opcode,
        operands: &Operands,
        code: &Code,
    ) -> VmResult<ControlFlow> {
        match opcode {
            // ===== Slots =====
            Opcode::GetLocal => {
                let slot = operands.index(0)?;
                let activation = self.frame()?.activation;
                let store = self.gc.heap.get(activation)?.store();
                let value = if slot < store.len() { store.get(slot)?.clone() } else { Value::Undefined };
                self.push(value);
            }

            Opcode::PutLocal => {
                let slot = operands.index(0)?;
                let value = self.pop()?;
                let activation = self.frame()?.activation;
                self.gc.heap.get_mut(activation)?.store_mut().set_growing(slot, value)?;
            }

            Opcode::GetScopedSlot => {
                let scope = self.scope_at(operands.index(0)?)?;
                let value = self.get_property(&Value::Object(scope), operands.index(1)?)?;
                self.push(value);
            }

            Opcode::PutScopedSlot => {
                let scope = self.scope_at(operands.index(0)?)?;
                let value = self.pop()?;
                self.set_property(&Value::Object(scope), operands.index(1)?, value)?;
            }

            Opcode::GetGlobalSlot => {
                let global = self.global();
                let value = self.get_property(&global, operands.index(0)?)?;
                self.push(value);
            }

            Opcode::PutGlobalSlot => {
                let value = self.pop()?;
                let global = self.global();
                self.set_property(&global, operands.index(0)?, value)?;
            }

            Opcode::GetObjSlot => {
                let obj = self.pop()?;
                let value = self.get_property(&obj, operands.index(0)?)?;
                self.push(value);
            }

            Opcode::PutObjSlot => {
                let value = self.pop()?;
                let obj = self.pop()?;
                self.set_property(&obj, operands.index(0)?, value)?;
            }

            Opcode::GetThisSlot => {
                let this = self.frame()?.this.clone();
                let value = self.get_property(&this, operands.index(0)?)?;
                self.push(value);
            }

            Opcode::PutThisSlot => {
                let value = self.pop()?;
                let this = self.frame()?.this.clone();
                self.set_property(&this, operands.index(0)?, value)?;
            }

            // ===== Names =====
            Opcode::GetName => {
                let name = operands.qname(code, 0)?;
                let value = match self.resolve_name(&name)? {
                    Some(binding) => self.read_binding(&binding, &name)?,
                    None => return Err(VmError::reference_error(format!("\"{}\" is not defined", name))),
                };
                self.push(value);
            }

            Opcode::PutName => {
                let name = operands.qname(code, 0)?;
                let value = self.pop()?;
                match self.resolve_name(&name)? {
                    Some(binding) => self.write_binding(&binding, &name, value)?,
                    None => {
                        let global = self.global();
                        self.set_property_by_name(&global, &name, value)?;
                    }
                }
            }

            Opcode::GetObjName => {
                let name = operands.qname(code, 0)?;
                let obj = self.pop()?;
                let value = self.get_property_by_name(&obj, &name)?;
                self.push(value);
            }

            Opcode::PutObjName => {
                let name = operands.qname(code, 0)?;
                let value = self.pop()?;
                let obj = self.pop()?;
                self.set_property_by_name(&obj, &name, value)?;
            }

            Opcode::DeleteObjName => {
                let name = operands.qname(code, 0)?;
                let obj = self.pop()?;
                let deleted = self.delete_property_by_name(&obj, &name)?;
                self.push(Value::Boolean(deleted));
            }

            // ===== Indexing =====
            Opcode::GetIndex => {
                let index = self.pop()?;
                let obj = self.pop()?;
                let value = match self.element_slot(&obj, &index) {
                    Some(slot) => self.get_property(&obj, slot)?,
                    None => {
                        let name = self.index_name(&index)?;
                        self.get_property_by_name(&obj, &name)?
                    }
                };
                self.push(value);
            }

            Opcode::PutIndex => {
                let value = self.pop()?;
                let index = self.pop()?;
                let obj = self.pop()?;
                match self.element_slot(&obj, &index) {
                    Some(slot) => self.set_property(&obj, slot, value)?,
                    None => {
                        let name = self.index_name(&index)?;
                        self.set_property_by_name(&obj, &name, value)?;
                    }
                }
            }

            _ => return Err(misrouted(opcode)),
        }
        Ok(ControlFlow::Continue)
    }

    /// Scope `depth` links up from the innermost scope of the frame
    fn scope_at(&self, depth: usize) -> VmResult<ObjRef> {
        let mut scope = self.frame()?.innermost();
        for _ in 0..depth {
            scope = self
                .gc
                .heap
                .get(scope)?
                .scope()
                .ok_or_else(|| VmError::instruction(format!("Scope depth {} exceeds the scope chain", depth)))?;
        }
        Ok(scope)
    }

    /// Element slot for an array indexed by a non-negative integer
    fn element_slot(&self, obj: &Value, index: &Value) -> Option<usize> {
        let Value::Number(n) = index else {
            return None;
        };
        let is_array = obj
            .as_object()
            .and_then(|o| self.gc.heap.get(o).ok())
            .is_some_and(|o| matches!(o.kind, ObjKind::Array(_)));
        (is_array && *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64).then_some(*n as usize)
    }

    fn index_name(&mut self, index: &Value) -> VmResult<QualifiedName> {
        let text = match index {
            Value::String(s) => s.clone(),
            other => {
                let text = display_string(self, other)?;
                self.intern(&text)
            }
        };
        Ok(self.names.any(&text))
    }

    // =========================================================================
    // Scope chain resolution
    // =========================================================================

    /// Find the scope or object holding `name`
    pub(crate) fn resolve_name(&self, name: &QualifiedName) -> VmResult<Option<Binding>> {
        let (innermost, activation, this) = {
            let frame = self.frame()?;
            (frame.innermost(), frame.activation, frame.this.clone())
        };
        let mut preferred: Vec<IStr> = Vec::new();
        let mut cursor = Some(innermost);
        while let Some(scope) = cursor {
            let object = self.gc.heap.get(scope)?;
            match &object.kind {
                ObjKind::Type(_) => {
                    if let Some((owner, slot)) = find_static(self, scope, name)? {
                        return Ok(Some(Binding::Static { owner, slot }));
                    }
                }
                _ => {
                    preferred.extend(object.namespaces().iter().rev().cloned());
                    if let Some(slot) = object.store().lookup_preferring(name, &preferred) {
                        return Ok(Some(Binding::Slot { holder: scope, slot }));
                    }
                }
            }
            if scope == activation {
                if let Some(binding) = self.resolve_member(&this, name)? {
                    return Ok(Some(binding));
                }
            }
            cursor = object.scope();
        }
        Ok(None)
    }

    /// Look for `name` on the frame's `this`
    fn resolve_member(&self, this: &Value, name: &QualifiedName) -> VmResult<Option<Binding>> {
        let Some(obj) = this.as_object() else {
            return Ok(None);
        };
        if obj == self.global {
            return Ok(None);
        }
        let object = self.gc.heap.get(obj)?;
        match &object.kind {
            ObjKind::Block(_) => Ok(None),
            ObjKind::Type(_) => Ok(find_static(self, obj, name)?.map(|(owner, slot)| Binding::Static { owner, slot })),
            _ => {
                if let Some(slot) = object.store().lookup(name) {
                    return Ok(Some(Binding::Slot { holder: obj, slot }));
                }
                let ty = object.header.ty;
                if prototype_slot(self, ty, name)?.is_some() {
                    return Ok(Some(Binding::Member { this: this.clone() }));
                }
                Ok(find_static(self, ty, name)?.map(|(owner, slot)| Binding::Static { owner, slot }))
            }
        }
    }

    pub(crate) fn read_binding(&mut self, binding: &Binding, name: &QualifiedName) -> VmResult<Value> {
        match binding {
            Binding::Slot { holder, slot } => {
                let entry = self.gc.heap.get(*holder)?.store().slot(*slot)?;
                let (value, attributes) = (entry.value.clone(), entry.traits.attributes);
                accessor_read(self, &Value::Object(*holder), value, attributes)
            }
            Binding::Static { owner, slot } => {
                let entry = self.type_obj(*owner)?.statics.slot(*slot)?;
                let (value, attributes) = (entry.value.clone(), entry.traits.attributes);
                accessor_read(self, &Value::Object(*owner), value, attributes)
            }
            Binding::Member { this } => self.get_property_by_name(this, name),
        }
    }

    pub(crate) fn write_binding(&mut self, binding: &Binding, name: &QualifiedName, value: Value) -> VmResult<()> {
        match binding {
            Binding::Slot { holder, slot } => {
                let entry = self.gc.heap.get(*holder)?.store().slot(*slot)?;
                let (current, attributes) = (entry.value.clone(), entry.traits.attributes);
                let target = Value::Object(*holder);
                if !accessor_write(self, &target, name, &current, attributes, value.clone())? {
                    self.gc.heap.get_mut(*holder)?.store_mut().set(*slot, value)?;
                }
                Ok(())
            }
            Binding::Static { owner, slot } => {
                let entry = self.type_obj(*owner)?.statics.slot(*slot)?;
                let (current, attributes) = (entry.value.clone(), entry.traits.attributes);
                let target = Value::Object(*owner);
                if !accessor_write(self, &target, name, &current, attributes, value.clone())? {
                    self.type_obj_mut(*owner)?.statics.set(*slot, value)?;
                }
                Ok(())
            }
            Binding::Member { this } => self.set_property_by_name(this, name, value),
        }
    }

    /// Type bound to `name` on the global object
    pub(crate) fn resolve_global_type(&self, name: &QualifiedName) -> VmResult<Option<ObjRef>> {
        let global = self.gc.heap.get(self.global)?;
        let preferred: Vec<IStr> = global.namespaces().iter().rev().cloned().collect();
        let Some(slot) = global.store().lookup_preferring(name, &preferred) else {
            return Ok(None);
        };
        let value = global.store().get(slot)?;
        Ok(value.as_object().filter(|ty| self.type_obj(*ty).is_ok()))
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::Interpreter;
    use crate::module::Service;
    use crate::options::VmOptions;
    use std::sync::Arc;

    #[test]
    fn test_resolve_global_type_by_name() {
        let interp = Interpreter::new(Arc::new(Service::new()), VmOptions::default()).unwrap();
        let name = interp.qname("", "TypeError");
        let found = interp.resolve_global_type(&name).unwrap();
        let expected = interp.core_types().error(crate::error::ErrorKind::TypeError);
        assert_eq!(found, Some(expected));
        assert_eq!(interp.resolve_global_type(&interp.qname("", "Nope")).unwrap(), None);
    }
}
