use super::{misrouted, Operands};
use crate::error::{VmError, VmResult};
use crate::helpers::pot::type_chain;
use crate::interpreter::execution::{ControlFlow, Invoked};
use crate::interpreter::frame::ReturnMode;
use crate::interpreter::Interpreter;
use crate::object::{Code, ObjKind};
use crate::value::Value;
use strix_bytecode::Opcode;

impl Interpreter {
    pub(in crate::interpreter) fn exec_call_ops(
        &mut self,
        opcode: Opcode,
        operands: &Operands,
        code: &Code,
    ) -> VmResult<ControlFlow> {
        match opcode {
            Opcode::Call => {
                let args = self.pop_n(operands.index(0)?)?;
                let function = self.pop()?;
                let this = self.pop()?;
                self.call_value(function, this, args, ReturnMode::Value)?;
            }

            Opcode::CallObjName => {
                let name = operands.qname(code, 0)?;
                let args = self.pop_n(operands.index(2)?)?;
                let obj = self.pop()?;
                let function = self.get_property_by_name(&obj, &name)?;
                if !self.is_callable(&function) {
                    return Err(VmError::type_error(format!(
                        "{}.{} is not a function",
                        self.type_name_of(&obj),
                        name
                    )));
                }
                self.call_value(function, obj, args, ReturnMode::Value)?;
            }

            Opcode::CallObjSlot => {
                let slot = operands.index(0)?;
                let args = self.pop_n(operands.index(1)?)?;
                let obj = self.pop()?;
                let function = self.method_at(&obj, slot)?;
                self.call_value(function, obj, args, ReturnMode::Value)?;
            }

            Opcode::CallGlobalSlot => {
                let args = self.pop_n(operands.index(1)?)?;
                let global = self.global();
                let function = self.get_property(&global, operands.index(0)?)?;
                self.call_value(function, global, args, ReturnMode::Value)?;
            }

            Opcode::CallSuper => {
                let args = self.pop_n(operands.index(0)?)?;
                let (function, this) = {
                    let frame = self.frame()?;
                    (frame.function, frame.this.clone())
                };
                let owner = self.gc.heap.get(function)?.as_function().and_then(|f| f.owner);
                let base = match owner {
                    Some(owner) => self.type_obj(owner)?.base,
                    None => return Err(VmError::instruction("Super call outside a method")),
                };
                if let Some(base) = base {
                    let mut constructor = None;
                    for ty in type_chain(self, base)? {
                        if let Some(found) = self.type_obj(ty)?.constructor {
                            constructor = Some(found);
                            break;
                        }
                    }
                    if let Some(constructor) = constructor {
                        self.call_value(Value::Object(constructor), this, args, ReturnMode::Discard)?;
                    }
                }
            }

            _ => return Err(misrouted(opcode)),
        }
        Ok(ControlFlow::Continue)
    }

    /// Start a call from bytecode. Natives finish here and their result is
    /// pushed; bytecode callees push it when their frame returns.
    fn call_value(&mut self, function: Value, this: Value, args: Vec<Value>, mode: ReturnMode) -> VmResult<()> {
        if let Invoked::Value(value) = self.invoke(function, this, args, mode, false)? {
            if mode != ReturnMode::Discard {
                self.push(value);
            }
        }
        Ok(())
    }

    /// Method in slot `slot`: a static for types, a prototype slot for
    /// instances
    fn method_at(&mut self, obj: &Value, slot: usize) -> VmResult<Value> {
        let is_type = obj
            .as_object()
            .and_then(|o| self.gc.heap.get(o).ok())
            .is_some_and(|o| matches!(o.kind, ObjKind::Type(_)));
        if is_type {
            return self.get_property(obj, slot);
        }
        let ty = self.type_of(obj);
        let prototype = &self.type_obj(ty)?.prototype;
        if slot >= prototype.len() {
            return Err(VmError::reference_error(format!(
                "{} has no method in slot {}",
                self.type_name_of(obj),
                slot
            )));
        }
        Ok(prototype.get(slot)?.clone())
    }
}
