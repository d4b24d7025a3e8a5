use super::misrouted;
use crate::error::{VmError, VmResult};
use crate::interpreter::execution::ControlFlow;
use crate::interpreter::Interpreter;
use crate::value::{ObjRef, Value};
use strix_bytecode::Opcode;

impl Interpreter {
    pub(in crate::interpreter) fn exec_type_ops(&mut self, opcode: Opcode) -> VmResult<ControlFlow> {
        match opcode {
            Opcode::TypeOf => {
                let value = self.pop()?;
                let name = self.type_name_of(&value);
                let name = self.intern(&name);
                self.push(Value::String(name));
            }

            Opcode::IsA => {
                let ty = self.pop_type()?;
                let value = self.pop()?;
                let result = self.is_instance_of(&value, ty);
                self.push(Value::Boolean(result));
            }

            Opcode::Cast => {
                let ty = self.pop_type()?;
                let value = self.pop()?;
                let result = if self.is_instance_of(&value, ty) {
                    value
                } else {
                    self.cast(&value, ty)?
                };
                self.push(result);
            }

            _ => return Err(misrouted(opcode)),
        }
        Ok(ControlFlow::Continue)
    }

    fn pop_type(&mut self) -> VmResult<ObjRef> {
        let value = self.pop()?;
        match value.as_object() {
            Some(ty) if self.type_obj(ty).is_ok() => Ok(ty),
            _ => Err(VmError::type_error(format!("{} is not a type", self.type_name_of(&value)))),
        }
    }
}
