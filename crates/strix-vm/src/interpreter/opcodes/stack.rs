use super::{misrouted, Operands};
use crate::error::VmResult;
use crate::interpreter::execution::ControlFlow;
use crate::interpreter::Interpreter;
use crate::object::Code;
use crate::value::Value;
use strix_bytecode::Opcode;

impl Interpreter {
    pub(in crate::interpreter) fn exec_stack_ops(
        &mut self,
        opcode: Opcode,
        operands: &Operands,
        code: &Code,
    ) -> VmResult<ControlFlow> {
        match opcode {
            Opcode::Nop => {}

            Opcode::Pop => {
                self.pop()?;
            }

            Opcode::Dup => {
                let top = self.peek(0)?.clone();
                self.push(top);
            }

            Opcode::Dup2 => {
                let second = self.peek(1)?.clone();
                let top = self.peek(0)?.clone();
                self.push(second);
                self.push(top);
            }

            Opcode::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a);
                self.push(b);
            }

            Opcode::LoadUndefined => self.push(Value::Undefined),
            Opcode::LoadNull => self.push(Value::Null),
            Opcode::LoadTrue => self.push(Value::Boolean(true)),
            Opcode::LoadFalse => self.push(Value::Boolean(false)),
            Opcode::LoadInt => self.push(Value::Number(operands.nums[0] as f64)),
            Opcode::LoadDouble => self.push(Value::Number(operands.double)),

            Opcode::LoadString => {
                let text = operands.string(code, 0)?.clone();
                self.push(Value::String(text));
            }

            Opcode::LoadThis => {
                let this = self.frame()?.this.clone();
                self.push(this);
            }

            Opcode::LoadGlobal => self.push(Value::Object(self.global)),

            _ => return Err(misrouted(opcode)),
        }
        Ok(ControlFlow::Continue)
    }
}
