use super::{misrouted, Operands};
use crate::error::VmResult;
use crate::interpreter::execution::ControlFlow;
use crate::interpreter::Interpreter;
use crate::value::Value;
use strix_bytecode::Opcode;

impl Interpreter {
    /// Operators dispatch on the left operand's type
    pub(in crate::interpreter) fn exec_operator_ops(
        &mut self,
        opcode: Opcode,
        operands: &Operands,
    ) -> VmResult<ControlFlow> {
        let result = match opcode {
            Opcode::Neg | Opcode::BitNot | Opcode::LogicalNot => {
                let value = self.pop()?;
                self.invoke_operator(&value, opcode, None)?
            }

            Opcode::Inc => {
                let value = self.pop()?;
                let delta = Value::Number(operands.nums[0] as f64);
                self.invoke_operator(&value, opcode, Some(&delta))?
            }

            _ if opcode.is_operator() => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.invoke_operator(&lhs, opcode, Some(&rhs))?
            }

            _ => return Err(misrouted(opcode)),
        };
        self.push(result);
        Ok(ControlFlow::Continue)
    }
}
