use super::{jump_target, misrouted, Operands};
use crate::error::{VmError, VmResult};
use crate::interpreter::execution::ControlFlow;
use crate::interpreter::Interpreter;
use crate::object::Code;
use crate::value::Value;
use strix_bytecode::{BytecodeReader, Opcode};
use tracing::debug;

impl Interpreter {
    pub(in crate::interpreter) fn exec_control_flow_ops(
        &mut self,
        opcode: Opcode,
        operands: &Operands,
        code: &Code,
    ) -> VmResult<ControlFlow> {
        match opcode {
            Opcode::Goto => self.jump(operands.target, code)?,

            Opcode::BranchTrue => {
                if self.pop()?.truthy() {
                    self.jump(operands.target, code)?;
                }
            }

            Opcode::BranchFalse => {
                if !self.pop()?.truthy() {
                    self.jump(operands.target, code)?;
                }
            }

            Opcode::Return => {
                let value = self.pop()?;
                return Ok(ControlFlow::Return(value));
            }

            Opcode::ReturnUndefined => return Ok(ControlFlow::Return(Value::Undefined)),

            Opcode::Throw => {
                let value = self.pop()?;
                let description = self.describe(&value);
                self.exception = Some(value);
                return Err(VmError::Thrown(description));
            }

            Opcode::EndException => {
                let frame = self.frame_mut()?;
                let pc = frame.instr_start;
                let rethrow = frame
                    .finally
                    .last()
                    .is_some_and(|p| code.handlers.get(p.handler).is_some_and(|h| h.contains_handler(pc)));
                if rethrow {
                    if let Some(pending) = frame.finally.pop() {
                        let description = self.describe(&pending.exception);
                        self.exception = Some(pending.exception);
                        return Err(VmError::Thrown(description));
                    }
                }
            }

            Opcode::InitDefaultArgs => {
                let (argc, function, table_end) = {
                    let frame = self.frame()?;
                    (frame.argc, frame.function, frame.pc)
                };
                let required = self
                    .gc
                    .heap
                    .get(function)?
                    .as_function()
                    .map_or(0, |f| f.required_args());
                let first_missing = argc.saturating_sub(required);

                let mut reader = BytecodeReader::at(&code.bytes, operands.table);
                let count = reader.read_num().map_err(|e| VmError::instruction(e.to_string()))?;
                if (first_missing as i64) < count {
                    reader.seek(reader.position() + first_missing * 4);
                    let relative = reader.read_i32().map_err(|e| VmError::instruction(e.to_string()))?;
                    let target = jump_target(table_end, relative, code.bytes.len())?;
                    self.frame_mut()?.pc = target;
                }
            }

            _ => return Err(misrouted(opcode)),
        }
        Ok(ControlFlow::Continue)
    }

    /// Transfer control within the frame. Backward jumps observe exit
    /// requests. Leaving a finally handler by a jump drops its pending
    /// exception.
    fn jump(&mut self, target: usize, code: &Code) -> VmResult<()> {
        let frame = self.frame_mut()?;
        let backward = target <= frame.instr_start;
        let before = frame.finally.len();
        frame
            .finally
            .retain(|p| code.handlers.get(p.handler).is_some_and(|h| h.contains_handler(target)));
        if frame.finally.len() != before {
            debug!(target, "pending exception discarded by jump");
        }
        frame.pc = target;
        if backward && self.exit.is_requested() {
            return Err(VmError::Exiting);
        }
        Ok(())
    }
}
