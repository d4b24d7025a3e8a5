//! Opcode handlers
//!
//! Each module implements a category of opcode handlers as methods on
//! `Interpreter`. [`decode`] reads one instruction into a fixed-size
//! [`Operands`] record so the dispatch loop never allocates.

mod calls;
mod control_flow;
mod objects;
mod operators;
mod stack;
mod types;
mod variables;

use super::core::Interpreter;
use super::execution::ControlFlow;
use crate::error::{VmError, VmResult};
use crate::intern::IStr;
use crate::object::{Code, QualifiedName};
use strix_bytecode::{BytecodeReader, DecodeError, Opcode, Operand};

/// Decoded operands of one instruction
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Operands {
    /// `Num` and `Str` operands in order
    pub nums: [i64; 3],
    pub double: f64,
    /// Absolute target of a `Jump` operand
    pub target: usize,
    /// Offset of the entry count of a `JumpTable` operand
    pub table: usize,
}

impl Operands {
    /// `Num` operand `index` as a slot or count
    pub fn index(&self, index: usize) -> VmResult<usize> {
        let raw = self.nums[index];
        usize::try_from(raw).map_err(|_| VmError::instruction(format!("Negative operand {}", raw)))
    }

    /// Pooled string named by `Str` operand `index`
    pub fn string<'c>(&self, code: &'c Code, index: usize) -> VmResult<&'c IStr> {
        code.strings.get(self.nums[index])
    }

    /// Qualified name from the `(space, name)` operands starting at `index`
    pub fn qname(&self, code: &Code, index: usize) -> VmResult<QualifiedName> {
        Ok(QualifiedName::new(
            self.string(code, index)?.clone(),
            self.string(code, index + 1)?.clone(),
        ))
    }
}

fn malformed(pc: usize) -> impl Fn(DecodeError) -> VmError {
    move |err| VmError::instruction(format!("Bad instruction at offset {}: {}", pc, err))
}

/// Decode the instruction at `pc`; returns the opcode, its operands and the
/// offset of the next instruction
pub(crate) fn decode(code: &[u8], pc: usize) -> VmResult<(Opcode, Operands, usize)> {
    let mut reader = BytecodeReader::at(code, pc);
    let byte = reader.read_u8().map_err(malformed(pc))?;
    let opcode =
        Opcode::from_u8(byte).ok_or_else(|| VmError::instruction(format!("Invalid opcode {:#04x} at offset {}", byte, pc)))?;

    let mut operands = Operands::default();
    let mut nums = 0;
    let mut jump = None;
    for operand in opcode.operands() {
        match operand {
            Operand::Num | Operand::Str => {
                operands.nums[nums] = reader.read_num().map_err(malformed(pc))?;
                nums += 1;
            }
            Operand::Double => operands.double = reader.read_f64().map_err(malformed(pc))?,
            Operand::Jump => jump = Some(reader.read_i32().map_err(malformed(pc))?),
            Operand::JumpTable => {
                operands.table = reader.position();
                let count = reader.read_num().map_err(malformed(pc))?;
                let count = usize::try_from(count).map_err(|_| VmError::instruction("Negative jump table size"))?;
                let end = reader.position() + count * 4;
                if end > code.len() {
                    return Err(VmError::instruction(format!("Truncated jump table at offset {}", pc)));
                }
                reader.seek(end);
            }
        }
    }
    let next = reader.position();
    if let Some(relative) = jump {
        operands.target = jump_target(next, relative, code.len())?;
    }
    Ok((opcode, operands, next))
}

/// Absolute target of a jump relative to `from`
pub(crate) fn jump_target(from: usize, relative: i32, len: usize) -> VmResult<usize> {
    let target = from as i64 + i64::from(relative);
    if target < 0 || target as usize > len {
        return Err(VmError::instruction(format!("Jump target {} outside the code", target)));
    }
    Ok(target as usize)
}

impl Interpreter {
    /// Route an instruction to its category handler
    pub(crate) fn dispatch(&mut self, opcode: Opcode, operands: &Operands, code: &Code) -> VmResult<ControlFlow> {
        match opcode as u8 {
            0x00..=0x0F => self.exec_stack_ops(opcode, operands, code),
            0x10..=0x2F => self.exec_variable_ops(opcode, operands, code),
            0x30..=0x3F => self.exec_object_ops(opcode, operands, code),
            0x40..=0x4F => self.exec_call_ops(opcode, operands, code),
            0x50..=0x5F => self.exec_control_flow_ops(opcode, operands, code),
            0x60..=0x7F => self.exec_operator_ops(opcode, operands),
            _ => self.exec_type_ops(opcode),
        }
    }
}

/// Error for an opcode routed to the wrong handler
pub(crate) fn misrouted(opcode: Opcode) -> VmError {
    VmError::internal(format!("Opcode {} dispatched to the wrong handler", opcode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_bytecode::BytecodeWriter;

    #[test]
    fn test_decode_name_operands() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::CallObjName);
        w.emit_num(4);
        w.emit_num(9);
        w.emit_num(2);
        w.emit_op(Opcode::Nop);
        let (op, operands, next) = decode(w.buffer(), 0).unwrap();
        assert_eq!(op, Opcode::CallObjName);
        assert_eq!(operands.nums, [4, 9, 2]);
        assert_eq!(operands.index(2).unwrap(), 2);
        assert_eq!(decode(w.buffer(), next).unwrap().0, Opcode::Nop);
    }

    #[test]
    fn test_decode_jump_is_absolute() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Nop);
        w.emit_jump_to(Opcode::Goto, 0);
        let (_, operands, next) = decode(w.buffer(), 1).unwrap();
        assert_eq!(next, 6);
        assert_eq!(operands.target, 0);
    }

    #[test]
    fn test_decode_skips_jump_table() {
        let mut w = BytecodeWriter::new();
        let patches = w.emit_default_args(2);
        let table_end = w.offset();
        for patch in patches {
            w.patch_table_entry(patch, table_end, table_end);
        }
        w.emit_op(Opcode::ReturnUndefined);
        let (op, operands, next) = decode(w.buffer(), 0).unwrap();
        assert_eq!(op, Opcode::InitDefaultArgs);
        assert_eq!(operands.table, 1);
        assert_eq!(next, table_end);
    }

    #[test]
    fn test_decode_rejects_invalid_opcode() {
        let err = decode(&[0xFF], 0).unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::InstructionError));
        assert!(decode(&[Opcode::LoadDouble as u8, 0, 0], 0).is_err());
    }
}
