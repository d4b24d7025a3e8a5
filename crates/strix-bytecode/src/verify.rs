//! Structural bytecode verification
//!
//! The verifier decodes every instruction of every function and checks
//! that operands are well formed, jumps land on instruction boundaries and
//! exception handler ranges lie inside the code. It does not track operand
//! stack depth; the interpreter checks that at run time.

use crate::constants::ConstantPool;
use crate::encoder::BytecodeReader;
use crate::module::{ExceptionDef, ModuleDef, Section};
use crate::opcode::{Opcode, Operand};
use rustc_hash::FxHashSet;

/// Bytecode verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Invalid opcode
    #[error("Invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode {
        /// Offending byte
        opcode: u8,
        /// Offset of the byte
        offset: usize,
    },

    /// Operand runs past the end of the code
    #[error("Truncated operand for {opcode} at offset {offset}")]
    TruncatedOperand {
        /// Instruction opcode
        opcode: Opcode,
        /// Offset of the instruction
        offset: usize,
    },

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Absolute target
        target: i64,
        /// Offset of the jumping instruction
        offset: usize,
    },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference {index} at offset {offset}")]
    InvalidConstantRef {
        /// Pool offset
        index: i64,
        /// Offset of the instruction
        offset: usize,
    },

    /// Handler range outside the code or inverted
    #[error("Invalid exception handler {index} in function {function}")]
    InvalidHandler {
        /// Function name
        function: String,
        /// Handler index
        index: usize,
    },

    /// Handler count disagrees with the function header
    #[error("Function {function} declares {declared} handlers but has {found}")]
    HandlerCountMismatch {
        /// Function name
        function: String,
        /// Count from the function section
        declared: u32,
        /// Exception sections found
        found: u32,
    },
}

/// Decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the opcode byte
    pub offset: usize,
    /// Opcode
    pub opcode: Opcode,
    /// Number and string operands in order
    pub numbers: Vec<i64>,
    /// Absolute jump targets
    pub targets: Vec<i64>,
    /// Double operand, if any
    pub double: Option<f64>,
    /// Offset of the next instruction
    pub next: usize,
}

/// Decode one instruction starting at `offset`
pub fn decode_instruction(code: &[u8], offset: usize) -> Result<Instruction, VerifyError> {
    let mut reader = BytecodeReader::at(code, offset);
    let byte = reader.read_u8().map_err(|_| VerifyError::InvalidOpcode { opcode: 0, offset })?;
    let opcode = Opcode::from_u8(byte).ok_or(VerifyError::InvalidOpcode { opcode: byte, offset })?;
    let truncated = |_| VerifyError::TruncatedOperand { opcode, offset };

    let mut numbers = Vec::new();
    let mut targets = Vec::new();
    let mut double = None;
    let mut relative = Vec::new();
    for operand in opcode.operands() {
        match operand {
            Operand::Num | Operand::Str => numbers.push(reader.read_num().map_err(truncated)?),
            Operand::Double => double = Some(reader.read_f64().map_err(truncated)?),
            Operand::Jump => relative.push(reader.read_i32().map_err(truncated)?),
            Operand::JumpTable => {
                let count = reader.read_num().map_err(truncated)?;
                if !(0..=i64::from(u16::MAX)).contains(&count) {
                    return Err(VerifyError::TruncatedOperand { opcode, offset });
                }
                numbers.push(count);
                for _ in 0..count {
                    relative.push(reader.read_i32().map_err(truncated)?);
                }
            }
        }
    }
    let next = reader.position();
    targets.extend(relative.into_iter().map(|rel| next as i64 + rel as i64));
    Ok(Instruction {
        offset,
        opcode,
        numbers,
        targets,
        double,
        next,
    })
}

/// Decode every instruction in `code`
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>, VerifyError> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let instruction = decode_instruction(code, offset)?;
        offset = instruction.next;
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// Verify one function body against its pool and handlers
pub fn verify_code(
    name: &str,
    code: &[u8],
    pool: &ConstantPool,
    handlers: &[ExceptionDef],
) -> Result<(), VerifyError> {
    let instructions = decode_instructions(code)?;
    let boundaries: FxHashSet<i64> = instructions
        .iter()
        .map(|i| i.offset as i64)
        .chain(std::iter::once(code.len() as i64))
        .collect();

    for instruction in &instructions {
        for target in &instruction.targets {
            if !boundaries.contains(target) {
                return Err(VerifyError::InvalidJumpTarget {
                    target: *target,
                    offset: instruction.offset,
                });
            }
        }
        let strings: &[usize] = match instruction.opcode.operands() {
            [Operand::Str] => &[0],
            [Operand::Str, Operand::Str] | [Operand::Str, Operand::Str, Operand::Num] => &[0, 1],
            _ => &[],
        };
        for index in strings {
            let offset = instruction.numbers[*index];
            if pool.get(offset).is_err() {
                return Err(VerifyError::InvalidConstantRef {
                    index: offset,
                    offset: instruction.offset,
                });
            }
        }
    }

    let len = code.len() as u32;
    for (index, handler) in handlers.iter().enumerate() {
        let valid = handler.try_start <= handler.try_end
            && handler.try_end <= len
            && handler.handler_start <= handler.handler_end
            && handler.handler_end <= len
            && boundaries.contains(&(handler.handler_start as i64));
        if !valid {
            return Err(VerifyError::InvalidHandler {
                function: name.to_string(),
                index,
            });
        }
    }
    Ok(())
}

/// Verify every function of a module
pub fn verify_module(module: &ModuleDef) -> Result<(), VerifyError> {
    let mut sections = module.sections.iter().peekable();
    while let Some(section) = sections.next() {
        let Section::Function(fun) = section else {
            continue;
        };
        let mut handlers = Vec::new();
        while let Some(Section::Exception(ex)) = sections.peek() {
            handlers.push(ex.clone());
            sections.next();
        }
        if handlers.len() as u32 != fun.exception_count {
            return Err(VerifyError::HandlerCountMismatch {
                function: fun.name.clone(),
                declared: fun.exception_count,
                found: handlers.len() as u32,
            });
        }
        verify_code(&fun.name, &fun.code, &module.constants, &handlers)?;
    }
    Ok(())
}
