//! Byte-level encoding and decoding utilities
//!
//! Everything in a module file is built from four primitives: raw bytes,
//! little-endian fixed-width integers, IEEE doubles and the variable-length
//! signed number encoding described below.
//!
//! # Number encoding
//!
//! ```text
//! first byte:  [cont:1][value:6][sign:1]
//! next bytes:  [cont:1][value:7]
//! ```
//!
//! The magnitude is stored least-significant group first. Values in
//! `-63..=63` fit in a single byte, `MAX_WORD` needs four.

use crate::opcode::Opcode;
use thiserror::Error;

/// Largest value the format treats as a "word" (27 bits)
pub const MAX_WORD: i64 = 0x07FF_FFFF;

/// Largest magnitude that fits in a single encoded byte
pub const MAX_SINGLE_BYTE: i64 = 0x3F;

/// Errors that can occur during decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of input
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    /// Encoded number does not fit in 64 bits
    #[error("Encoded number overflows at offset {0}")]
    NumberOverflow(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// String offset outside the constant pool
    #[error("String offset {0} is outside the constant pool")]
    BadStringOffset(i64),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),
}

/// Number of bytes `value` occupies once encoded
pub fn encoded_len(value: i64) -> usize {
    let mut magnitude = value.unsigned_abs() >> 6;
    let mut len = 1;
    while magnitude != 0 {
        magnitude >>= 7;
        len += 1;
    }
    len
}

/// Writer for module and bytecode buffers
#[derive(Debug, Default, Clone)]
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

/// Pending forward jump, patched once the target is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "forward jumps must be patched"]
pub struct JumpPatch {
    operand_at: usize,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (length of the buffer)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a variable-length signed number
    pub fn emit_num(&mut self, value: i64) {
        let mut magnitude = value.unsigned_abs();
        let mut byte = if value < 0 { 0x1 } else { 0x0 };
        byte |= ((magnitude & 0x3F) as u8) << 1;
        magnitude >>= 6;
        while magnitude != 0 {
            self.buffer.push(byte | 0x80);
            byte = (magnitude & 0x7F) as u8;
            magnitude >>= 7;
        }
        self.buffer.push(byte);
    }

    /// Overwrite a previously emitted `i32`
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ===== Instruction Emission =====

    /// Emit an opcode without operands
    pub fn emit_op(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Emit an opcode followed by one number operand
    pub fn emit_op_num(&mut self, opcode: Opcode, operand: i64) {
        self.emit_op(opcode);
        self.emit_num(operand);
    }

    /// Emit an opcode followed by two number operands
    pub fn emit_op_num2(&mut self, opcode: Opcode, first: i64, second: i64) {
        self.emit_op(opcode);
        self.emit_num(first);
        self.emit_num(second);
    }

    /// Emit an opcode whose operands are a qualified name (pool offsets)
    pub fn emit_op_name(&mut self, opcode: Opcode, space: u32, name: u32) {
        self.emit_op(opcode);
        self.emit_num(space as i64);
        self.emit_num(name as i64);
    }

    /// Emit `LoadDouble`
    pub fn emit_load_double(&mut self, value: f64) {
        self.emit_op(Opcode::LoadDouble);
        self.emit_f64(value);
    }

    /// Emit a jump whose target is not yet known
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpPatch {
        self.emit_op(opcode);
        let operand_at = self.offset();
        self.emit_i32(0);
        JumpPatch { operand_at }
    }

    /// Point a forward jump at the current offset
    pub fn patch_jump(&mut self, patch: JumpPatch) {
        let target = self.offset();
        self.patch_jump_to(patch, target);
    }

    /// Point a forward jump at an explicit target
    pub fn patch_jump_to(&mut self, patch: JumpPatch, target: usize) {
        let relative = target as i64 - (patch.operand_at as i64 + 4);
        self.patch_i32(patch.operand_at, relative as i32);
    }

    /// Emit a jump to an already-known (usually backward) target
    pub fn emit_jump_to(&mut self, opcode: Opcode, target: usize) {
        self.emit_op(opcode);
        let end = self.offset() as i64 + 4;
        self.emit_i32((target as i64 - end) as i32);
    }

    /// Emit `InitDefaultArgs` with one entry per default argument.
    ///
    /// Returns the patches in table order; entry `i` is taken when the
    /// `i`-th default argument is the first one missing.
    pub fn emit_default_args(&mut self, count: usize) -> Vec<JumpPatch> {
        self.emit_op(Opcode::InitDefaultArgs);
        self.emit_num(count as i64);
        let mut patches = Vec::with_capacity(count);
        for _ in 0..count {
            patches.push(JumpPatch {
                operand_at: self.offset(),
            });
            self.emit_i32(0);
        }
        patches
    }

    /// Patch a jump-table entry relative to the end of its whole table
    pub fn patch_table_entry(&mut self, patch: JumpPatch, table_end: usize, target: usize) {
        let relative = target as i64 - table_end as i64;
        self.patch_i32(patch.operand_at, relative as i32);
    }
}

/// Reader over an encoded buffer
#[derive(Debug, Clone)]
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a reader positioned at the start of `buffer`
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Create a reader positioned at `position`
    pub fn at(buffer: &'a [u8], position: usize) -> Self {
        Self { buffer, position }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move to an absolute position
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check whether the reader reached the end
    pub fn is_at_end(&self) -> bool {
        self.position >= self.buffer.len()
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let value = *self
            .buffer
            .get(self.position)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        self.position += 1;
        Ok(value)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(DecodeError::UnexpectedEnd(self.buffer.len()))?;
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a variable-length signed number
    pub fn read_num(&mut self) -> Result<i64, DecodeError> {
        let start = self.position;
        let first = self.read_u8()?;
        let negative = first & 0x1 != 0;
        let mut magnitude = ((first >> 1) & 0x3F) as u64;
        let mut shift = 6u32;
        let mut more = first & 0x80 != 0;
        while more {
            let byte = self.read_u8()?;
            let bits = (byte & 0x7F) as u64;
            if shift >= 64 || (shift > 57 && bits >> (64 - shift) != 0) {
                return Err(DecodeError::NumberOverflow(start));
            }
            magnitude |= bits << shift;
            shift += 7;
            more = byte & 0x80 != 0;
        }
        if negative {
            if magnitude > 1u64 << 63 {
                return Err(DecodeError::NumberOverflow(start));
            }
            Ok((magnitude as i64).wrapping_neg())
        } else {
            i64::try_from(magnitude).map_err(|_| DecodeError::NumberOverflow(start))
        }
    }

    /// Read a number that must fit in a non-negative `u32`
    pub fn read_index(&mut self) -> Result<u32, DecodeError> {
        let start = self.position;
        let value = self.read_num()?;
        u32::try_from(value).map_err(|_| DecodeError::NumberOverflow(start))
    }

    /// Read an opcode byte
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let offset = self.position;
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))
    }
}
