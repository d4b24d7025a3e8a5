//! Strix VM Bytecode Definitions
//!
//! This crate provides the instruction set, the module binary format and
//! the constant pool structures consumed by the Strix virtual machine.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod constants;
pub mod encoder;
pub mod module;
pub mod opcode;
pub mod verify;

pub use constants::ConstantPool;
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError, JumpPatch, MAX_WORD};
pub use module::{
    compatible_versions, make_version, BlockDef, ClassDef, DependencyDef, ExceptionDef, FunctionDef,
    LineDef, ModuleDef, ModuleError, ModuleFile, ModuleHeader, PropertyDef, Section, SectionTag,
    TypeRef,
};
pub use opcode::{Opcode, Operand};
pub use verify::{decode_instruction, decode_instructions, verify_module, Instruction, VerifyError};
