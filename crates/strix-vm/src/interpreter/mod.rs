//! Interpreter instances and bytecode execution

mod boot;
mod core;
mod exceptions;
mod execution;
mod frame;
mod opcodes;

pub use self::core::Interpreter;
pub use boot::CoreTypes;
