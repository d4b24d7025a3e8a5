//! Call frames

use crate::object::Code;
use crate::value::{ObjRef, Value};
use std::sync::Arc;

/// What a returning frame hands to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnMode {
    /// The returned value
    Value,
    /// `this`, unless the function returned an object (constructors)
    This,
    /// Nothing (`super` constructor calls)
    Discard,
}

/// Exception parked while a finally handler runs
#[derive(Debug, Clone)]
pub(crate) struct PendingFinally {
    /// Index of the finally handler in the function's handler table
    pub handler: usize,
    pub exception: Value,
}

/// Activation of a bytecode function
#[derive(Debug)]
pub(crate) struct Frame {
    pub function: ObjRef,
    pub code: Arc<Code>,
    pub this: Value,
    /// Block holding arguments and locals
    pub activation: ObjRef,
    /// Lexical blocks opened inside the function, innermost last
    pub blocks: Vec<ObjRef>,
    /// Next instruction
    pub pc: usize,
    /// Start of the instruction being executed
    pub instr_start: usize,
    /// Operand stack height at entry
    pub stack_base: usize,
    /// Arguments actually supplied
    pub argc: usize,
    /// Frame was entered from Rust; returning from it ends that execution
    pub entry: bool,
    pub return_mode: ReturnMode,
    pub finally: Vec<PendingFinally>,
}

impl Frame {
    /// Innermost scope of the frame
    pub fn innermost(&self) -> ObjRef {
        self.blocks.last().copied().unwrap_or(self.activation)
    }

    /// Every object the frame keeps alive
    pub fn references(&self) -> impl Iterator<Item = ObjRef> + '_ {
        [self.function, self.activation]
            .into_iter()
            .chain(self.this.as_object())
            .chain(self.blocks.iter().copied())
            .chain(self.finally.iter().filter_map(|p| p.exception.as_object()))
    }
}
