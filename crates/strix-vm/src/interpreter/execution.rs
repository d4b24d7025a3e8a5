//! Execution loop and calls
//!
//! Bytecode-to-bytecode calls push a [`Frame`] and stay inside the same
//! loop. A call from Rust (the host, a native function, a getter run by a
//! helper) starts a nested loop that ends when its entry frame returns.
//! Errors travel as `Err` to [`Interpreter::unwind`], which either finds a
//! handler and resumes the loop or hands the error to the caller.

use super::core::Interpreter;
use super::frame::{Frame, ReturnMode};
use super::opcodes::decode;
use crate::defaults::{MAX_ARGS, MAX_NESTED_CALLS, MIN_FRAME_SLOTS};
use crate::error::{VmError, VmResult};
use crate::helpers::pot::type_chain;
use crate::object::{Block, BlockKind, FunctionBody, HeapObject, Layout, NativeFn, ObjKind};
use crate::options::HostMode;
use crate::value::{ObjRef, Value};
use std::sync::Arc;
use tracing::{trace, warn};

/// Outcome of one instruction
#[derive(Debug)]
pub(crate) enum ControlFlow {
    /// Go on with the next instruction of the current frame
    Continue,
    /// The current frame returns
    Return(Value),
}

/// Outcome of starting a call
#[derive(Debug)]
pub(crate) enum Invoked {
    /// Finished without bytecode (natives, trivial constructions)
    Value(Value),
    /// A frame was pushed and runs on the next iteration
    Frame,
}

enum Target {
    Native(NativeFn),
    Code,
    Abstract,
    Type,
}

impl Interpreter {
    // =========================================================================
    // Host entry points
    // =========================================================================

    /// Call a function from the host
    ///
    /// An uncaught exception ends the call with [`VmError::Thrown`]; the
    /// thrown value stays available through [`Self::exception`].
    pub fn run_function(&mut self, function: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        self.check_live()?;
        let outermost = self.nesting == 0;
        if outermost {
            self.exception = None;
        }
        let outcome = match self.call_function(function, this, args) {
            Err(VmError::Raised { kind, message }) if !self.aborted => {
                let exception = self.materialize(kind, &message)?;
                let description = self.describe(&exception);
                self.exception = Some(exception);
                Err(VmError::Thrown(description))
            }
            other => other,
        };
        if outermost {
            self.fault = None;
            match &outcome {
                Ok(value) => self.result = value.clone(),
                Err(err) => self.report_uncaught(err),
            }
        }
        outcome
    }

    /// Load a module file image and run its initializers. In standalone
    /// mode an uncaught exception or a nonzero exit ends the process.
    pub fn run_program(&mut self, bytes: &[u8]) -> VmResult<Value> {
        let outcome = self.load_module_bytes(bytes).map(|_| self.result.clone());
        if self.options.mode == HostMode::Standalone {
            if let Some(status) = self.exit_status.filter(|status| *status != 0) {
                std::process::exit(status);
            }
            if matches!(&outcome, Err(err) if !matches!(err, VmError::Exiting)) {
                std::process::exit(1);
            }
        }
        outcome
    }

    /// Call any callable value and run it to completion. Re-entrant: may be
    /// used by natives and helpers while script code is running.
    pub fn call_function(&mut self, function: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        self.check_live()?;
        if self.nesting >= MAX_NESTED_CALLS {
            return Err(self.stack_overflow());
        }
        self.nesting += 1;
        let base = self.frames.len();
        let outcome = match self.invoke(function.clone(), this, args.to_vec(), ReturnMode::Value, true) {
            Ok(Invoked::Value(value)) => Ok(value),
            Ok(Invoked::Frame) => self.execute(base),
            Err(err) => Err(err),
        };
        self.nesting -= 1;
        outcome
    }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Run until the entry frame at index `base` returns
    pub(crate) fn execute(&mut self, base: usize) -> VmResult<Value> {
        loop {
            if self.nesting == 1 && self.gc.should_collect() {
                self.collect_garbage();
            }
            let outcome = match self.step() {
                Ok(ControlFlow::Continue) => continue,
                Ok(ControlFlow::Return(value)) => self.return_from_frame(value),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(err) => self.unwind(err, base)?,
            }
        }
    }

    fn step(&mut self) -> VmResult<ControlFlow> {
        let (code, pc) = {
            let frame = self.frame()?;
            (Arc::clone(&frame.code), frame.pc)
        };
        if pc >= code.bytes.len() {
            return Ok(ControlFlow::Return(Value::Undefined));
        }
        let (opcode, operands, next) = decode(&code.bytes, pc)?;
        {
            let frame = self.frame_mut()?;
            frame.instr_start = pc;
            frame.pc = next;
        }
        trace!(pc, op = opcode.name(), depth = self.frames.len(), "dispatch");
        self.dispatch(opcode, &operands, &code)
    }

    /// Pop the current frame; `Some` when it was the entry frame
    fn return_from_frame(&mut self, value: Value) -> VmResult<Option<Value>> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::internal("Return without an active frame"))?;
        self.stack.truncate(frame.stack_base);
        let value = returned(value, frame.this, frame.return_mode);
        if frame.entry {
            return Ok(Some(value));
        }
        if frame.return_mode != ReturnMode::Discard {
            self.stack.push(value);
        }
        Ok(None)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Start a call. Bytecode callees get a frame; everything else runs to
    /// completion here.
    pub(crate) fn invoke(
        &mut self,
        callee: Value,
        this: Value,
        args: Vec<Value>,
        mode: ReturnMode,
        entry: bool,
    ) -> VmResult<Invoked> {
        if self.exit.is_requested() {
            return Err(VmError::Exiting);
        }
        let Some(obj) = callee.as_object() else {
            return Err(VmError::type_error(format!("{} is not a function", self.type_name_of(&callee))));
        };
        let (target, bound_this, bound_args) = match &self.gc.heap.get(obj)?.kind {
            ObjKind::Function(function) => {
                let target = match function.body {
                    FunctionBody::Native(f) => Target::Native(f),
                    FunctionBody::Code(_) => Target::Code,
                    FunctionBody::Abstract => Target::Abstract,
                };
                (target, function.bound_this.clone(), function.bound_args.clone())
            }
            ObjKind::Type(_) => (Target::Type, None, Vec::new()),
            _ => {
                return Err(VmError::type_error(format!("{} is not a function", self.type_name_of(&callee))));
            }
        };
        let this = bound_this.unwrap_or(this);
        let args = if bound_args.is_empty() {
            args
        } else {
            bound_args.into_iter().chain(args).collect()
        };
        if args.len() > MAX_ARGS {
            return Err(VmError::argument_error(format!("Too many arguments ({})", args.len())));
        }

        match target {
            Target::Native(f) => {
                let value = self.call_native(f, this.clone(), &args)?;
                Ok(Invoked::Value(returned(value, this, mode)))
            }
            Target::Code => {
                self.push_frame(obj, this, args, mode, entry)?;
                Ok(Invoked::Frame)
            }
            Target::Abstract => {
                let name = self.function_name(obj);
                Err(VmError::type_error(format!("Cannot call abstract function {}", name)))
            }
            Target::Type => self.construct(obj, args, entry),
        }
    }

    /// Run a native function with the nesting guard
    pub(crate) fn call_native(&mut self, f: NativeFn, this: Value, args: &[Value]) -> VmResult<Value> {
        if self.nesting >= MAX_NESTED_CALLS {
            return Err(self.stack_overflow());
        }
        self.nesting += 1;
        let outcome = f(self, this, args);
        self.nesting -= 1;
        outcome
    }

    /// Create an instance of `ty`, run the instance initializers base
    /// first, then the nearest constructor in the base chain
    pub(crate) fn construct(&mut self, ty: ObjRef, args: Vec<Value>, entry: bool) -> VmResult<Invoked> {
        let core = self.core;
        if [core.boolean, core.number, core.string].contains(&ty) {
            if let Some(first) = args.first() {
                return Ok(Invoked::Value(self.cast(first, ty)?));
            }
        }
        let instance = self.create_instance(ty, 0)?;
        let chain = type_chain(self, ty)?;
        for current in chain.iter().rev() {
            if let Some(initializer) = self.type_obj(*current)?.initializer {
                self.call_function(&Value::Object(initializer), instance.clone(), &[])?;
            }
        }
        let mut constructor = None;
        for current in &chain {
            if let Some(found) = self.type_obj(*current)?.constructor {
                constructor = Some(found);
                break;
            }
        }
        match constructor {
            Some(constructor) => self.invoke(Value::Object(constructor), instance, args, ReturnMode::This, entry),
            None => Ok(Invoked::Value(instance)),
        }
    }

    /// Push a frame for a bytecode function: bind arguments into a fresh
    /// activation cloned from the function's template
    pub(crate) fn push_frame(
        &mut self,
        function: ObjRef,
        this: Value,
        mut args: Vec<Value>,
        mode: ReturnMode,
        entry: bool,
    ) -> VmResult<()> {
        if self.frames.len() >= self.options.max_recursion {
            return Err(self.stack_overflow());
        }
        // Functions without a bound scope run against the caller's blocks
        let fallback_scope = self.frames.last().map_or(self.global, Frame::innermost);
        let (code, mut store, num_args, required, has_rest, tolerant, scope, name) = {
            let f = self
                .gc
                .heap
                .get(function)?
                .as_function()
                .ok_or_else(|| VmError::internal("Frame pushed for a non-function"))?;
            let code = f
                .code()
                .cloned()
                .ok_or_else(|| VmError::internal(format!("Function {} has no bytecode", f.name)))?;
            let extra = MIN_FRAME_SLOTS.saturating_sub(f.activation.len());
            (
                code,
                f.activation.clone_as(Layout::Separate, extra),
                f.num_args,
                f.required_args(),
                f.has_rest(),
                f.tolerates_arg_count(),
                f.scope.unwrap_or(fallback_scope),
                f.name.clone(),
            )
        };

        let argc = args.len();
        if argc < required && !tolerant {
            return Err(VmError::argument_error(format!(
                "{} expects at least {} arguments, got {}",
                name, required, argc
            )));
        }
        let fixed = if has_rest { num_args.saturating_sub(1) } else { num_args };
        if argc > fixed && !has_rest && !tolerant {
            return Err(VmError::argument_error(format!(
                "{} expects at most {} arguments, got {}",
                name, fixed, argc
            )));
        }
        let extra = if args.len() > fixed { args.split_off(fixed) } else { Vec::new() };
        for (slot, value) in args.into_iter().enumerate() {
            if slot < store.len() {
                store.init_value(slot, value)?;
            } else {
                store.set_growing(slot, value)?;
            }
        }
        if has_rest {
            let rest = self.new_array(extra)?;
            store.set_growing(fixed, rest)?;
        } else if !extra.is_empty() {
            warn!(function = %name, dropped = extra.len(), "extra arguments dropped");
        }

        let block = Block::new(BlockKind::Activation, store, Some(scope));
        let activation = self.alloc(HeapObject::new(self.core.block, true, ObjKind::Block(block)))?;
        let stack_base = self.stack.len();
        self.frames.push(Frame {
            function,
            code,
            this,
            activation,
            blocks: Vec::new(),
            pc: 0,
            instr_start: 0,
            stack_base,
            argc,
            entry,
            return_mode: mode,
            finally: Vec::new(),
        });
        Ok(())
    }

    // =========================================================================
    // Frame and operand stack access
    // =========================================================================

    pub(crate) fn frame(&self) -> VmResult<&Frame> {
        self.frames.last().ok_or_else(|| VmError::internal("No active frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.frames.last_mut().ok_or_else(|| VmError::internal("No active frame"))
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop an operand of the current frame
    pub(crate) fn pop(&mut self) -> VmResult<Value> {
        let base = self.frame()?.stack_base;
        if self.stack.len() <= base {
            return Err(VmError::instruction("Operand stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| VmError::instruction("Operand stack underflow"))
    }

    /// Pop `count` operands, oldest first
    pub(crate) fn pop_n(&mut self, count: usize) -> VmResult<Vec<Value>> {
        let base = self.frame()?.stack_base;
        if self.stack.len() < base + count {
            return Err(VmError::instruction("Operand stack underflow"));
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    /// Top operand without popping
    pub(crate) fn peek(&self, depth: usize) -> VmResult<&Value> {
        let base = self.frame()?.stack_base;
        let len = self.stack.len();
        if len < base + depth + 1 {
            return Err(VmError::instruction("Operand stack underflow"));
        }
        Ok(&self.stack[len - depth - 1])
    }

    /// Qualified name of a function, for messages
    pub(crate) fn function_name(&self, function: ObjRef) -> String {
        self.gc
            .heap
            .get(function)
            .ok()
            .and_then(|o| o.as_function())
            .map(|f| f.name.to_string())
            .unwrap_or_else(|| "<anonymous>".to_string())
    }
}

/// Value a call produces for its caller
fn returned(value: Value, this: Value, mode: ReturnMode) -> Value {
    match mode {
        ReturnMode::Value => value,
        ReturnMode::This if matches!(value, Value::Object(_)) => value,
        ReturnMode::This => this,
        ReturnMode::Discard => Value::Undefined,
    }
}
