//! Exception unwinding
//!
//! A raised error is turned into an instance of its error type, then the
//! handler tables of the active frames are searched innermost first. A
//! catch handler receives the exception on the operand stack. A finally
//! handler parks it in the frame; `EndException` at the end of the handler
//! throws it again unless the handler left by a jump or a return.

use super::core::Interpreter;
use super::frame::PendingFinally;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::object::{Attributes, CatchType, HandlerFlags, HeapObject, Layout, ObjKind, SlotHint};
use crate::value::{number_to_string, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

impl Interpreter {
    /// Exception left by the last failed run, if any
    pub fn exception(&self) -> Option<&Value> {
        self.exception.as_ref()
    }

    /// Take the pending exception
    pub fn clear_exception(&mut self) -> Option<Value> {
        self.exception.take()
    }

    /// Value returned by the last completed top-level run
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Pending exception as text: its description followed by the stack
    /// captured when it was created
    pub fn format_exception(&self) -> Option<String> {
        let exception = self.exception.as_ref()?;
        let mut text = self.describe(exception);
        if let Some(Value::String(trace)) = self.own_value(exception, &self.names.stack) {
            if !trace.is_empty() {
                text.push('\n');
                text.push_str(trace.as_str());
            }
        }
        Some(text)
    }

    /// Handle an error raised while frames above `base` were running. `Ok`
    /// when a handler took it and execution can resume.
    pub(crate) fn unwind(&mut self, error: VmError, base: usize) -> VmResult<()> {
        let exception = match error {
            VmError::Raised { kind, message } => self.materialize(kind, &message)?,
            VmError::Thrown(_) => self.exception.clone().unwrap_or_default(),
            other => {
                self.abandon(base);
                return Err(other);
            }
        };
        self.exception = Some(exception.clone());

        while self.frames.len() > base {
            if self.enter_handler(&exception)? {
                return Ok(());
            }
            if let Some(frame) = self.frames.pop() {
                self.stack.truncate(frame.stack_base);
            }
        }
        Err(VmError::Thrown(self.describe(&exception)))
    }

    /// Drop the frames from `base` up without running handlers
    fn abandon(&mut self, base: usize) {
        if let Some(frame) = self.frames.get(base) {
            let height = frame.stack_base;
            self.stack.truncate(height);
        }
        self.frames.truncate(base);
    }

    /// Search the current frame's handlers. Pending finally exceptions of
    /// handlers the throw comes from are superseded by the new exception.
    fn enter_handler(&mut self, exception: &Value) -> VmResult<bool> {
        let (code, pc) = {
            let frame = self.frame()?;
            (Arc::clone(&frame.code), frame.instr_start)
        };
        self.frame_mut()?
            .finally
            .retain(|p| !code.handlers.get(p.handler).is_some_and(|h| h.contains_handler(pc)));

        for (index, handler) in code.handlers.iter().enumerate() {
            if !handler.covers(pc) {
                continue;
            }
            let matched = if handler.flags.contains(HandlerFlags::FINALLY) {
                true
            } else if handler.flags.contains(HandlerFlags::ITERATION) {
                self.is_instance_of(exception, self.core.error(ErrorKind::StopIteration))
            } else {
                self.catch_matches(&handler.catch_type, exception)?
            };
            if !matched {
                continue;
            }

            let frame = self.frame_mut()?;
            let height = frame.stack_base + handler.num_stack as usize;
            frame.blocks.truncate(handler.num_blocks as usize);
            frame.pc = handler.handler_start as usize;
            if handler.flags.contains(HandlerFlags::FINALLY) {
                frame.finally.push(PendingFinally {
                    handler: index,
                    exception: exception.clone(),
                });
            } else {
                self.fault = None;
            }
            self.stack.truncate(height);
            if handler.flags.contains(HandlerFlags::CATCH) {
                self.stack.push(exception.clone());
            }
            self.exception = None;
            debug!(pc, handler = index, target = handler.handler_start, "exception handled");
            return Ok(true);
        }
        Ok(false)
    }

    fn catch_matches(&mut self, catch_type: &CatchType, exception: &Value) -> VmResult<bool> {
        let ty = match catch_type {
            CatchType::Any => return Ok(true),
            CatchType::Type(ty) => Some(*ty),
            CatchType::GlobalSlot(slot) => {
                let global = self.global();
                self.get_property(&global, *slot)?
                    .as_object()
                    .filter(|obj| self.type_obj(*obj).is_ok())
            }
            CatchType::Name(name) => {
                let found = self.resolve_global_type(name)?;
                if found.is_none() {
                    warn!(name = %name, "catch type is not defined");
                }
                found
            }
        };
        Ok(ty.is_some_and(|ty| self.is_instance_of(exception, ty)))
    }

    /// Build the error object for a raised error. Memory for it may come
    /// from the emergency reserve; when that is gone too the interpreter
    /// aborts.
    pub(crate) fn materialize(&mut self, kind: ErrorKind, message: &str) -> VmResult<Value> {
        let ty = self.core.error(kind);
        let template = self.type_obj(ty)?.instance.clone_as(Layout::Separate, 0);
        let object = HeapObject::new(ty, true, ObjKind::Object(template));
        let obj = match self.gc.heap.allocate(object.clone()) {
            Ok(obj) => obj,
            Err(_) => match self.gc.heap.allocate_reserve(object) {
                Some(obj) => obj,
                None => {
                    let reason = format!("Out of memory while raising {}: {}", kind, message);
                    return Err(self.abort(&reason));
                }
            },
        };

        let message_name = self.names.any(&self.names.message);
        let stack_name = self.names.any(&self.names.stack);
        let message = Value::String(self.intern(message));
        let trace = Value::String(self.intern(&self.capture_stack()));
        let store = self.gc.heap.get_mut(obj)?.store_mut();
        store.define(message_name, None, Attributes::ENUMERABLE, message, SlotHint::Next)?;
        store.define(stack_name, None, Attributes::empty(), trace, SlotHint::Next)?;
        Ok(Value::Object(obj))
    }

    /// One line per active frame, innermost first
    pub fn capture_stack(&self) -> String {
        let mut lines = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let (name, module) = match self.gc.heap.get(frame.function).ok().and_then(|o| o.as_function()) {
                Some(f) => (f.name.to_string(), f.module.as_ref().map(|m| m.to_string())),
                None => ("<anonymous>".to_string(), None),
            };
            let mut line = format!("    at {}", name);
            if let Some(module) = module {
                line.push_str(&format!(" [{}]", module));
            }
            if let Some(info) = frame.code.line_at(frame.instr_start) {
                line.push_str(&format!(" {}", info.source));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Short text for a value that never runs script code
    pub(crate) fn describe(&self, value: &Value) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(_) => {
                let ty = self.type_name_of(value);
                match self.own_value(value, &self.names.message) {
                    Some(Value::String(message)) if !message.is_empty() => format!("{}: {}", ty, message),
                    _ => ty,
                }
            }
        }
    }

    /// Raw own property of an object, no getters run
    fn own_value(&self, value: &Value, name: &crate::intern::IStr) -> Option<Value> {
        let object = self.gc.heap.get(value.as_object()?).ok()?;
        let store = object.store();
        let slot = store.lookup(&self.names.any(name))?;
        store.get(slot).ok().cloned()
    }

    /// Log an error that reached the host
    pub(crate) fn report_uncaught(&self, err: &VmError) {
        match err {
            VmError::Exiting => debug!(id = self.id.as_u64(), "execution stopped for exit"),
            VmError::Fatal(_) | VmError::Aborted => {}
            VmError::Thrown(_) => {
                let text = self.format_exception().unwrap_or_else(|| err.to_string());
                error!(id = self.id.as_u64(), "uncaught exception: {}", text);
            }
            other => error!(id = self.id.as_u64(), error = %other, "execution failed"),
        }
    }
}
