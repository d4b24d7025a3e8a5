use super::{misrouted, Operands};
use crate::error::{VmError, VmResult};
use crate::interpreter::execution::{ControlFlow, Invoked};
use crate::interpreter::frame::ReturnMode;
use crate::interpreter::Interpreter;
use crate::object::{Attributes, Block, BlockKind, Code, HeapObject, Layout, ObjKind};
use crate::value::{ObjRef, Value};
use strix_bytecode::Opcode;
use tracing::trace;

impl Interpreter {
    pub(in crate::interpreter) fn exec_object_ops(
        &mut self,
        opcode: Opcode,
        operands: &Operands,
        code: &Code,
    ) -> VmResult<ControlFlow> {
        match opcode {
            Opcode::NewObject => {
                let object = self.new_object()?;
                self.push(object);
            }

            Opcode::NewArray => {
                let elements = self.pop_n(operands.index(0)?)?;
                let array = self.new_array(elements)?;
                self.push(array);
            }

            Opcode::New => {
                let args = self.pop_n(operands.index(0)?)?;
                let ty = self.pop()?;
                let is_type = ty.as_object().is_some_and(|t| self.type_obj(t).is_ok());
                if !is_type {
                    return Err(VmError::type_error(format!(
                        "{} is not a type",
                        self.type_name_of(&ty)
                    )));
                }
                if let Invoked::Value(instance) = self.invoke(ty, Value::Undefined, args, ReturnMode::Value, false)? {
                    self.push(instance);
                }
            }

            Opcode::Closure => {
                let function = self.pop()?;
                let closure = self.close_over(&function)?;
                self.push(closure);
            }

            Opcode::OpenBlock => self.open_block(operands.index(0)?)?,

            Opcode::CloseBlock => {
                if self.frame_mut()?.blocks.pop().is_none() {
                    return Err(VmError::instruction("No block scope to close"));
                }
            }

            Opcode::AddNamespace => {
                let space = operands.string(code, 0)?.clone();
                let scope = self.frame()?.innermost();
                let block = self
                    .gc
                    .heap
                    .get_mut(scope)?
                    .as_block_mut()
                    .ok_or_else(|| VmError::internal("Innermost scope is not a block"))?;
                if !block.namespaces.contains(&space) {
                    block.namespaces.push(space);
                }
            }

            _ => return Err(misrouted(opcode)),
        }
        Ok(ControlFlow::Continue)
    }

    /// Bind a function to the current scope chain. Functions flagged
    /// `FULL_SCOPE` outlive the frame and get their own copy holding the
    /// scope and `this`. Others are shared by every frame and resolve their
    /// scope from the calling frame when invoked.
    fn close_over(&mut self, function: &Value) -> VmResult<Value> {
        let Some(obj) = function.as_object() else {
            return Err(VmError::type_error(format!("{} is not a function", self.type_name_of(function))));
        };
        let (scope, this) = {
            let frame = self.frame()?;
            (frame.innermost(), frame.this.clone())
        };
        let copy = {
            let object = self.gc.heap.get(obj)?;
            let f = object
                .as_function()
                .ok_or_else(|| VmError::type_error(format!("{} is not a function", self.type_name_of(function))))?;
            f.attributes.contains(Attributes::FULL_SCOPE).then(|| object.clone())
        };

        let Some(mut copy) = copy else {
            return Ok(function.clone());
        };
        if let Some(f) = copy.as_function_mut() {
            f.scope = Some(scope);
            if f.bound_this.is_none() && !this.is_undefined() {
                f.bound_this = Some(this);
            }
        }
        Ok(Value::Object(self.alloc(copy)?))
    }

    /// Open a block scope from the template in slot `slot` of the running
    /// function
    fn open_block(&mut self, slot: usize) -> VmResult<()> {
        let (function, scope) = {
            let frame = self.frame()?;
            (frame.function, frame.innermost())
        };
        let template = self.block_template(function, slot)?;
        let (store, namespaces) = {
            let block = self
                .gc
                .heap
                .get(template)?
                .as_block()
                .ok_or_else(|| VmError::instruction(format!("Slot {} does not hold a block template", slot)))?;
            (block.store.clone_as(Layout::Separate, 0), block.namespaces.clone())
        };
        let mut block = Block::new(BlockKind::Plain, store, Some(scope));
        block.namespaces = namespaces;
        let opened = self.alloc(HeapObject::new(self.core.block, true, ObjKind::Block(block)))?;
        trace!(slot, depth = self.frame()?.blocks.len() + 1, "block opened");
        self.frame_mut()?.blocks.push(opened);
        Ok(())
    }

    fn block_template(&self, function: ObjRef, slot: usize) -> VmResult<ObjRef> {
        let value = self.gc.heap.get(function)?.store().get(slot)?;
        value
            .as_object()
            .ok_or_else(|| VmError::instruction(format!("Slot {} does not hold a block template", slot)))
    }
}
