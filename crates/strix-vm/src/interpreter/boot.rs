//! Core types and the global object
//!
//! Every interpreter boots the same set of types and defines them on the
//! global object in a fixed order, so a module can refer to them by global
//! slot number:
//!
//! | Slot | Type |
//! |------|------|
//! | 0 | `Type` |
//! | 1 | `Object` |
//! | 2 | `Function` |
//! | 3 | `Block` |
//! | 4 | `Array` |
//! | 5 | `Boolean` |
//! | 6 | `Number` |
//! | 7 | `String` |
//! | 8 | `Null` |
//! | 9 | `Void` |
//! | 10.. | error types in [`ErrorKind::ALL`] order |

use super::core::Interpreter;
use crate::error::{ErrorKind, VmResult};
use crate::helpers::operators::{default_object_string, display_string};
use crate::helpers::Helpers;
use crate::intern::{IStr, InternTable};
use crate::object::{
    Attributes, Block, BlockKind, HeapObject, Layout, ObjKind, PropertyStore, QualifiedName, SlotHint, TypeObj,
};
use crate::value::{ObjRef, Value};

/// Handles of the types every interpreter boots with
#[derive(Debug, Clone, Copy)]
pub struct CoreTypes {
    /// `Type`, the type of every type including itself
    pub ty: ObjRef,
    /// `Object`, root of the hierarchy
    pub object: ObjRef,
    /// `Function`
    pub function: ObjRef,
    /// `Block`, type of scopes and the global object
    pub block: ObjRef,
    /// `Array`
    pub array: ObjRef,
    /// `Boolean`
    pub boolean: ObjRef,
    /// `Number`
    pub number: ObjRef,
    /// `String`
    pub string: ObjRef,
    /// `Null`
    pub null: ObjRef,
    /// `Void`, type of `undefined`
    pub void: ObjRef,
    /// Error types, indexed by [`ErrorKind::index`]
    pub errors: [ObjRef; ErrorKind::ALL.len()],
}

impl Default for CoreTypes {
    fn default() -> Self {
        let unset = ObjRef::from_index(0);
        Self {
            ty: unset,
            object: unset,
            function: unset,
            block: unset,
            array: unset,
            boolean: unset,
            number: unset,
            string: unset,
            null: unset,
            void: unset,
            errors: [unset; ErrorKind::ALL.len()],
        }
    }
}

impl CoreTypes {
    /// Type backing an error kind
    pub fn error(&self, kind: ErrorKind) -> ObjRef {
        self.errors[kind.index()]
    }

    /// Every core type in global slot order
    pub fn all(&self) -> impl Iterator<Item = ObjRef> + '_ {
        [
            self.ty,
            self.object,
            self.function,
            self.block,
            self.array,
            self.boolean,
            self.number,
            self.string,
            self.null,
            self.void,
        ]
        .into_iter()
        .chain(self.errors.iter().copied())
    }
}

/// Names the interpreter looks up often
#[derive(Debug, Clone)]
pub(crate) struct CommonNames {
    pub empty: IStr,
    pub length: IStr,
    pub to_string: IStr,
    pub message: IStr,
    pub stack: IStr,
}

impl CommonNames {
    pub fn new(strings: &InternTable) -> Self {
        Self {
            empty: strings.intern(""),
            length: strings.intern("length"),
            to_string: strings.intern("toString"),
            message: strings.intern("message"),
            stack: strings.intern("stack"),
        }
    }

    /// `name` in the wildcard namespace
    pub fn any(&self, name: &IStr) -> QualifiedName {
        QualifiedName::new(self.empty.clone(), name.clone())
    }
}

impl Interpreter {
    pub(super) fn boot(&mut self) -> VmResult<()> {
        let ty = self.boot_type("Type", Helpers::type_object(), Attributes::empty())?;
        self.gc.heap.get_mut(ty)?.header.ty = ty;
        self.core.ty = ty;

        let dynamic = Attributes::DYNAMIC_INSTANCES;
        self.core.object = self.boot_type("Object", Helpers::pot(), dynamic)?;
        self.core.function = self.boot_type("Function", Helpers::function(), Attributes::empty())?;
        self.core.block = self.boot_type("Block", Helpers::block(), dynamic)?;
        self.core.array = self.boot_type("Array", Helpers::array(), dynamic)?;
        self.core.boolean = self.boot_type("Boolean", Helpers::value(), Attributes::FINAL)?;
        self.core.number = self.boot_type("Number", Helpers::number(), Attributes::FINAL)?;
        self.core.string = self.boot_type("String", Helpers::string(), Attributes::FINAL)?;
        self.core.null = self.boot_type("Null", Helpers::nullish(), Attributes::FINAL)?;
        self.core.void = self.boot_type("Void", Helpers::nullish(), Attributes::FINAL)?;

        let object = self.core.object;
        for derived in [
            ty,
            self.core.function,
            self.core.block,
            self.core.array,
            self.core.boolean,
            self.core.number,
            self.core.string,
            self.core.null,
            self.core.void,
        ] {
            self.type_obj_mut(derived)?.base = Some(object);
        }

        let to_string = self.native_function("toString", object_to_string, 0)?;
        let name = self.names.any(&self.names.to_string);
        self.type_obj_mut(object)?
            .prototype
            .define(name, None, Attributes::HIDDEN, Value::Object(to_string), SlotHint::Next)?;

        self.boot_errors()?;
        self.boot_global()
    }

    fn boot_errors(&mut self) -> VmResult<()> {
        let error = self.boot_type("Error", Helpers::pot(), Attributes::DYNAMIC_INSTANCES)?;
        self.type_obj_mut(error)?.base = Some(self.core.object);

        let message = self.names.any(&self.names.message);
        let stack = self.names.any(&self.names.stack);
        let empty = Value::String(self.names.empty.clone());
        let instance = &mut self.type_obj_mut(error)?.instance;
        instance.define(message, None, Attributes::ENUMERABLE, empty, SlotHint::Next)?;
        instance.define(stack, None, Attributes::empty(), Value::Undefined, SlotHint::Next)?;

        let constructor = self.native_function("Error", error_constructor, 1)?;
        let to_string = self.native_function("toString", error_to_string, 0)?;
        let name = self.names.any(&self.names.to_string);
        let t = self.type_obj_mut(error)?;
        t.constructor = Some(constructor);
        t.prototype
            .define(name, None, Attributes::HIDDEN, Value::Object(to_string), SlotHint::Next)?;
        self.core.errors[ErrorKind::GenericError.index()] = error;

        for kind in ErrorKind::ALL {
            if kind == ErrorKind::GenericError {
                continue;
            }
            let derived = self.boot_type(kind.type_name(), Helpers::pot(), Attributes::DYNAMIC_INSTANCES)?;
            if kind == ErrorKind::StopIteration {
                self.type_obj_mut(derived)?.base = Some(self.core.object);
            } else {
                self.inherit(derived, error)?;
            }
            self.core.errors[kind.index()] = derived;
        }
        Ok(())
    }

    fn boot_global(&mut self) -> VmResult<()> {
        let store = PropertyStore::with_capacity(Layout::Separate, self.options.global_slots);
        let block = Block::new(BlockKind::Global, store, None);
        self.global = self.alloc(HeapObject::new(self.core.block, true, ObjKind::Block(block)))?;

        let core = self.core;
        let global = self.global;
        for ty in core.all() {
            let name = {
                let t = self.type_obj_mut(ty)?;
                t.scope = Some(global);
                t.qname.clone()
            };
            self.gc.heap.get_mut(global)?.store_mut().define(
                name,
                Some(core.ty),
                Attributes::FIXED,
                Value::Object(ty),
                SlotHint::Next,
            )?;
        }
        Ok(())
    }

    fn boot_type(&mut self, name: &str, helpers: Helpers, attributes: Attributes) -> VmResult<ObjRef> {
        let mut t = TypeObj::new(self.names.any(&self.intern(name)), helpers);
        t.attributes = attributes;
        self.alloc(HeapObject::new(self.core.ty, false, ObjKind::Type(Box::new(t))))
    }
}

fn object_to_string(interp: &mut Interpreter, this: Value, _args: &[Value]) -> VmResult<Value> {
    let text = match this.as_object() {
        Some(obj) => default_object_string(interp, obj, 0)?,
        None => display_string(interp, &this)?,
    };
    Ok(Value::String(interp.intern(&text)))
}

fn error_constructor(interp: &mut Interpreter, this: Value, args: &[Value]) -> VmResult<Value> {
    if let Some(message) = args.first() {
        let text = display_string(interp, message)?;
        let name = interp.names.any(&interp.names.message);
        let text = Value::String(interp.intern(&text));
        interp.set_property_by_name(&this, &name, text)?;
    }
    let trace = interp.capture_stack();
    let name = interp.names.any(&interp.names.stack);
    let trace = Value::String(interp.intern(&trace));
    interp.set_property_by_name(&this, &name, trace)?;
    Ok(this)
}

fn error_to_string(interp: &mut Interpreter, this: Value, _args: &[Value]) -> VmResult<Value> {
    let ty = interp.type_name_of(&this);
    let name = interp.names.any(&interp.names.message);
    let message = interp.get_property_by_name(&this, &name)?;
    let message = match message {
        Value::Undefined => String::new(),
        other => display_string(interp, &other)?,
    };
    let text = if message.is_empty() { ty } else { format!("{}: {}", ty, message) };
    Ok(Value::String(interp.intern(&text)))
}
