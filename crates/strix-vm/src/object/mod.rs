//! Heap object model
//!
//! Every heap value is a [`HeapObject`]: a [`Header`] (type, dynamic bit,
//! collector mark) plus an [`ObjKind`] payload. All kinds own a
//! [`PropertyStore`], so property operations work uniformly across plain
//! objects, arrays, blocks, functions and types.

pub mod attributes;
pub mod function;
pub mod name;
pub mod property;
pub mod types;

pub use attributes::{Attributes, HandlerFlags};
pub use function::{CatchType, Code, ConstantStrings, Function, FunctionBody, Handler, LineInfo, NativeFn};
pub use name::QualifiedName;
pub use property::{Layout, PropertyStore, Slot, SlotHint, Trait};
pub use types::TypeObj;

use crate::intern::IStr;
use crate::value::{ObjRef, Value};

/// Per-object header
#[derive(Debug, Clone, Copy)]
pub struct Header {
    /// Type of the object
    pub ty: ObjRef,
    /// Object may gain properties beyond its type's layout
    pub dynamic: bool,
    /// Collector mark
    pub visited: bool,
}

impl Header {
    /// Create an unmarked header
    pub fn new(ty: ObjRef, dynamic: bool) -> Self {
        Self {
            ty,
            dynamic,
            visited: false,
        }
    }
}

/// Role of a block scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Nested lexical block
    Plain,
    /// Function activation record
    Activation,
    /// Global object
    Global,
    /// Nested block template stored in a function
    Template,
}

/// Scope object: properties, open namespaces and the enclosing scope
#[derive(Debug, Clone)]
pub struct Block {
    /// Scope properties
    pub store: PropertyStore,
    /// Namespaces opened in this block, oldest first
    pub namespaces: Vec<IStr>,
    /// Enclosing scope
    pub scope: Option<ObjRef>,
    /// Role of the block
    pub kind: BlockKind,
}

impl Block {
    /// Create an empty block
    pub fn new(kind: BlockKind, store: PropertyStore, scope: Option<ObjRef>) -> Self {
        Self {
            store,
            namespaces: Vec::new(),
            scope,
            kind,
        }
    }
}

/// Array payload
#[derive(Debug, Clone, Default)]
pub struct ArrayObj {
    /// Indexed elements
    pub elements: Vec<Value>,
    /// Named properties
    pub props: PropertyStore,
}

/// Object payload
#[derive(Debug, Clone)]
pub enum ObjKind {
    /// Plain or class instance
    Object(PropertyStore),
    /// Array
    Array(ArrayObj),
    /// Scope block
    Block(Block),
    /// Function
    Function(Box<Function>),
    /// Type
    Type(Box<TypeObj>),
}

/// Heap cell contents
#[derive(Debug, Clone)]
pub struct HeapObject {
    /// Header
    pub header: Header,
    /// Payload
    pub kind: ObjKind,
}

impl HeapObject {
    /// Create an object
    pub fn new(ty: ObjRef, dynamic: bool, kind: ObjKind) -> Self {
        Self {
            header: Header::new(ty, dynamic),
            kind,
        }
    }

    /// Property store of the object
    pub fn store(&self) -> &PropertyStore {
        match &self.kind {
            ObjKind::Object(store) => store,
            ObjKind::Array(array) => &array.props,
            ObjKind::Block(block) => &block.store,
            ObjKind::Function(function) => &function.store,
            ObjKind::Type(ty) => &ty.statics,
        }
    }

    /// Mutable property store of the object
    pub fn store_mut(&mut self) -> &mut PropertyStore {
        match &mut self.kind {
            ObjKind::Object(store) => store,
            ObjKind::Array(array) => &mut array.props,
            ObjKind::Block(block) => &mut block.store,
            ObjKind::Function(function) => &mut function.store,
            ObjKind::Type(ty) => &mut ty.statics,
        }
    }

    /// Function payload
    pub fn as_function(&self) -> Option<&Function> {
        match &self.kind {
            ObjKind::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Mutable function payload
    pub fn as_function_mut(&mut self) -> Option<&mut Function> {
        match &mut self.kind {
            ObjKind::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Type payload
    pub fn as_type(&self) -> Option<&TypeObj> {
        match &self.kind {
            ObjKind::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Mutable type payload
    pub fn as_type_mut(&mut self) -> Option<&mut TypeObj> {
        match &mut self.kind {
            ObjKind::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Block payload
    pub fn as_block(&self) -> Option<&Block> {
        match &self.kind {
            ObjKind::Block(block) => Some(block),
            _ => None,
        }
    }

    /// Mutable block payload
    pub fn as_block_mut(&mut self) -> Option<&mut Block> {
        match &mut self.kind {
            ObjKind::Block(block) => Some(block),
            _ => None,
        }
    }

    /// Array payload
    pub fn as_array(&self) -> Option<&ArrayObj> {
        match &self.kind {
            ObjKind::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Mutable array payload
    pub fn as_array_mut(&mut self) -> Option<&mut ArrayObj> {
        match &mut self.kind {
            ObjKind::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Next link of the scope chain
    pub fn scope(&self) -> Option<ObjRef> {
        match &self.kind {
            ObjKind::Block(block) => block.scope,
            ObjKind::Function(function) => function.scope,
            ObjKind::Type(ty) => ty.scope,
            _ => None,
        }
    }

    /// Namespaces opened in this scope, oldest first
    pub fn namespaces(&self) -> &[IStr] {
        match &self.kind {
            ObjKind::Block(block) => &block.namespaces,
            _ => &[],
        }
    }

    /// Append every object this one refers to
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        out.push(self.header.ty);
        match &self.kind {
            ObjKind::Object(store) => out.extend(store.references()),
            ObjKind::Array(array) => {
                out.extend(array.elements.iter().filter_map(Value::as_object));
                out.extend(array.props.references());
            }
            ObjKind::Block(block) => {
                out.extend(block.scope);
                out.extend(block.store.references());
            }
            ObjKind::Function(function) => out.extend(function.references()),
            ObjKind::Type(ty) => out.extend(ty.references()),
        }
    }
}
