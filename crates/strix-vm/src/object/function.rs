//! Functions and compiled code

use crate::error::{VmError, VmResult};
use crate::intern::{IStr, InternTable};
use crate::interpreter::Interpreter;
use crate::object::attributes::{Attributes, HandlerFlags};
use crate::object::name::QualifiedName;
use crate::object::property::PropertyStore;
use crate::value::{ObjRef, Value};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use strix_bytecode::ConstantPool;

/// Native function entry point: `(interpreter, this, args)`
pub type NativeFn = fn(&mut Interpreter, Value, &[Value]) -> VmResult<Value>;

/// Type a catch clause accepts, resolved when an exception is thrown
#[derive(Debug, Clone, PartialEq)]
pub enum CatchType {
    /// Catch everything
    Any,
    /// Type named in the global scope
    Name(QualifiedName),
    /// Type held in a global slot
    GlobalSlot(usize),
    /// Resolved type
    Type(ObjRef),
}

/// Exception handler record
#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    /// Catch, finally or iteration
    pub flags: HandlerFlags,
    /// First covered offset
    pub try_start: u32,
    /// End of the covered range (exclusive)
    pub try_end: u32,
    /// Handler entry
    pub handler_start: u32,
    /// End of the handler (exclusive)
    pub handler_end: u32,
    /// Block scopes open at handler entry
    pub num_blocks: u32,
    /// Operand stack depth at handler entry, relative to the frame
    pub num_stack: u32,
    /// Accepted exception type
    pub catch_type: CatchType,
}

impl Handler {
    /// True when `pc` lies inside the protected range
    pub fn covers(&self, pc: usize) -> bool {
        (self.try_start as usize) <= pc && pc < (self.try_end as usize)
    }

    /// True when `pc` lies inside the handler body
    pub fn contains_handler(&self, pc: usize) -> bool {
        (self.handler_start as usize) <= pc && pc < (self.handler_end as usize)
    }
}

/// Debug line entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    /// First bytecode offset of the line
    pub offset: u32,
    /// Source location text
    pub source: String,
}

/// Module constant pool with every entry interned
#[derive(Debug, Default)]
pub struct ConstantStrings {
    map: FxHashMap<i64, IStr>,
}

impl ConstantStrings {
    /// Intern every entry of `pool`
    pub fn from_pool(pool: &ConstantPool, table: &InternTable) -> Self {
        let bytes = pool.as_bytes();
        let mut map = FxHashMap::default();
        let mut start = 0;
        for (i, byte) in bytes.iter().enumerate() {
            if *byte == 0 {
                if let Ok(text) = std::str::from_utf8(&bytes[start..i]) {
                    map.insert(start as i64, table.intern(text));
                }
                start = i + 1;
            }
        }
        Self { map }
    }

    /// String at pool offset `offset`
    pub fn get(&self, offset: i64) -> VmResult<&IStr> {
        self.map
            .get(&offset)
            .ok_or_else(|| VmError::instruction(format!("Bad string constant offset {}", offset)))
    }

    /// Number of strings
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Bytecode body of a function
#[derive(Debug)]
pub struct Code {
    /// Instructions
    pub bytes: Vec<u8>,
    /// Exception handlers in priority order
    pub handlers: Vec<Handler>,
    /// Debug line table, sorted by offset
    pub lines: Vec<LineInfo>,
    /// Strings the instructions refer to
    pub strings: Arc<ConstantStrings>,
}

impl Code {
    /// Create a body with no handlers or line table
    pub fn new(bytes: Vec<u8>, strings: Arc<ConstantStrings>) -> Self {
        Self {
            bytes,
            handlers: Vec::new(),
            lines: Vec::new(),
            strings,
        }
    }

    /// Source line covering `offset`
    pub fn line_at(&self, offset: usize) -> Option<&LineInfo> {
        self.lines.iter().take_while(|l| (l.offset as usize) <= offset).last()
    }
}

/// What runs when a function is called
#[derive(Clone)]
pub enum FunctionBody {
    /// Bytecode
    Code(Arc<Code>),
    /// Native implementation
    Native(NativeFn),
    /// Declared but not implemented
    Abstract,
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionBody::Code(code) => write!(f, "Code({} bytes)", code.bytes.len()),
            FunctionBody::Native(_) => f.write_str("Native"),
            FunctionBody::Abstract => f.write_str("Abstract"),
        }
    }
}

/// Callable function object
#[derive(Debug, Clone)]
pub struct Function {
    /// Qualified name
    pub name: QualifiedName,
    /// Implementation
    pub body: FunctionBody,
    /// Formal parameter count
    pub num_args: usize,
    /// Parameters with default values
    pub num_default: usize,
    /// Function and trait attributes
    pub attributes: Attributes,
    /// Template for the activation block: parameters first, then locals
    pub activation: PropertyStore,
    /// Own properties, including nested block templates by slot
    pub store: PropertyStore,
    /// Scope the function body resolves free names in
    pub scope: Option<ObjRef>,
    /// `this` fixed at bind time
    pub bound_this: Option<Value>,
    /// Arguments prepended to every call
    pub bound_args: Vec<Value>,
    /// Paired setter for accessor properties
    pub setter: Option<ObjRef>,
    /// Declared return type
    pub result_type: Option<ObjRef>,
    /// Declaring type for methods and constructors
    pub owner: Option<ObjRef>,
    /// Defining module name
    pub module: Option<IStr>,
}

impl Function {
    /// Create a function with an empty activation template
    pub fn new(name: QualifiedName, body: FunctionBody, num_args: usize) -> Self {
        Self {
            name,
            body,
            num_args,
            num_default: 0,
            attributes: Attributes::empty(),
            activation: PropertyStore::new(),
            store: PropertyStore::new(),
            scope: None,
            bound_this: None,
            bound_args: Vec::new(),
            setter: None,
            result_type: None,
            owner: None,
            module: None,
        }
    }

    /// Create a native function
    pub fn native(name: QualifiedName, f: NativeFn, num_args: usize) -> Self {
        let mut function = Self::new(name, FunctionBody::Native(f), num_args);
        function.attributes.insert(Attributes::NATIVE);
        function
    }

    /// Bytecode body, if any
    pub fn code(&self) -> Option<&Arc<Code>> {
        match &self.body {
            FunctionBody::Code(code) => Some(code),
            _ => None,
        }
    }

    /// True when the last parameter collects extra arguments
    pub fn has_rest(&self) -> bool {
        self.attributes.contains(Attributes::REST_ARGS)
    }

    /// True when missing or extra arguments are not an error
    pub fn tolerates_arg_count(&self) -> bool {
        self.attributes.contains(Attributes::LOOSE_ARGS)
    }

    /// Arguments that must be supplied
    pub fn required_args(&self) -> usize {
        let rest = usize::from(self.has_rest());
        self.num_args.saturating_sub(self.num_default + rest)
    }

    /// True for class constructors
    pub fn is_constructor(&self) -> bool {
        self.attributes.contains(Attributes::CONSTRUCTOR)
    }

    /// Every heap reference the function holds
    pub fn references(&self) -> impl Iterator<Item = ObjRef> + '_ {
        let handler_types = self
            .code()
            .into_iter()
            .flat_map(|code| code.handlers.iter())
            .filter_map(|h| match h.catch_type {
                CatchType::Type(ty) => Some(ty),
                _ => None,
            });
        self.scope
            .into_iter()
            .chain(self.bound_this.as_ref().and_then(Value::as_object))
            .chain(self.bound_args.iter().filter_map(Value::as_object))
            .chain(self.setter)
            .chain(self.result_type)
            .chain(self.owner)
            .chain(self.activation.references())
            .chain(self.store.references())
            .chain(handler_types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_strings_follow_pool_offsets() {
        let table = InternTable::new();
        let mut pool = ConstantPool::new();
        let hello = pool.add("hello").unwrap();
        let world = pool.add("world").unwrap();
        let strings = ConstantStrings::from_pool(&pool, &table);
        assert_eq!(strings.get(0).unwrap().as_str(), "");
        assert_eq!(strings.get(hello as i64).unwrap().as_str(), "hello");
        assert_eq!(strings.get(world as i64).unwrap().as_str(), "world");
        assert!(strings.get(hello as i64 + 1).is_err());
        assert!(strings.get(hello as i64).unwrap().ptr_eq(&table.intern("hello")));
    }

    #[test]
    fn test_required_args() {
        let table = InternTable::new();
        let name = QualifiedName::new(table.intern("public"), table.intern("f"));
        let mut function = Function::new(name, FunctionBody::Abstract, 4);
        function.num_default = 1;
        assert_eq!(function.required_args(), 3);
        function.attributes.insert(Attributes::REST_ARGS);
        assert_eq!(function.required_args(), 2);
    }

    #[test]
    fn test_line_lookup() {
        let mut code = Code::new(vec![0; 10], Arc::new(ConstantStrings::default()));
        code.lines = vec![
            LineInfo { offset: 0, source: "a.es:1".to_string() },
            LineInfo { offset: 4, source: "a.es:2".to_string() },
        ];
        assert_eq!(code.line_at(3).map(|l| l.source.as_str()), Some("a.es:1"));
        assert_eq!(code.line_at(9).map(|l| l.source.as_str()), Some("a.es:2"));
    }
}
