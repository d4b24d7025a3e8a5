//! Instruction set of the Strix VM
//!
//! Instructions are a one-byte opcode followed by zero or more operands.
//! Operand encodings:
//! - `Num`: variable-length signed number (see [`crate::encoder`])
//! - `Str`: constant pool offset, encoded as `Num`
//! - `Jump`: `i32` little-endian, relative to the end of the instruction
//! - `Double`: `f64` little-endian
//! - `JumpTable`: `Num` count followed by that many `Jump` entries, each
//!   relative to the end of the whole table
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Slot access
//! - 0x20-0x2F: Qualified name access
//! - 0x30-0x3F: Object creation, closures & scopes
//! - 0x40-0x4F: Calls
//! - 0x50-0x5F: Control flow & exceptions
//! - 0x60-0x7F: Operators
//! - 0x80-0x8F: Types

/// Kinds of operand an instruction carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Variable-length number
    Num,
    /// Constant pool offset
    Str,
    /// Relative `i32` jump
    Jump,
    /// Little-endian `f64`
    Double,
    /// Count followed by relative `i32` jumps
    JumpTable,
}

use Operand::*;

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value
    Pop = 0x01,
    /// Duplicate top value
    Dup = 0x02,
    /// Duplicate the top two values, preserving order
    Dup2 = 0x03,
    /// Swap top two values
    Swap = 0x04,
    /// Push `undefined`
    LoadUndefined = 0x05,
    /// Push `null`
    LoadNull = 0x06,
    /// Push `true`
    LoadTrue = 0x07,
    /// Push `false`
    LoadFalse = 0x08,
    /// Push an integral number (operand: Num)
    LoadInt = 0x09,
    /// Push a double (operand: Double)
    LoadDouble = 0x0A,
    /// Push a pooled string (operand: Str)
    LoadString = 0x0B,
    /// Push the frame's `this`
    LoadThis = 0x0C,
    /// Push the global object
    LoadGlobal = 0x0D,

    // ===== Slot Access (0x10-0x1F) =====
    /// Push activation slot (operand: Num slot)
    GetLocal = 0x10,
    /// Pop into activation slot (operand: Num slot)
    PutLocal = 0x11,
    /// Push slot of the block `depth` links up the scope chain (operands: Num depth, Num slot)
    GetScopedSlot = 0x12,
    /// Pop into slot of the block `depth` links up the scope chain (operands: Num depth, Num slot)
    PutScopedSlot = 0x13,
    /// Push global slot (operand: Num slot)
    GetGlobalSlot = 0x14,
    /// Pop into global slot (operand: Num slot)
    PutGlobalSlot = 0x15,
    /// Pop object, push its slot (operand: Num slot)
    GetObjSlot = 0x16,
    /// Pop value then object, store into slot (operand: Num slot)
    PutObjSlot = 0x17,
    /// Push slot of `this` (operand: Num slot)
    GetThisSlot = 0x18,
    /// Pop into slot of `this` (operand: Num slot)
    PutThisSlot = 0x19,

    // ===== Qualified Name Access (0x20-0x2F) =====
    /// Resolve a name through the scope chain (operands: Str space, Str name)
    GetName = 0x20,
    /// Pop and assign a name through the scope chain (operands: Str space, Str name)
    PutName = 0x21,
    /// Pop object, push named property (operands: Str space, Str name)
    GetObjName = 0x22,
    /// Pop value then object, assign named property (operands: Str space, Str name)
    PutObjName = 0x23,
    /// Pop object, delete named property, push success (operands: Str space, Str name)
    DeleteObjName = 0x24,
    /// Pop index then object, push element
    GetIndex = 0x25,
    /// Pop value, index, object, assign element
    PutIndex = 0x26,

    // ===== Objects, Closures & Scopes (0x30-0x3F) =====
    /// Push a new empty dynamic object
    NewObject = 0x30,
    /// Pop `count` values and push an array of them (operand: Num count)
    NewArray = 0x31,
    /// Pop arguments then a type, construct an instance (operand: Num argc)
    New = 0x32,
    /// Pop a function, push it bound to the current scope chain
    Closure = 0x33,
    /// Open a block scope from the template in a function slot (operand: Num slot)
    OpenBlock = 0x34,
    /// Close the innermost block scope
    CloseBlock = 0x35,
    /// Open a namespace in the innermost block (operand: Str)
    AddNamespace = 0x36,

    // ===== Calls (0x40-0x4F) =====
    /// Stack `[this, fn, args..]` (operand: Num argc)
    Call = 0x40,
    /// Stack `[obj, args..]`, call named method (operands: Str space, Str name, Num argc)
    CallObjName = 0x41,
    /// Stack `[obj, args..]`, call method in slot (operands: Num slot, Num argc)
    CallObjSlot = 0x42,
    /// Stack `[args..]`, call global slot (operands: Num slot, Num argc)
    CallGlobalSlot = 0x43,
    /// Stack `[args..]`, run the base type constructor on `this` (operand: Num argc)
    CallSuper = 0x44,

    // ===== Control Flow & Exceptions (0x50-0x5F) =====
    /// Unconditional jump (operand: Jump)
    Goto = 0x50,
    /// Pop, jump when truthy (operand: Jump)
    BranchTrue = 0x51,
    /// Pop, jump when falsy (operand: Jump)
    BranchFalse = 0x52,
    /// Pop and return the value
    Return = 0x53,
    /// Return `undefined`
    ReturnUndefined = 0x54,
    /// Pop and throw the value
    Throw = 0x55,
    /// End of a finally handler; re-raises the pending exception if any
    EndException = 0x56,
    /// Skip initializers of supplied default arguments (operand: JumpTable)
    InitDefaultArgs = 0x57,

    // ===== Operators (0x60-0x7F) =====
    /// `a + b`
    Add = 0x60,
    /// `a - b`
    Sub = 0x61,
    /// `a * b`
    Mul = 0x62,
    /// `a / b`
    Div = 0x63,
    /// `a % b`
    Rem = 0x64,
    /// `-a`
    Neg = 0x65,
    /// `a & b`
    BitAnd = 0x66,
    /// `a | b`
    BitOr = 0x67,
    /// `a ^ b`
    BitXor = 0x68,
    /// `~a`
    BitNot = 0x69,
    /// `a << b`
    Shl = 0x6A,
    /// `a >> b`
    Shr = 0x6B,
    /// `a >>> b`
    Ushr = 0x6C,
    /// `!a`
    LogicalNot = 0x6D,
    /// `a == b`
    CompareEq = 0x6E,
    /// `a != b`
    CompareNe = 0x6F,
    /// `a === b`
    CompareStrictEq = 0x70,
    /// `a !== b`
    CompareStrictNe = 0x71,
    /// `a < b`
    CompareLt = 0x72,
    /// `a <= b`
    CompareLe = 0x73,
    /// `a > b`
    CompareGt = 0x74,
    /// `a >= b`
    CompareGe = 0x75,
    /// Add a constant to the top value (operand: Num delta)
    Inc = 0x76,

    // ===== Types (0x80-0x8F) =====
    /// Pop value, push its type name
    TypeOf = 0x80,
    /// Pop type then value, push whether value is an instance
    IsA = 0x81,
    /// Pop type then value, push value cast to the type
    Cast = 0x82,
}

impl Opcode {
    /// Every opcode, in byte order
    pub const ALL: &'static [Opcode] = &[
        Self::Nop,
        Self::Pop,
        Self::Dup,
        Self::Dup2,
        Self::Swap,
        Self::LoadUndefined,
        Self::LoadNull,
        Self::LoadTrue,
        Self::LoadFalse,
        Self::LoadInt,
        Self::LoadDouble,
        Self::LoadString,
        Self::LoadThis,
        Self::LoadGlobal,
        Self::GetLocal,
        Self::PutLocal,
        Self::GetScopedSlot,
        Self::PutScopedSlot,
        Self::GetGlobalSlot,
        Self::PutGlobalSlot,
        Self::GetObjSlot,
        Self::PutObjSlot,
        Self::GetThisSlot,
        Self::PutThisSlot,
        Self::GetName,
        Self::PutName,
        Self::GetObjName,
        Self::PutObjName,
        Self::DeleteObjName,
        Self::GetIndex,
        Self::PutIndex,
        Self::NewObject,
        Self::NewArray,
        Self::New,
        Self::Closure,
        Self::OpenBlock,
        Self::CloseBlock,
        Self::AddNamespace,
        Self::Call,
        Self::CallObjName,
        Self::CallObjSlot,
        Self::CallGlobalSlot,
        Self::CallSuper,
        Self::Goto,
        Self::BranchTrue,
        Self::BranchFalse,
        Self::Return,
        Self::ReturnUndefined,
        Self::Throw,
        Self::EndException,
        Self::InitDefaultArgs,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Rem,
        Self::Neg,
        Self::BitAnd,
        Self::BitOr,
        Self::BitXor,
        Self::BitNot,
        Self::Shl,
        Self::Shr,
        Self::Ushr,
        Self::LogicalNot,
        Self::CompareEq,
        Self::CompareNe,
        Self::CompareStrictEq,
        Self::CompareStrictNe,
        Self::CompareLt,
        Self::CompareLe,
        Self::CompareGt,
        Self::CompareGe,
        Self::Inc,
        Self::TypeOf,
        Self::IsA,
        Self::Cast,
    ];

    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00..=0x0D | 0x10..=0x19 | 0x20..=0x26 | 0x30..=0x36 | 0x40..=0x44 | 0x50..=0x57
            | 0x60..=0x76 | 0x80..=0x82 => Self::ALL.iter().copied().find(|op| *op as u8 == byte),
            _ => None,
        }
    }

    /// Convert opcode to byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Operand layout following the opcode byte
    pub fn operands(self) -> &'static [Operand] {
        match self {
            Self::LoadInt
            | Self::GetLocal
            | Self::PutLocal
            | Self::GetGlobalSlot
            | Self::PutGlobalSlot
            | Self::GetObjSlot
            | Self::PutObjSlot
            | Self::GetThisSlot
            | Self::PutThisSlot
            | Self::NewArray
            | Self::New
            | Self::OpenBlock
            | Self::Call
            | Self::CallSuper
            | Self::Inc => &[Num],
            Self::GetScopedSlot | Self::PutScopedSlot | Self::CallObjSlot | Self::CallGlobalSlot => {
                &[Num, Num]
            }
            Self::LoadString | Self::AddNamespace => &[Str],
            Self::GetName
            | Self::PutName
            | Self::GetObjName
            | Self::PutObjName
            | Self::DeleteObjName => &[Str, Str],
            Self::CallObjName => &[Str, Str, Num],
            Self::LoadDouble => &[Double],
            Self::Goto | Self::BranchTrue | Self::BranchFalse => &[Jump],
            Self::InitDefaultArgs => &[JumpTable],
            _ => &[],
        }
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Dup2 => "DUP2",
            Self::Swap => "SWAP",
            Self::LoadUndefined => "LOAD_UNDEFINED",
            Self::LoadNull => "LOAD_NULL",
            Self::LoadTrue => "LOAD_TRUE",
            Self::LoadFalse => "LOAD_FALSE",
            Self::LoadInt => "LOAD_INT",
            Self::LoadDouble => "LOAD_DOUBLE",
            Self::LoadString => "LOAD_STRING",
            Self::LoadThis => "LOAD_THIS",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::GetLocal => "GET_LOCAL",
            Self::PutLocal => "PUT_LOCAL",
            Self::GetScopedSlot => "GET_SCOPED_SLOT",
            Self::PutScopedSlot => "PUT_SCOPED_SLOT",
            Self::GetGlobalSlot => "GET_GLOBAL_SLOT",
            Self::PutGlobalSlot => "PUT_GLOBAL_SLOT",
            Self::GetObjSlot => "GET_OBJ_SLOT",
            Self::PutObjSlot => "PUT_OBJ_SLOT",
            Self::GetThisSlot => "GET_THIS_SLOT",
            Self::PutThisSlot => "PUT_THIS_SLOT",
            Self::GetName => "GET_NAME",
            Self::PutName => "PUT_NAME",
            Self::GetObjName => "GET_OBJ_NAME",
            Self::PutObjName => "PUT_OBJ_NAME",
            Self::DeleteObjName => "DELETE_OBJ_NAME",
            Self::GetIndex => "GET_INDEX",
            Self::PutIndex => "PUT_INDEX",
            Self::NewObject => "NEW_OBJECT",
            Self::NewArray => "NEW_ARRAY",
            Self::New => "NEW",
            Self::Closure => "CLOSURE",
            Self::OpenBlock => "OPEN_BLOCK",
            Self::CloseBlock => "CLOSE_BLOCK",
            Self::AddNamespace => "ADD_NAMESPACE",
            Self::Call => "CALL",
            Self::CallObjName => "CALL_OBJ_NAME",
            Self::CallObjSlot => "CALL_OBJ_SLOT",
            Self::CallGlobalSlot => "CALL_GLOBAL_SLOT",
            Self::CallSuper => "CALL_SUPER",
            Self::Goto => "GOTO",
            Self::BranchTrue => "BRANCH_TRUE",
            Self::BranchFalse => "BRANCH_FALSE",
            Self::Return => "RETURN",
            Self::ReturnUndefined => "RETURN_UNDEFINED",
            Self::Throw => "THROW",
            Self::EndException => "END_EXCEPTION",
            Self::InitDefaultArgs => "INIT_DEFAULT_ARGS",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Rem => "REM",
            Self::Neg => "NEG",
            Self::BitAnd => "BIT_AND",
            Self::BitOr => "BIT_OR",
            Self::BitXor => "BIT_XOR",
            Self::BitNot => "BIT_NOT",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::Ushr => "USHR",
            Self::LogicalNot => "LOGICAL_NOT",
            Self::CompareEq => "COMPARE_EQ",
            Self::CompareNe => "COMPARE_NE",
            Self::CompareStrictEq => "COMPARE_STRICT_EQ",
            Self::CompareStrictNe => "COMPARE_STRICT_NE",
            Self::CompareLt => "COMPARE_LT",
            Self::CompareLe => "COMPARE_LE",
            Self::CompareGt => "COMPARE_GT",
            Self::CompareGe => "COMPARE_GE",
            Self::Inc => "INC",
            Self::TypeOf => "TYPE_OF",
            Self::IsA => "IS_A",
            Self::Cast => "CAST",
        }
    }

    /// Check if this opcode transfers control
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Goto | Self::BranchTrue | Self::BranchFalse | Self::InitDefaultArgs
        )
    }

    /// Check if this opcode leaves the function
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::ReturnUndefined)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_return() || matches!(self, Self::Goto | Self::Throw)
    }

    /// Check if this opcode is one of the binary or unary operators
    pub fn is_operator(self) -> bool {
        (0x60..=0x75).contains(&(self as u8))
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
