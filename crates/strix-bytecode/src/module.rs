//! Module file format
//!
//! ```text
//! header:   magic:u16  file_version:i32  content_version:i32  flags:i32
//! module:   [Module] name version checksum pool_len pool_bytes
//!           sections...
//!           [ModuleEnd]
//! ```
//!
//! A file may carry several modules back to back. Every string inside a
//! module's sections is an offset into that module's constant pool.

use crate::constants::ConstantPool;
use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError, MAX_WORD};
use thiserror::Error;

/// Magic number at the start of every module file
pub const MAGIC: u16 = 0xC7DA;

/// Current file format version
pub const FILE_VERSION: i32 = 3;

/// Factor separating major, minor and patch components of a version
pub const VERSION_FACTOR: i64 = 1000;

/// Pack a version triple into a single comparable number
pub fn make_version(major: i64, minor: i64, patch: i64) -> i64 {
    (major * VERSION_FACTOR + minor) * VERSION_FACTOR + patch
}

/// Split a packed version into `(major, minor, patch)`
pub fn split_version(version: i64) -> (i64, i64, i64) {
    (
        version / (VERSION_FACTOR * VERSION_FACTOR),
        (version / VERSION_FACTOR) % VERSION_FACTOR,
        version % VERSION_FACTOR,
    )
}

/// Versions are compatible when only their patch level differs
pub fn compatible_versions(a: i64, b: i64) -> bool {
    a / VERSION_FACTOR == b / VERSION_FACTOR
}

/// Module encoding/decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: {0:#06x}")]
    InvalidMagic(u16),

    /// Unsupported file format version
    #[error("Unsupported file format version: {0}")]
    UnsupportedVersion(i32),

    /// Unknown section tag
    #[error("Unknown section tag {tag} at offset {offset}")]
    UnknownSection {
        /// Tag byte
        tag: u8,
        /// File offset of the tag
        offset: usize,
    },

    /// A section appeared where it is not allowed
    #[error("Unexpected {found:?} section at offset {offset}")]
    UnexpectedSection {
        /// Tag that was found
        found: SectionTag,
        /// File offset of the tag
        offset: usize,
    },

    /// Constant pool could not be parsed or extended
    #[error("Malformed constant pool: {0}")]
    MalformedPool(String),

    /// String cannot be stored in the pool
    #[error("String cannot be pooled: {0:?}")]
    InvalidString(String),

    /// Value out of range for its field
    #[error("Field {field} out of range: {value}")]
    OutOfRange {
        /// Field name
        field: &'static str,
        /// Offending value
        value: i64,
    },

    /// Stored checksum does not match the sections
    #[error("Checksum mismatch for module {name}: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Module name
        name: String,
        /// Stored checksum
        expected: i64,
        /// Recomputed checksum
        actual: i64,
    },
}

/// Section tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionTag {
    /// Start of a module
    Module = 1,
    /// End of a module
    ModuleEnd = 2,
    /// Source line table of the preceding function
    Debug = 3,
    /// Module dependency
    Dependency = 4,
    /// Class definition
    Class = 5,
    /// End of class
    ClassEnd = 6,
    /// Function definition
    Function = 7,
    /// End of function
    FunctionEnd = 8,
    /// Nested block scope
    Block = 9,
    /// End of block
    BlockEnd = 10,
    /// Property definition
    Property = 11,
    /// Exception handler of the enclosing function
    Exception = 12,
    /// Documentation comment
    Doc = 13,
}

impl SectionTag {
    /// Convert a byte to a tag
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Module,
            2 => Self::ModuleEnd,
            3 => Self::Debug,
            4 => Self::Dependency,
            5 => Self::Class,
            6 => Self::ClassEnd,
            7 => Self::Function,
            8 => Self::FunctionEnd,
            9 => Self::Block,
            10 => Self::BlockEnd,
            11 => Self::Property,
            12 => Self::Exception,
            13 => Self::Doc,
            _ => return None,
        })
    }
}

/// Module file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    /// Must equal [`MAGIC`]
    pub magic: u16,
    /// Must equal [`FILE_VERSION`]
    pub file_version: i32,
    /// Producer-defined content version
    pub content_version: i32,
    /// Producer flags
    pub flags: i32,
}

impl Default for ModuleHeader {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            file_version: FILE_VERSION,
            content_version: 0,
            flags: 0,
        }
    }
}

const TYPE_REF_NONE: i64 = 0;
const TYPE_REF_NAME: i64 = 1;
const TYPE_REF_SLOT: i64 = 2;
const TYPE_REF_MASK: i64 = 0x3;
const TYPE_REF_SHIFT: u32 = 2;

/// Encoded reference to a type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeRef {
    /// No type (untyped or `*`)
    #[default]
    None,
    /// Type named by qualified name
    Name {
        /// Namespace of the type
        space: String,
        /// Name of the type
        name: String,
    },
    /// Type stored in a global slot
    Slot(u32),
}

impl TypeRef {
    /// Reference a type by name
    pub fn named(space: &str, name: &str) -> Self {
        Self::Name {
            space: space.to_string(),
            name: name.to_string(),
        }
    }
}

/// Dependency on another module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDef {
    /// Module name
    pub name: String,
    /// Lowest acceptable version
    pub min_version: i64,
    /// Highest acceptable version
    pub max_version: i64,
    /// Expected checksum (0 accepts any)
    pub checksum: i64,
    /// Loader flags
    pub flags: u8,
}

/// Class definition; its members follow until `ClassEnd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    /// Class name
    pub name: String,
    /// Namespace of the class
    pub space: String,
    /// Trait and class attribute bits
    pub attributes: i64,
    /// Global slot the class occupies
    pub slot: u32,
    /// Base class
    pub base: TypeRef,
    /// Number of static properties
    pub num_static: u32,
    /// Number of instance properties, inherited ones included
    pub num_instance: u32,
    /// Implemented interfaces
    pub interfaces: Vec<TypeRef>,
}

/// Property definition inside the enclosing class, function, block or module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// Namespace of the property
    pub space: String,
    /// Trait attribute bits
    pub attributes: i64,
    /// Slot number in the owner
    pub slot: u32,
    /// Declared type
    pub ty: TypeRef,
}

/// Function definition; handlers, locals and blocks follow until `FunctionEnd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Namespace of the function
    pub space: String,
    /// Slot of the paired setter, or -1
    pub next_slot: i64,
    /// Trait and function attribute bits
    pub attributes: i64,
    /// Language mode (0 = standard, 1 = strict)
    pub language_mode: u8,
    /// Declared return type
    pub return_type: TypeRef,
    /// Slot the function occupies in its owner
    pub slot: u32,
    /// Number of formal parameters
    pub arg_count: u32,
    /// Number of parameters with default values
    pub default_arg_count: u32,
    /// Number of locals, parameters included
    pub local_count: u32,
    /// Number of exception sections that follow
    pub exception_count: u32,
    /// Bytecode
    pub code: Vec<u8>,
}

/// Exception handler record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionDef {
    /// Handler flags (catch, finally, iteration)
    pub flags: u8,
    /// First covered bytecode offset
    pub try_start: u32,
    /// End of the covered range (exclusive)
    pub try_end: u32,
    /// First handler offset
    pub handler_start: u32,
    /// End of the handler (exclusive)
    pub handler_end: u32,
    /// Block scopes open at the handler
    pub num_blocks: u32,
    /// Operand stack depth at the handler
    pub num_stack: u32,
    /// Caught type, `None` catches everything
    pub catch_type: TypeRef,
}

/// One entry of a debug line table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDef {
    /// Bytecode offset where the line starts
    pub offset: u32,
    /// Source location text, e.g. `file.es:12: let x = 1`
    pub source: String,
}

/// Nested block scope definition; its properties follow until `BlockEnd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDef {
    /// Block name
    pub name: String,
    /// Slot in the enclosing function
    pub slot: u32,
    /// Number of properties in the block
    pub prop_count: u32,
}

/// Typed section inside a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    /// Dependency
    Dependency(DependencyDef),
    /// Class start
    Class(ClassDef),
    /// Class end
    ClassEnd,
    /// Function start
    Function(FunctionDef),
    /// Function end
    FunctionEnd,
    /// Block start
    Block(BlockDef),
    /// Block end
    BlockEnd,
    /// Property
    Property(PropertyDef),
    /// Exception handler
    Exception(ExceptionDef),
    /// Debug line table
    Debug(Vec<LineDef>),
    /// Documentation text
    Doc(String),
}

impl Section {
    /// Tag byte of the section
    pub fn tag(&self) -> SectionTag {
        match self {
            Self::Dependency(_) => SectionTag::Dependency,
            Self::Class(_) => SectionTag::Class,
            Self::ClassEnd => SectionTag::ClassEnd,
            Self::Function(_) => SectionTag::Function,
            Self::FunctionEnd => SectionTag::FunctionEnd,
            Self::Block(_) => SectionTag::Block,
            Self::BlockEnd => SectionTag::BlockEnd,
            Self::Property(_) => SectionTag::Property,
            Self::Exception(_) => SectionTag::Exception,
            Self::Debug(_) => SectionTag::Debug,
            Self::Doc(_) => SectionTag::Doc,
        }
    }

    fn strings(&self) -> Vec<&str> {
        fn type_ref<'a>(ty: &'a TypeRef, out: &mut Vec<&'a str>) {
            if let TypeRef::Name { space, name } = ty {
                out.push(name);
                out.push(space);
            }
        }
        let mut out = Vec::new();
        match self {
            Self::Dependency(dep) => out.push(dep.name.as_str()),
            Self::Class(class) => {
                out.push(&class.name);
                out.push(&class.space);
                type_ref(&class.base, &mut out);
                for iface in &class.interfaces {
                    type_ref(iface, &mut out);
                }
            }
            Self::Function(fun) => {
                out.push(&fun.name);
                out.push(&fun.space);
                type_ref(&fun.return_type, &mut out);
            }
            Self::Block(block) => out.push(&block.name),
            Self::Property(prop) => {
                out.push(&prop.name);
                out.push(&prop.space);
                type_ref(&prop.ty, &mut out);
            }
            Self::Exception(ex) => type_ref(&ex.catch_type, &mut out),
            Self::Debug(lines) => out.extend(lines.iter().map(|line| line.source.as_str())),
            Self::Doc(text) => out.push(text),
            Self::ClassEnd | Self::FunctionEnd | Self::BlockEnd => {}
        }
        out
    }

    fn encode(&self, w: &mut BytecodeWriter, pool: &ConstantPool) -> Result<(), ModuleError> {
        w.emit_u8(self.tag() as u8);
        match self {
            Self::Dependency(dep) => {
                emit_string(w, pool, &dep.name)?;
                w.emit_num(dep.min_version);
                w.emit_num(dep.max_version);
                w.emit_num(dep.checksum);
                w.emit_u8(dep.flags);
            }
            Self::Class(class) => {
                emit_string(w, pool, &class.name)?;
                emit_string(w, pool, &class.space)?;
                w.emit_num(class.attributes);
                w.emit_num(class.slot as i64);
                emit_type_ref(w, pool, &class.base)?;
                w.emit_num(class.num_static as i64);
                w.emit_num(class.num_instance as i64);
                w.emit_num(class.interfaces.len() as i64);
                for iface in &class.interfaces {
                    emit_type_ref(w, pool, iface)?;
                }
            }
            Self::Function(fun) => {
                emit_string(w, pool, &fun.name)?;
                emit_string(w, pool, &fun.space)?;
                w.emit_num(fun.next_slot);
                w.emit_num(fun.attributes);
                w.emit_u8(fun.language_mode);
                emit_type_ref(w, pool, &fun.return_type)?;
                w.emit_num(fun.slot as i64);
                w.emit_num(fun.arg_count as i64);
                w.emit_num(fun.default_arg_count as i64);
                w.emit_num(fun.local_count as i64);
                w.emit_num(fun.exception_count as i64);
                w.emit_num(fun.code.len() as i64);
                w.emit_bytes(&fun.code);
            }
            Self::Block(block) => {
                emit_string(w, pool, &block.name)?;
                w.emit_num(block.slot as i64);
                w.emit_num(block.prop_count as i64);
            }
            Self::Property(prop) => {
                emit_string(w, pool, &prop.name)?;
                emit_string(w, pool, &prop.space)?;
                w.emit_num(prop.attributes);
                w.emit_num(prop.slot as i64);
                emit_type_ref(w, pool, &prop.ty)?;
            }
            Self::Exception(ex) => {
                w.emit_u8(ex.flags);
                w.emit_num(ex.try_start as i64);
                w.emit_num(ex.try_end as i64);
                w.emit_num(ex.handler_start as i64);
                w.emit_num(ex.handler_end as i64);
                w.emit_num(ex.num_blocks as i64);
                w.emit_num(ex.num_stack as i64);
                emit_type_ref(w, pool, &ex.catch_type)?;
            }
            Self::Debug(lines) => {
                w.emit_num(lines.len() as i64);
                for line in lines {
                    w.emit_num(line.offset as i64);
                    emit_string(w, pool, &line.source)?;
                }
            }
            Self::Doc(text) => emit_string(w, pool, text)?,
            Self::ClassEnd | Self::FunctionEnd | Self::BlockEnd => {}
        }
        Ok(())
    }

    fn decode(
        tag: SectionTag,
        r: &mut BytecodeReader<'_>,
        pool: &ConstantPool,
    ) -> Result<Self, ModuleError> {
        Ok(match tag {
            SectionTag::Dependency => Self::Dependency(DependencyDef {
                name: read_string(r, pool)?,
                min_version: r.read_num()?,
                max_version: r.read_num()?,
                checksum: r.read_num()?,
                flags: r.read_u8()?,
            }),
            SectionTag::Class => {
                let name = read_string(r, pool)?;
                let space = read_string(r, pool)?;
                let attributes = r.read_num()?;
                let slot = read_u32(r, "slot")?;
                let base = read_type_ref(r, pool)?;
                let num_static = read_u32(r, "numStaticProps")?;
                let num_instance = read_u32(r, "numInstanceProps")?;
                let count = read_u32(r, "numInterfaces")?;
                let mut interfaces = Vec::with_capacity(count.min(64) as usize);
                for _ in 0..count {
                    interfaces.push(read_type_ref(r, pool)?);
                }
                Self::Class(ClassDef {
                    name,
                    space,
                    attributes,
                    slot,
                    base,
                    num_static,
                    num_instance,
                    interfaces,
                })
            }
            SectionTag::Function => {
                let name = read_string(r, pool)?;
                let space = read_string(r, pool)?;
                let next_slot = r.read_num()?;
                let attributes = r.read_num()?;
                let language_mode = r.read_u8()?;
                let return_type = read_type_ref(r, pool)?;
                let slot = read_u32(r, "slot")?;
                let arg_count = read_u32(r, "argCount")?;
                let default_arg_count = read_u32(r, "defaultArgCount")?;
                let local_count = read_u32(r, "localCount")?;
                let exception_count = read_u32(r, "exceptionCount")?;
                let code_len = read_u32(r, "codeLength")?;
                let code = r.read_bytes(code_len as usize)?.to_vec();
                Self::Function(FunctionDef {
                    name,
                    space,
                    next_slot,
                    attributes,
                    language_mode,
                    return_type,
                    slot,
                    arg_count,
                    default_arg_count,
                    local_count,
                    exception_count,
                    code,
                })
            }
            SectionTag::Block => Self::Block(BlockDef {
                name: read_string(r, pool)?,
                slot: read_u32(r, "slot")?,
                prop_count: read_u32(r, "propCount")?,
            }),
            SectionTag::Property => Self::Property(PropertyDef {
                name: read_string(r, pool)?,
                space: read_string(r, pool)?,
                attributes: r.read_num()?,
                slot: read_u32(r, "slot")?,
                ty: read_type_ref(r, pool)?,
            }),
            SectionTag::Exception => Self::Exception(ExceptionDef {
                flags: r.read_u8()?,
                try_start: read_u32(r, "tryStart")?,
                try_end: read_u32(r, "tryEnd")?,
                handler_start: read_u32(r, "handlerStart")?,
                handler_end: read_u32(r, "handlerEnd")?,
                num_blocks: read_u32(r, "numOpenBlocks")?,
                num_stack: read_u32(r, "numStack")?,
                catch_type: read_type_ref(r, pool)?,
            }),
            SectionTag::Debug => {
                let count = read_u32(r, "lineCount")?;
                let mut lines = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    lines.push(LineDef {
                        offset: read_u32(r, "lineOffset")?,
                        source: read_string(r, pool)?,
                    });
                }
                Self::Debug(lines)
            }
            SectionTag::Doc => Self::Doc(read_string(r, pool)?),
            SectionTag::ClassEnd => Self::ClassEnd,
            SectionTag::FunctionEnd => Self::FunctionEnd,
            SectionTag::BlockEnd => Self::BlockEnd,
            SectionTag::Module | SectionTag::ModuleEnd => {
                return Err(ModuleError::UnexpectedSection {
                    found: tag,
                    offset: r.position().saturating_sub(1),
                })
            }
        })
    }
}

fn emit_string(w: &mut BytecodeWriter, pool: &ConstantPool, text: &str) -> Result<(), ModuleError> {
    let offset = pool
        .offset_of(text)
        .ok_or_else(|| ModuleError::InvalidString(text.to_string()))?;
    w.emit_num(offset as i64);
    Ok(())
}

fn emit_type_ref(w: &mut BytecodeWriter, pool: &ConstantPool, ty: &TypeRef) -> Result<(), ModuleError> {
    match ty {
        TypeRef::None => w.emit_num(TYPE_REF_NONE),
        TypeRef::Slot(slot) => w.emit_num(((*slot as i64) << TYPE_REF_SHIFT) | TYPE_REF_SLOT),
        TypeRef::Name { space, name } => {
            let offset = pool
                .offset_of(name)
                .ok_or_else(|| ModuleError::InvalidString(name.clone()))?;
            w.emit_num(((offset as i64) << TYPE_REF_SHIFT) | TYPE_REF_NAME);
            emit_string(w, pool, space)?;
        }
    }
    Ok(())
}

fn read_string(r: &mut BytecodeReader<'_>, pool: &ConstantPool) -> Result<String, ModuleError> {
    let offset = r.read_num()?;
    Ok(pool.get(offset)?.to_string())
}

fn read_u32(r: &mut BytecodeReader<'_>, field: &'static str) -> Result<u32, ModuleError> {
    let value = r.read_num()?;
    u32::try_from(value).map_err(|_| ModuleError::OutOfRange { field, value })
}

fn read_type_ref(r: &mut BytecodeReader<'_>, pool: &ConstantPool) -> Result<TypeRef, ModuleError> {
    let raw = r.read_num()?;
    let payload = raw >> TYPE_REF_SHIFT;
    match raw & TYPE_REF_MASK {
        TYPE_REF_NONE => Ok(TypeRef::None),
        TYPE_REF_SLOT => Ok(TypeRef::Slot(u32::try_from(payload).map_err(|_| {
            ModuleError::OutOfRange {
                field: "typeSlot",
                value: payload,
            }
        })?)),
        TYPE_REF_NAME => {
            let name = pool.get(payload)?.to_string();
            let space = read_string(r, pool)?;
            Ok(TypeRef::Name { space, name })
        }
        _ => Err(ModuleError::OutOfRange {
            field: "typeRef",
            value: raw,
        }),
    }
}

/// One module: identity, constant pool and its sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDef {
    /// Module name
    pub name: String,
    /// Packed version, see [`make_version`]
    pub version: i64,
    /// Checksum of the encoded sections
    pub checksum: i64,
    /// Constant pool shared by sections and bytecode
    pub constants: ConstantPool,
    /// Sections between `Module` and `ModuleEnd`
    pub sections: Vec<Section>,
}

impl ModuleDef {
    /// Create an empty module
    pub fn new(name: &str, version: i64) -> Self {
        Self {
            name: name.to_string(),
            version,
            checksum: 0,
            constants: ConstantPool::new(),
            sections: Vec::new(),
        }
    }

    /// Pool every string the sections reference and compute the checksum.
    ///
    /// Must be called after the last section is added and before encoding.
    pub fn finish(&mut self) -> Result<(), ModuleError> {
        self.constants.add(&self.name)?;
        for section in &self.sections {
            for text in section.strings() {
                self.constants.add(text)?;
            }
        }
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    /// CRC-32 of the encoded sections, folded into a word
    pub fn compute_checksum(&self) -> Result<i64, ModuleError> {
        let mut body = BytecodeWriter::new();
        for section in &self.sections {
            section.encode(&mut body, &self.constants)?;
        }
        Ok(crc32fast::hash(body.buffer()) as i64 & MAX_WORD)
    }

    /// Check the stored checksum against the sections
    pub fn verify_checksum(&self) -> Result<(), ModuleError> {
        let actual = self.compute_checksum()?;
        if actual != self.checksum {
            return Err(ModuleError::ChecksumMismatch {
                name: self.name.clone(),
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Iterate over dependency sections
    pub fn dependencies(&self) -> impl Iterator<Item = &DependencyDef> {
        self.sections.iter().filter_map(|section| match section {
            Section::Dependency(dep) => Some(dep),
            _ => None,
        })
    }

    fn encode(&self, w: &mut BytecodeWriter) -> Result<(), ModuleError> {
        w.emit_u8(SectionTag::Module as u8);
        emit_string(w, &self.constants, &self.name)?;
        w.emit_num(self.version);
        w.emit_num(self.checksum);
        w.emit_num(self.constants.len() as i64);
        w.emit_bytes(self.constants.as_bytes());
        for section in &self.sections {
            section.encode(w, &self.constants)?;
        }
        w.emit_u8(SectionTag::ModuleEnd as u8);
        Ok(())
    }

    fn decode(r: &mut BytecodeReader<'_>) -> Result<Self, ModuleError> {
        // The name precedes the pool it lives in
        let name_offset = r.read_num()?;
        let version = r.read_num()?;
        let checksum = r.read_num()?;
        let pool_len = read_u32(r, "constantPoolLength")?;
        let constants = ConstantPool::from_bytes(r.read_bytes(pool_len as usize)?.to_vec())?;
        let name = constants.get(name_offset)?.to_string();

        let mut sections = Vec::new();
        loop {
            let offset = r.position();
            let byte = r.read_u8()?;
            let tag = SectionTag::from_u8(byte).ok_or(ModuleError::UnknownSection { tag: byte, offset })?;
            if tag == SectionTag::ModuleEnd {
                break;
            }
            sections.push(Section::decode(tag, r, &constants)?);
        }
        Ok(Self {
            name,
            version,
            checksum,
            constants,
            sections,
        })
    }
}

/// A decoded module file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleFile {
    /// File header
    pub header: ModuleHeader,
    /// Modules in file order
    pub modules: Vec<ModuleDef>,
}

impl ModuleFile {
    /// Wrap a single module with a default header
    pub fn single(module: ModuleDef) -> Self {
        Self {
            header: ModuleHeader::default(),
            modules: vec![module],
        }
    }

    /// Encode the file
    pub fn encode(&self) -> Result<Vec<u8>, ModuleError> {
        let mut w = BytecodeWriter::new();
        w.emit_u16(self.header.magic);
        w.emit_i32(self.header.file_version);
        w.emit_i32(self.header.content_version);
        w.emit_i32(self.header.flags);
        for module in &self.modules {
            module.encode(&mut w)?;
        }
        Ok(w.into_bytes())
    }

    /// Decode a file
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut r = BytecodeReader::new(data);
        let magic = r.read_u16()?;
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }
        let file_version = r.read_i32()?;
        if file_version != FILE_VERSION {
            return Err(ModuleError::UnsupportedVersion(file_version));
        }
        let header = ModuleHeader {
            magic,
            file_version,
            content_version: r.read_i32()?,
            flags: r.read_i32()?,
        };

        let mut modules = Vec::new();
        while !r.is_at_end() {
            let offset = r.position();
            let byte = r.read_u8()?;
            match SectionTag::from_u8(byte) {
                Some(SectionTag::Module) => modules.push(ModuleDef::decode(&mut r)?),
                Some(found) => return Err(ModuleError::UnexpectedSection { found, offset }),
                None => return Err(ModuleError::UnknownSection { tag: byte, offset }),
            }
        }
        Ok(Self { header, modules })
    }
}
