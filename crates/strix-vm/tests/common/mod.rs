//! Shared helpers for building modules by hand

#![allow(dead_code)]

use std::sync::Arc;
use strix_bytecode::{
    make_version, ClassDef, DependencyDef, ExceptionDef, FunctionDef, ModuleDef, ModuleFile, PropertyDef, Section,
    TypeRef,
};
use strix_vm::{Interpreter, Service, VmOptions};

pub const CONSTRUCTOR: i64 = 0x2000;
pub const STATIC: i64 = 0x800;
pub const INITIALIZER: i64 = 0x10000;
pub const MODULE_INITIALIZER: i64 = 0x40000;
pub const READONLY: i64 = 0x40;
pub const FULL_SCOPE: i64 = 0x4000;
pub const REST_ARGS: i64 = 0x80000;
pub const INTERFACE: i64 = 0x800_0000;
pub const LOOSE_ARGS: i64 = 0x1000_0000;

pub const CATCH: u8 = 0x1;
pub const FINALLY: u8 = 0x2;
pub const ITERATION: u8 = 0x4;

/// First global slot free after boot
pub const FIRST_FREE_SLOT: u32 = 25;

/// Route VM logs to the test harness. Set `RUST_LOG=strix_vm=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn interp() -> Interpreter {
    init_tracing();
    Interpreter::new(Arc::new(Service::new()), VmOptions::default()).unwrap()
}

pub fn function(name: &str, slot: u32, args: u32, locals: u32, code: Vec<u8>) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        space: String::new(),
        next_slot: -1,
        attributes: 0,
        language_mode: 0,
        return_type: TypeRef::None,
        slot,
        arg_count: args,
        default_arg_count: 0,
        local_count: locals,
        exception_count: 0,
        code,
    }
}

pub fn handler(flags: u8, try_range: (usize, usize), handler_range: (usize, usize), catch_type: TypeRef) -> ExceptionDef {
    ExceptionDef {
        flags,
        try_start: try_range.0 as u32,
        try_end: try_range.1 as u32,
        handler_start: handler_range.0 as u32,
        handler_end: handler_range.1 as u32,
        num_blocks: 0,
        num_stack: 0,
        catch_type,
    }
}

/// Section-by-section module builder
pub struct ModuleBuilder {
    def: ModuleDef,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self::versioned(name, make_version(1, 0, 0))
    }

    pub fn versioned(name: &str, version: i64) -> Self {
        Self {
            def: ModuleDef::new(name, version),
        }
    }

    /// Pool offset of `text`, for `Str` operands
    pub fn string(&mut self, text: &str) -> u32 {
        self.def.constants.add(text).unwrap()
    }

    pub fn function(&mut self, def: FunctionDef) -> &mut Self {
        self.function_with_handlers(def, Vec::new())
    }

    pub fn function_with_handlers(&mut self, mut def: FunctionDef, handlers: Vec<ExceptionDef>) -> &mut Self {
        def.exception_count = handlers.len() as u32;
        self.def.sections.push(Section::Function(def));
        self.def.sections.extend(handlers.into_iter().map(Section::Exception));
        self.def.sections.push(Section::FunctionEnd);
        self
    }

    /// Open a function whose following functions are nested in it, up to
    /// the matching [`Self::end_function`]
    pub fn begin_function(&mut self, def: FunctionDef) -> &mut Self {
        self.def.sections.push(Section::Function(def));
        self
    }

    pub fn end_function(&mut self) -> &mut Self {
        self.def.sections.push(Section::FunctionEnd);
        self
    }

    pub fn property(&mut self, name: &str, slot: u32, attributes: i64, ty: TypeRef) -> &mut Self {
        self.def.sections.push(Section::Property(PropertyDef {
            name: name.to_string(),
            space: String::new(),
            attributes,
            slot,
            ty,
        }));
        self
    }

    pub fn class(&mut self, name: &str, slot: u32, base: TypeRef, num_instance: u32) -> &mut Self {
        self.push_class(name, slot, 0, base, num_instance, Vec::new())
    }

    pub fn class_implementing(&mut self, name: &str, slot: u32, base: TypeRef, interfaces: &[TypeRef]) -> &mut Self {
        self.push_class(name, slot, 0, base, 0, interfaces.to_vec())
    }

    /// Interface type extending `extends`; close it with [`Self::end_class`]
    pub fn interface(&mut self, name: &str, slot: u32, extends: &[TypeRef]) -> &mut Self {
        self.push_class(name, slot, INTERFACE, TypeRef::None, 0, extends.to_vec())
    }

    fn push_class(
        &mut self,
        name: &str,
        slot: u32,
        attributes: i64,
        base: TypeRef,
        num_instance: u32,
        interfaces: Vec<TypeRef>,
    ) -> &mut Self {
        self.def.sections.push(Section::Class(ClassDef {
            name: name.to_string(),
            space: String::new(),
            attributes,
            slot,
            base,
            num_static: 0,
            num_instance,
            interfaces,
        }));
        self
    }

    pub fn end_class(&mut self) -> &mut Self {
        self.def.sections.push(Section::ClassEnd);
        self
    }

    pub fn dependency(&mut self, name: &str, min_version: i64, max_version: i64, checksum: i64) -> &mut Self {
        self.def.sections.push(Section::Dependency(DependencyDef {
            name: name.to_string(),
            min_version,
            max_version,
            checksum,
            flags: 0,
        }));
        self
    }

    pub fn build(&mut self) -> ModuleDef {
        let mut def = self.def.clone();
        def.finish().unwrap();
        def
    }

    pub fn bytes(&mut self) -> Vec<u8> {
        ModuleFile::single(self.build()).encode().unwrap()
    }
}
