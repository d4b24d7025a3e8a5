//! Module loading and the shared module cache
//!
//! A decoded module becomes a [`ModuleImage`]: the section records plus the
//! prebuilt [`Code`] of every function, with its handler and line tables.
//! Images are immutable and shared through the [`Service`] by every
//! interpreter created from it. Loading a module into an interpreter
//! instantiates the image on that interpreter's heap and yields a
//! [`LoadedModule`].

mod fixup;
mod loader;

use crate::error::VmResult;
use crate::intern::{IStr, InternTable};
use crate::interpreter::Interpreter;
use crate::object::{CatchType, Code, ConstantStrings, Handler, HandlerFlags, LineInfo, QualifiedName};
use crate::options::LoadFlags;
use crate::value::ObjRef;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use strix_bytecode::{ExceptionDef, ModuleDef, Section, TypeRef};
use tracing::debug;

/// Hook run after a module of the registered name is instantiated, to bind
/// native implementations into its slots
pub type NativeConfigure = fn(&mut Interpreter) -> VmResult<()>;

// ============================================================================
// Service
// ============================================================================

/// State shared by every interpreter created from it: the intern table,
/// decoded module images and native module hooks
#[derive(Debug, Default)]
pub struct Service {
    strings: InternTable,
    modules: RwLock<FxHashMap<String, Vec<Arc<ModuleImage>>>>,
    eternal: RwLock<FxHashSet<String>>,
    natives: RwLock<FxHashMap<String, NativeConfigure>>,
}

impl Service {
    /// Create a service with an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared intern table
    pub fn strings(&self) -> &InternTable {
        &self.strings
    }

    /// Register the configure hook of a native module
    pub fn register_native(&self, name: &str, configure: NativeConfigure) {
        self.natives.write().insert(name.to_string(), configure);
    }

    /// Configure hook registered for `name`
    pub fn native(&self, name: &str) -> Option<NativeConfigure> {
        self.natives.read().get(name).copied()
    }

    /// Newest cached image of `name` with a version in `min..=max`
    pub fn find(&self, name: &str, min_version: i64, max_version: i64) -> Option<Arc<ModuleImage>> {
        self.modules
            .read()
            .get(name)?
            .iter()
            .filter(|image| (min_version..=max_version).contains(&image.version))
            .max_by_key(|image| image.version)
            .cloned()
    }

    /// Add an image to the cache, replacing one of the same version
    pub fn insert(&self, image: Arc<ModuleImage>, eternal: bool) {
        let name = image.name.clone();
        let mut modules = self.modules.write();
        let versions = modules.entry(name.clone()).or_default();
        versions.retain(|cached| cached.version != image.version);
        versions.push(image);
        drop(modules);
        if eternal {
            self.eternal.write().insert(name);
        }
    }

    /// Drop every cached image of `name`. Eternal modules stay; returns
    /// true when something was removed.
    pub fn unload(&self, name: &str) -> bool {
        if self.eternal.read().contains(name) {
            return false;
        }
        let removed = self.modules.write().remove(name).is_some();
        if removed {
            debug!(module = name, "module unloaded from cache");
        }
        removed
    }

    /// Number of cached images
    pub fn cached_modules(&self) -> usize {
        self.modules.read().values().map(Vec::len).sum()
    }
}

// ============================================================================
// Images
// ============================================================================

/// Decoded, heap-independent form of a module
#[derive(Debug)]
pub struct ModuleImage {
    /// Module name
    pub name: String,
    /// Packed version
    pub version: i64,
    /// Section checksum
    pub checksum: i64,
    /// Section records
    pub def: ModuleDef,
    /// Interned constant pool
    pub strings: Arc<ConstantStrings>,
    /// Code of every function section, in section order
    pub codes: Vec<Arc<Code>>,
}

impl ModuleImage {
    /// Intern the pool and build the code of every function. Exception
    /// sections belong to the function they follow; a debug section to the
    /// most recent function.
    pub fn new(def: ModuleDef, table: &InternTable) -> Self {
        let strings = Arc::new(ConstantStrings::from_pool(&def.constants, table));
        let mut bodies: Vec<(Vec<u8>, Vec<Handler>, Vec<LineInfo>)> = Vec::new();
        for section in &def.sections {
            match section {
                Section::Function(fun) => bodies.push((fun.code.clone(), Vec::new(), Vec::new())),
                Section::Exception(ex) => {
                    if let Some(body) = bodies.last_mut() {
                        body.1.push(handler(ex, table));
                    }
                }
                Section::Debug(lines) => {
                    if let Some(body) = bodies.last_mut() {
                        body.2.extend(lines.iter().map(|line| LineInfo {
                            offset: line.offset,
                            source: line.source.clone(),
                        }));
                        body.2.sort_by_key(|line| line.offset);
                    }
                }
                _ => {}
            }
        }
        let codes = bodies
            .into_iter()
            .map(|(bytes, handlers, lines)| {
                let mut code = Code::new(bytes, Arc::clone(&strings));
                code.handlers = handlers;
                code.lines = lines;
                Arc::new(code)
            })
            .collect();

        Self {
            name: def.name.clone(),
            version: def.version,
            checksum: def.checksum,
            def,
            strings,
            codes,
        }
    }
}

fn handler(ex: &ExceptionDef, table: &InternTable) -> Handler {
    let catch_type = match &ex.catch_type {
        TypeRef::None => CatchType::Any,
        TypeRef::Name { space, name } => {
            CatchType::Name(QualifiedName::new(table.intern(space), table.intern(name)))
        }
        TypeRef::Slot(slot) => CatchType::GlobalSlot(*slot as usize),
    };
    Handler {
        flags: HandlerFlags::from_bits(ex.flags),
        try_start: ex.try_start,
        try_end: ex.try_end,
        handler_start: ex.handler_start,
        handler_end: ex.handler_end,
        num_blocks: ex.num_blocks,
        num_stack: ex.num_stack,
        catch_type,
    }
}

// ============================================================================
// Loaded modules
// ============================================================================

/// A module instantiated in one interpreter
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Module name
    pub name: String,
    /// Packed version
    pub version: i64,
    /// Section checksum
    pub checksum: i64,
    /// Image the module was instantiated from
    pub image: Arc<ModuleImage>,
    /// Flags the module was loaded with
    pub flags: LoadFlags,
    /// Module initializer function
    pub initializer: Option<ObjRef>,
    /// Static initializers of the module's types, in definition order
    pub type_initializers: Vec<ObjRef>,
    /// Types the module defines
    pub types: Vec<ObjRef>,
    /// Functions the module defines at top level
    pub functions: Vec<ObjRef>,
    /// Documentation sections, kept when the interpreter loads docs
    pub docs: Vec<IStr>,
}

impl LoadedModule {
    /// Heap objects the module keeps alive
    pub fn references(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.initializer
            .into_iter()
            .chain(self.type_initializers.iter().copied())
            .chain(self.types.iter().copied())
            .chain(self.functions.iter().copied())
    }
}
