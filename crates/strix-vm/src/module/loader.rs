//! Instantiating module images
//!
//! Loading resolves dependencies first (modules already loaded in this
//! interpreter, then the service cache, then `<name>.mod` on the search
//! paths), then walks the sections with collection paused, defining types,
//! functions and properties into their holders. Forward type references
//! are fixed up when the sections end. Native configure hooks and
//! initializers run once the module is registered.

use super::fixup::{Fixup, Holder};
use super::{LoadedModule, ModuleImage};
use crate::error::{LoadError, VmError, VmResult};
use crate::helpers::Helpers;
use crate::intern::IStr;
use crate::interpreter::Interpreter;
use crate::object::{
    Attributes, Block, BlockKind, CatchType, Function, FunctionBody, HeapObject, Layout, ObjKind, PropertyStore,
    QualifiedName, SlotHint, TypeObj,
};
use crate::options::LoadFlags;
use crate::value::{ObjRef, Value};
use std::path::Path;
use std::sync::Arc;
use strix_bytecode::{
    verify_module, BlockDef, ClassDef, DependencyDef, FunctionDef, ModuleDef, ModuleFile, PropertyDef, Section,
    TypeRef,
};
use tracing::{debug, warn};

/// Section being filled
#[derive(Debug, Clone)]
enum Context {
    Module,
    Class { ty: ObjRef, base: TypeRef },
    Function(ObjRef),
    Block { function: ObjRef, block: ObjRef },
}

/// Per-instantiation state
struct Builder {
    module: IStr,
    contexts: Vec<Context>,
    fixups: Vec<Fixup>,
    /// Getters waiting for the setter in slot `usize` of the same holder
    setters: Vec<(Holder, ObjRef, usize)>,
    next_code: usize,
    loaded: LoadedModule,
}

impl Builder {
    fn current(&self) -> Context {
        self.contexts.last().cloned().unwrap_or(Context::Module)
    }

    fn malformed(&self, reason: impl Into<String>) -> VmError {
        LoadError::Malformed {
            module: self.loaded.name.clone(),
            reason: reason.into(),
        }
        .into()
    }
}

impl Interpreter {
    // =========================================================================
    // Entry points
    // =========================================================================

    /// Decode a module file and load every module in it
    ///
    /// Returns the names of the loaded modules in file order.
    pub fn load_module_bytes(&mut self, bytes: &[u8]) -> VmResult<Vec<String>> {
        self.check_live()?;
        let file = ModuleFile::decode(bytes)?;
        let flags = self.options.load_flags;
        let mut names = Vec::with_capacity(file.modules.len());
        for def in file.modules {
            names.push(def.name.clone());
            self.load_module(def, flags)?;
        }
        Ok(names)
    }

    /// Read and load a module file
    pub fn load_module_file(&mut self, path: impl AsRef<Path>) -> VmResult<Vec<String>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.load_module_bytes(&bytes)
    }

    /// Verify a decoded module, add it to the service cache and instantiate
    /// it. Returns its index in [`Self::loaded_modules`].
    pub fn load_module(&mut self, def: ModuleDef, flags: LoadFlags) -> VmResult<usize> {
        self.check_live()?;
        let flags = flags | self.options.load_flags;
        if flags.contains(LoadFlags::STRICT) {
            def.verify_checksum()?;
        }
        verify_module(&def).map_err(LoadError::from)?;
        let image = Arc::new(ModuleImage::new(def, self.service.strings()));
        self.service.insert(Arc::clone(&image), flags.contains(LoadFlags::ETERNAL));
        self.load_image(image, flags)
    }

    /// Loaded module by name
    pub fn find_module(&self, name: &str) -> Option<&LoadedModule> {
        self.modules.iter().rev().find(|m| m.name == name)
    }

    /// Create an interpreter on the same service and instantiate the
    /// modules `template` has loaded, in the same order, from the shared
    /// images
    pub fn clone_from(template: &Interpreter) -> VmResult<Interpreter> {
        let mut interp = Interpreter::new(Arc::clone(&template.service), template.options.clone())?;
        for module in &template.modules {
            interp.load_image(Arc::clone(&module.image), module.flags)?;
        }
        debug!(template = template.id.as_u64(), id = interp.id.as_u64(), "interpreter cloned");
        Ok(interp)
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    fn load_image(&mut self, image: Arc<ModuleImage>, flags: LoadFlags) -> VmResult<usize> {
        if !flags.contains(LoadFlags::RELOAD) {
            let existing = self
                .modules
                .iter()
                .position(|m| m.name == image.name && m.version == image.version);
            if let Some(index) = existing {
                return Ok(index);
            }
        }
        if self.loading.contains(&image.name) {
            return Err(LoadError::Circular(image.name.clone()).into());
        }

        self.loading.push(image.name.clone());
        let linked = self.link(&image, flags);
        self.loading.pop();
        let module = linked?;

        debug!(
            module = %module.name,
            version = module.version,
            types = module.types.len(),
            functions = module.functions.len(),
            "module loaded"
        );
        self.modules.push(module);
        let index = self.modules.len() - 1;

        if let Some(configure) = self.service.native(&image.name) {
            configure(self)?;
        }
        if !flags.contains(LoadFlags::NO_INIT) {
            self.run_initializers(index)?;
        }
        Ok(index)
    }

    fn link(&mut self, image: &Arc<ModuleImage>, flags: LoadFlags) -> VmResult<LoadedModule> {
        let dep_flags = flags.without(LoadFlags::RELOAD) | LoadFlags::DEP;
        for dep in image.def.dependencies() {
            self.resolve_dependency(dep, dep_flags)?;
        }
        self.gc.pause();
        let built = self.instantiate(image, flags);
        self.gc.resume();
        built
    }

    fn resolve_dependency(&mut self, dep: &DependencyDef, flags: LoadFlags) -> VmResult<()> {
        let range = dep.min_version..=dep.max_version;
        if let Some(loaded) = self
            .modules
            .iter()
            .find(|m| m.name == dep.name && range.contains(&m.version))
        {
            return check_checksum(dep, loaded.checksum);
        }
        if self.loading.contains(&dep.name) {
            return Err(LoadError::Circular(dep.name.clone()).into());
        }

        let image = match self.service.find(&dep.name, dep.min_version, dep.max_version) {
            Some(image) => Some(image),
            None => self.read_dependency(dep)?,
        };
        let Some(image) = image else {
            return Err(LoadError::MissingDependency {
                name: dep.name.clone(),
                min_version: dep.min_version,
                max_version: dep.max_version,
            }
            .into());
        };
        check_checksum(dep, image.checksum)?;
        self.load_image(image, flags)?;
        Ok(())
    }

    /// Look for `<name>.mod` on the search paths and cache every module it
    /// holds
    fn read_dependency(&mut self, dep: &DependencyDef) -> VmResult<Option<Arc<ModuleImage>>> {
        let file_name = format!("{}.mod", dep.name);
        let Some(path) = self
            .options
            .search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
        else {
            return Ok(None);
        };

        let bytes = std::fs::read(&path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file = ModuleFile::decode(&bytes)?;
        for def in file.modules {
            verify_module(&def).map_err(LoadError::from)?;
            let image = Arc::new(ModuleImage::new(def, self.service.strings()));
            self.service.insert(image, false);
        }
        debug!(module = %dep.name, path = %path.display(), "module read from search path");
        Ok(self.service.find(&dep.name, dep.min_version, dep.max_version))
    }

    // =========================================================================
    // Sections
    // =========================================================================

    fn instantiate(&mut self, image: &Arc<ModuleImage>, flags: LoadFlags) -> VmResult<LoadedModule> {
        let mut b = Builder {
            module: self.intern(&image.name),
            contexts: vec![Context::Module],
            fixups: Vec::new(),
            setters: Vec::new(),
            next_code: 0,
            loaded: LoadedModule {
                name: image.name.clone(),
                version: image.version,
                checksum: image.checksum,
                image: Arc::clone(image),
                flags,
                initializer: None,
                type_initializers: Vec::new(),
                types: Vec::new(),
                functions: Vec::new(),
                docs: Vec::new(),
            },
        };

        for section in &image.def.sections {
            match section {
                Section::Dependency(_) | Section::Exception(_) | Section::Debug(_) => {}
                Section::Doc(text) => {
                    if self.options.load_docs {
                        let text = self.intern(text);
                        b.loaded.docs.push(text);
                    }
                }
                Section::Class(class) => self.begin_class(&mut b, class)?,
                Section::ClassEnd => match b.contexts.pop() {
                    Some(Context::Class { ty, base }) => self.end_class(&mut b, ty, base)?,
                    _ => return Err(b.malformed("ClassEnd without Class")),
                },
                Section::Function(fun) => self.begin_function(&mut b, image, fun)?,
                Section::FunctionEnd => match b.contexts.pop() {
                    Some(Context::Function(_)) => {}
                    _ => return Err(b.malformed("FunctionEnd without Function")),
                },
                Section::Block(block) => self.begin_block(&mut b, block)?,
                Section::BlockEnd => match b.contexts.pop() {
                    Some(Context::Block { .. }) => {}
                    _ => return Err(b.malformed("BlockEnd without Block")),
                },
                Section::Property(prop) => self.define_section_property(&mut b, prop)?,
            }
        }
        if b.contexts.len() != 1 {
            return Err(b.malformed("Unterminated section at end of module"));
        }

        for (holder, getter, slot) in std::mem::take(&mut b.setters) {
            let setter = {
                let store = self.holder_store(holder)?;
                if slot < store.len() {
                    store.get(slot)?.as_object()
                } else {
                    None
                }
            };
            match setter {
                Some(setter) => {
                    if let Some(f) = self.gc.heap.get_mut(getter)?.as_function_mut() {
                        f.setter = Some(setter);
                    }
                }
                None => warn!(module = %b.loaded.name, slot, "getter names an empty setter slot"),
            }
        }

        self.run_fixups(&image.name, std::mem::take(&mut b.fixups))?;
        Ok(b.loaded)
    }

    fn begin_class(&mut self, b: &mut Builder, class: &ClassDef) -> VmResult<()> {
        if !matches!(b.current(), Context::Module) {
            return Err(b.malformed(format!("Class {} is nested", class.name)));
        }
        let qname = self.qname(&class.space, &class.name);
        let attributes = Attributes::from_word(class.attributes);

        let mut t = TypeObj::new(qname.clone(), Helpers::pot());
        t.attributes = attributes;
        t.statics = PropertyStore::with_capacity(Layout::Separate, class.num_static as usize);
        t.instance = PropertyStore::with_capacity(Layout::Separate, class.num_instance as usize);
        t.scope = Some(self.global);
        t.module = Some(b.module.clone());
        t.helpers_inherited = true;
        let ty = self.alloc(HeapObject::new(self.core.ty, false, ObjKind::Type(Box::new(t))))?;

        let type_type = self.core.ty;
        self.define_in(
            Holder::Global,
            qname,
            Some(type_type),
            attributes & Attributes::TRAIT_MASK,
            Value::Object(ty),
            class.slot,
        )?;
        for iface in &class.interfaces {
            self.resolve_or_queue(b, Fixup::Interface { ty, iface: iface.clone() })?;
        }
        b.loaded.types.push(ty);
        b.contexts.push(Context::Class {
            ty,
            base: class.base.clone(),
        });
        Ok(())
    }

    /// Inherit from the base now if it is ready, else mark the type as
    /// awaiting fixup. Classes without a base derive from `Object`.
    fn end_class(&mut self, b: &mut Builder, ty: ObjRef, base: TypeRef) -> VmResult<()> {
        if base == TypeRef::None {
            let object = self.core.object;
            return self.inherit(ty, object);
        }
        let fixup = Fixup::Base { ty, base };
        if !self.try_fixup(&fixup)? {
            let t = self.type_obj_mut(ty)?;
            t.needs_fixup = true;
            t.attributes.insert(Attributes::FIXUP);
            b.fixups.push(fixup);
        }
        Ok(())
    }

    fn begin_function(&mut self, b: &mut Builder, image: &ModuleImage, fun: &FunctionDef) -> VmResult<()> {
        let code = image
            .codes
            .get(b.next_code)
            .cloned()
            .ok_or_else(|| b.malformed(format!("No code for function {}", fun.name)))?;
        b.next_code += 1;

        let attributes = Attributes::from_word(fun.attributes);
        let qname = self.qname(&fun.space, &fun.name);
        let catch_refs: Vec<TypeRef> = code.handlers.iter().filter_map(|h| catch_type_ref(&h.catch_type)).collect();
        let body = if attributes.contains(Attributes::NATIVE) && code.bytes.is_empty() {
            FunctionBody::Abstract
        } else {
            FunctionBody::Code(code)
        };

        let context = b.current();
        let mut function = Function::new(qname.clone(), body, fun.arg_count as usize);
        function.num_default = fun.default_arg_count as usize;
        function.attributes = attributes;
        function.activation = PropertyStore::with_capacity(Layout::Separate, fun.local_count as usize);
        function.module = Some(b.module.clone());
        match context {
            Context::Module => function.scope = Some(self.global),
            Context::Class { ty, .. } => {
                function.scope = Some(ty);
                function.owner = Some(ty);
            }
            Context::Function(_) | Context::Block { .. } => {}
        }
        let obj = self.alloc(HeapObject::new(self.core.function, false, ObjKind::Function(Box::new(function))))?;

        if fun.return_type != TypeRef::None {
            self.resolve_or_queue(b, Fixup::ReturnType { function: obj, ty: fun.return_type.clone() })?;
        }
        for ty in catch_refs {
            b.fixups.push(Fixup::CatchType { function: fun.name.clone(), ty });
        }

        let traits = attributes & Attributes::TRAIT_MASK;
        let value = Value::Object(obj);
        let holder = match context {
            Context::Module if attributes.contains(Attributes::MODULE_INITIALIZER) => {
                b.loaded.initializer = Some(obj);
                None
            }
            Context::Module => {
                b.loaded.functions.push(obj);
                Some(Holder::Global)
            }
            Context::Class { ty, .. } => {
                let t = self.type_obj_mut(ty)?;
                if attributes.contains(Attributes::CONSTRUCTOR) {
                    t.constructor = Some(obj);
                    t.attributes.insert(Attributes::HAS_CONSTRUCTOR);
                    None
                } else if attributes.contains(Attributes::INITIALIZER | Attributes::STATIC) {
                    t.attributes.insert(Attributes::HAS_TYPE_INITIALIZER);
                    b.loaded.type_initializers.push(obj);
                    None
                } else if attributes.contains(Attributes::INITIALIZER) {
                    t.initializer = Some(obj);
                    None
                } else if attributes.contains(Attributes::STATIC) {
                    Some(Holder::Statics(ty))
                } else {
                    Some(Holder::Prototype(ty))
                }
            }
            Context::Function(parent) => Some(Holder::Activation(parent)),
            Context::Block { block, .. } => Some(Holder::Store(block)),
        };

        if let Some(holder) = holder {
            self.define_in(holder, qname, None, traits, value, fun.slot)?;
            if attributes.contains(Attributes::GETTER) && fun.next_slot >= 0 {
                b.setters.push((holder, obj, fun.next_slot as usize));
            }
        }
        b.contexts.push(Context::Function(obj));
        Ok(())
    }

    /// Block templates live in the enclosing function's own store, which
    /// `OpenBlock` copies from
    fn begin_block(&mut self, b: &mut Builder, block: &BlockDef) -> VmResult<()> {
        let function = match b.current() {
            Context::Function(function) | Context::Block { function, .. } => function,
            _ => return Err(b.malformed(format!("Block {} outside a function", block.name))),
        };
        let store = PropertyStore::with_capacity(Layout::Separate, block.prop_count as usize);
        let template = Block::new(BlockKind::Template, store, None);
        let obj = self.alloc(HeapObject::new(self.core.block, true, ObjKind::Block(template)))?;
        self.holder_store(Holder::Store(function))?
            .set_growing(block.slot as usize, Value::Object(obj))?;
        b.contexts.push(Context::Block { function, block: obj });
        Ok(())
    }

    fn define_section_property(&mut self, b: &mut Builder, prop: &PropertyDef) -> VmResult<()> {
        let attributes = Attributes::from_word(prop.attributes) & Attributes::TRAIT_MASK;
        let holder = match b.current() {
            Context::Module => Holder::Global,
            Context::Class { ty, .. } if attributes.contains(Attributes::STATIC) => Holder::Statics(ty),
            Context::Class { ty, .. } => Holder::Instance(ty),
            Context::Function(function) => Holder::Activation(function),
            Context::Block { block, .. } => Holder::Store(block),
        };
        let ty = self.resolve_type_ref(&prop.ty)?;
        let name = self.qname(&prop.space, &prop.name);
        let slot = self.define_in(holder, name, ty, attributes, Value::Undefined, prop.slot)?;
        if ty.is_none() && prop.ty != TypeRef::None {
            b.fixups.push(Fixup::Property {
                holder,
                slot,
                ty: prop.ty.clone(),
            });
        }
        Ok(())
    }

    fn resolve_or_queue(&mut self, b: &mut Builder, fixup: Fixup) -> VmResult<()> {
        if !self.try_fixup(&fixup)? {
            b.fixups.push(fixup);
        }
        Ok(())
    }

    /// Define into a holder at the slot the module assigned. On the global
    /// object a slot already taken by another name falls back to the next
    /// free slot.
    fn define_in(
        &mut self,
        holder: Holder,
        name: QualifiedName,
        ty: Option<ObjRef>,
        attributes: Attributes,
        value: Value,
        slot: u32,
    ) -> VmResult<usize> {
        let slot = slot as usize;
        let store = self.holder_store(holder)?;
        let hint = if holder != Holder::Global {
            SlotHint::At(slot)
        } else {
            let exact = store
                .lookup(&name)
                .filter(|found| matches!(store.name(*found), Ok(Some(n)) if *n == name));
            match exact {
                Some(found) => SlotHint::At(found),
                None if slot >= store.len() || store.name(slot)?.is_none() => SlotHint::At(slot),
                None => {
                    warn!(%name, slot, "global slot taken, appending");
                    SlotHint::Next
                }
            }
        };
        Ok(store.define(name, ty, attributes, value, hint)?)
    }

    // =========================================================================
    // Initializers
    // =========================================================================

    /// Run type initializers with the type as `this`, then the module
    /// initializer with the global object as `this`
    fn run_initializers(&mut self, index: usize) -> VmResult<()> {
        let (type_initializers, initializer) = {
            let module = self
                .modules
                .get(index)
                .ok_or_else(|| VmError::internal(format!("No loaded module at index {}", index)))?;
            (module.type_initializers.clone(), module.initializer)
        };
        for init in type_initializers {
            let owner = self.gc.heap.get(init)?.as_function().and_then(|f| f.owner);
            let this = owner.map_or_else(|| self.global(), Value::Object);
            self.run_function(&Value::Object(init), this, &[])?;
        }
        if let Some(init) = initializer {
            let global = self.global();
            self.run_function(&Value::Object(init), global, &[])?;
        }
        Ok(())
    }
}

fn check_checksum(dep: &DependencyDef, actual: i64) -> VmResult<()> {
    if dep.checksum != 0 && dep.checksum != actual {
        return Err(LoadError::ChecksumMismatch {
            name: dep.name.clone(),
            expected: dep.checksum,
            actual,
        }
        .into());
    }
    Ok(())
}

fn catch_type_ref(catch: &CatchType) -> Option<TypeRef> {
    match catch {
        CatchType::Name(name) => Some(TypeRef::named(&name.space, &name.name)),
        CatchType::GlobalSlot(slot) => Some(TypeRef::Slot(*slot as u32)),
        CatchType::Any | CatchType::Type(_) => None,
    }
}
