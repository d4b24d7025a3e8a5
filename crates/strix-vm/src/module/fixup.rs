//! Forward type references
//!
//! Sections may name types the module defines further down, or that a
//! dependency defines. References that cannot be resolved on sight are
//! queued and retried when the module's sections end, until a pass makes no
//! progress.

use crate::error::{LoadError, VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::PropertyStore;
use crate::value::ObjRef;
use strix_bytecode::TypeRef;
use tracing::debug;

/// Property store a section defines into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Holder {
    /// The global object
    Global,
    /// Static properties of a type
    Statics(ObjRef),
    /// Instance template of a type
    Instance(ObjRef),
    /// Prototype of a type
    Prototype(ObjRef),
    /// Activation template of a function
    Activation(ObjRef),
    /// Own store of an object: a function or a block template
    Store(ObjRef),
}

/// Reference waiting for its type
#[derive(Debug, Clone)]
pub(crate) enum Fixup {
    /// Base type of a class
    Base { ty: ObjRef, base: TypeRef },
    /// Interface a class implements
    Interface { ty: ObjRef, iface: TypeRef },
    /// Declared return type of a function
    ReturnType { function: ObjRef, ty: TypeRef },
    /// Declared type of a static, instance or local property
    Property { holder: Holder, slot: usize, ty: TypeRef },
    /// Catch type of an exception handler
    CatchType { function: String, ty: TypeRef },
}

impl Fixup {
    fn type_ref(&self) -> &TypeRef {
        match self {
            Fixup::Base { base, .. } => base,
            Fixup::Interface { iface, .. } => iface,
            Fixup::ReturnType { ty, .. } | Fixup::Property { ty, .. } | Fixup::CatchType { ty, .. } => ty,
        }
    }
}

fn describe(ty: &TypeRef) -> String {
    match ty {
        TypeRef::None => "*".to_string(),
        TypeRef::Name { space, name } if space.is_empty() => name.clone(),
        TypeRef::Name { space, name } => format!("{}::{}", space, name),
        TypeRef::Slot(slot) => format!("global slot {}", slot),
    }
}

impl Interpreter {
    /// Property store behind a holder
    pub(crate) fn holder_store(&mut self, holder: Holder) -> VmResult<&mut PropertyStore> {
        Ok(match holder {
            Holder::Global => {
                let global = self.global;
                self.gc.heap.get_mut(global)?.store_mut()
            }
            Holder::Statics(ty) => &mut self.type_obj_mut(ty)?.statics,
            Holder::Instance(ty) => &mut self.type_obj_mut(ty)?.instance,
            Holder::Prototype(ty) => &mut self.type_obj_mut(ty)?.prototype,
            Holder::Activation(function) => {
                &mut self
                    .gc
                    .heap
                    .get_mut(function)?
                    .as_function_mut()
                    .ok_or_else(|| VmError::internal("Activation holder is not a function"))?
                    .activation
            }
            Holder::Store(obj) => self.gc.heap.get_mut(obj)?.store_mut(),
        })
    }

    /// Type a reference names, if it is defined yet
    pub(crate) fn resolve_type_ref(&self, ty: &TypeRef) -> VmResult<Option<ObjRef>> {
        match ty {
            TypeRef::None => Ok(None),
            TypeRef::Name { space, name } => self.resolve_global_type(&self.qname(space, name)),
            TypeRef::Slot(slot) => {
                let global = self.gc.heap.get(self.global)?.store();
                let slot = *slot as usize;
                if slot >= global.len() {
                    return Ok(None);
                }
                Ok(global.get(slot)?.as_object().filter(|t| self.type_obj(*t).is_ok()))
            }
        }
    }

    /// Apply `fixup` now if its type is available. Bases must themselves
    /// be fixed up before a derived type can inherit from them.
    pub(crate) fn try_fixup(&mut self, fixup: &Fixup) -> VmResult<bool> {
        let Some(resolved) = self.resolve_type_ref(fixup.type_ref())? else {
            return Ok(false);
        };
        match fixup {
            Fixup::Base { ty, .. } => {
                if self.type_obj(resolved)?.needs_fixup {
                    return Ok(false);
                }
                self.inherit(*ty, resolved)?;
                debug!(ty = %self.type_display_name(*ty), base = %self.type_display_name(resolved), "base resolved");
            }
            Fixup::Interface { ty, .. } => {
                let t = self.type_obj_mut(*ty)?;
                if !t.implements.contains(&resolved) {
                    t.implements.push(resolved);
                }
            }
            Fixup::ReturnType { function, .. } => {
                if let Some(f) = self.gc.heap.get_mut(*function)?.as_function_mut() {
                    f.result_type = Some(resolved);
                }
            }
            Fixup::Property { holder, slot, .. } => {
                let store = self.holder_store(*holder)?;
                let attributes = store.traits(*slot)?.attributes;
                store.set_traits(*slot, Some(resolved), attributes)?;
            }
            Fixup::CatchType { .. } => {}
        }
        Ok(true)
    }

    /// Retry queued fixups until every one is applied or a pass makes no
    /// progress
    pub(crate) fn run_fixups(&mut self, module: &str, mut pending: Vec<Fixup>) -> VmResult<()> {
        let total = pending.len();
        loop {
            let before = pending.len();
            let mut remaining = Vec::with_capacity(before);
            for fixup in pending {
                if !self.try_fixup(&fixup)? {
                    remaining.push(fixup);
                }
            }
            pending = remaining;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        if let Some(fixup) = pending.first() {
            let referrer = match fixup {
                Fixup::CatchType { function, .. } => format!("{} ({})", module, function),
                _ => module.to_string(),
            };
            return Err(LoadError::UnresolvedType {
                module: referrer,
                name: describe(fixup.type_ref()),
            }
            .into());
        }
        if total > 0 {
            debug!(module, count = total, "fixups applied");
        }
        Ok(())
    }
}
