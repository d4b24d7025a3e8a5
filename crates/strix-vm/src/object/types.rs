//! Type objects
//!
//! A type is a heap value that is at once a constructor, a holder of static
//! properties and the dispatch table ([`Helpers`]) for its instances. It
//! keeps two property templates: `instance` (instance variables, copied into
//! every new instance) and `prototype` (methods and accessors, searched
//! when an instance lacks a name).

use crate::helpers::Helpers;
use crate::intern::IStr;
use crate::object::attributes::Attributes;
use crate::object::name::QualifiedName;
use crate::object::property::PropertyStore;
use crate::value::ObjRef;

/// Runtime type
#[derive(Debug, Clone)]
pub struct TypeObj {
    /// Qualified type name
    pub qname: QualifiedName,
    /// Static properties
    pub statics: PropertyStore,
    /// Instance variable template
    pub instance: PropertyStore,
    /// Methods and accessors shared by instances
    pub prototype: PropertyStore,
    /// Scope static methods resolve free names in
    pub scope: Option<ObjRef>,
    /// Single base type
    pub base: Option<ObjRef>,
    /// Implemented interfaces
    pub implements: Vec<ObjRef>,
    /// Operations for instances of this type
    pub helpers: Helpers,
    /// Constructor function
    pub constructor: Option<ObjRef>,
    /// Instance initializer, run before the constructor
    pub initializer: Option<ObjRef>,
    /// Class attributes
    pub attributes: Attributes,
    /// Base not yet resolved; the type cannot be instantiated
    pub needs_fixup: bool,
    /// Instance slots inherited from the base
    pub num_inherited: usize,
    /// Defining module name
    pub module: Option<IStr>,
    /// Take the base type's helpers when the base is resolved
    pub helpers_inherited: bool,
}

impl TypeObj {
    /// Create an unconfigured type with the given helpers
    pub fn new(qname: QualifiedName, helpers: Helpers) -> Self {
        Self {
            qname,
            statics: PropertyStore::new(),
            instance: PropertyStore::new(),
            prototype: PropertyStore::new(),
            scope: None,
            base: None,
            implements: Vec::new(),
            helpers,
            constructor: None,
            initializer: None,
            attributes: Attributes::empty(),
            needs_fixup: false,
            num_inherited: 0,
            module: None,
            helpers_inherited: false,
        }
    }

    /// Type name without namespace
    pub fn name(&self) -> &str {
        self.qname.name.as_str()
    }

    /// True for interface types
    pub fn is_interface(&self) -> bool {
        self.attributes.contains(Attributes::INTERFACE)
    }

    /// True when instances may gain properties
    pub fn has_dynamic_instances(&self) -> bool {
        self.attributes.contains(Attributes::DYNAMIC_INSTANCES)
    }

    /// Every heap reference the type holds
    pub fn references(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.scope
            .into_iter()
            .chain(self.base)
            .chain(self.implements.iter().copied())
            .chain(self.constructor)
            .chain(self.initializer)
            .chain(self.statics.references())
            .chain(self.instance.references())
            .chain(self.prototype.references())
    }
}
