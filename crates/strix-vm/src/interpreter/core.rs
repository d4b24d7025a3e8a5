//! Interpreter state
//!
//! An [`Interpreter`] owns its heap, operand stack, call frames and global
//! object. The string table and the decoded module images come from the
//! [`Service`] it was created from, which may be shared by many
//! interpreters on different threads.

use super::boot::{CommonNames, CoreTypes};
use super::frame::Frame;
use crate::defaults::MAX_BASE_CLASSES;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::gc::{GarbageCollector, GcStats, PinHandle};
use crate::helpers::Helpers;
use crate::host::{ExitHandle, Host, ProcessHost};
use crate::intern::IStr;
use crate::module::{LoadedModule, Service};
use crate::object::{Attributes, HeapObject, ObjKind, PropertyStore, QualifiedName, SlotHint, TypeObj};
use crate::options::{InterpreterId, VmOptions};
use crate::value::{ObjRef, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Fault being unwound. A second fault of the same kind before the first
/// is handled aborts the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    StackOverflow,
    OutOfMemory,
}

/// A single-threaded VM instance
pub struct Interpreter {
    pub(crate) id: InterpreterId,
    pub(crate) service: Arc<Service>,
    pub(crate) options: VmOptions,
    pub(crate) gc: GarbageCollector,

    /// Operand stack shared by all frames
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,

    pub(crate) global: ObjRef,
    pub(crate) core: CoreTypes,
    pub(crate) names: CommonNames,

    /// Exception in flight
    pub(crate) exception: Option<Value>,
    /// Value of the last completed top-level run
    pub(crate) result: Value,
    pub(crate) fault: Option<Fault>,
    pub(crate) aborted: bool,

    /// Rust-level nesting: active execution loops plus native calls
    pub(crate) nesting: usize,

    pub(crate) exit: ExitHandle,
    pub(crate) exit_status: Option<i32>,
    pub(crate) host: Arc<dyn Host>,

    /// Modules instantiated in this interpreter, in load order
    pub(crate) modules: Vec<LoadedModule>,
    /// Names of modules whose dependencies are being resolved
    pub(crate) loading: Vec<String>,
}

impl Interpreter {
    /// Create an interpreter and boot the core types
    pub fn new(service: Arc<Service>, options: VmOptions) -> VmResult<Self> {
        let names = CommonNames::new(service.strings());
        let gc = GarbageCollector::new(options.gc_quota, options.limits.max_heap_objects);
        let mut interp = Self {
            id: InterpreterId::new(),
            service,
            options,
            gc,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            global: ObjRef::from_index(0),
            core: CoreTypes::default(),
            names,
            exception: None,
            result: Value::Undefined,
            fault: None,
            aborted: false,
            nesting: 0,
            exit: ExitHandle::default(),
            exit_status: None,
            host: Arc::new(ProcessHost),
            modules: Vec::new(),
            loading: Vec::new(),
        };

        interp.gc.pause();
        let booted = interp.boot();
        interp.gc.resume();
        booted?;

        debug!(id = interp.id.as_u64(), live = interp.gc.heap().live(), "interpreter booted");
        Ok(interp)
    }

    /// Interpreter identifier
    pub fn id(&self) -> InterpreterId {
        self.id
    }

    /// Service this interpreter belongs to
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Options the interpreter was created with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// The global object
    pub fn global(&self) -> Value {
        Value::Object(self.global)
    }

    /// Handles of the core types
    pub fn core_types(&self) -> &CoreTypes {
        &self.core
    }

    /// True once a fatal error has ended this interpreter
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Modules instantiated in this interpreter, in load order
    pub fn loaded_modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    // =========================================================================
    // Strings and names
    // =========================================================================

    /// Intern a string in the shared table
    pub fn intern(&self, text: &str) -> IStr {
        self.service.strings().intern(text)
    }

    /// Build a qualified name from text
    pub fn qname(&self, space: &str, name: &str) -> QualifiedName {
        QualifiedName::new(self.intern(space), self.intern(name))
    }

    /// Read a global by name in any namespace
    pub fn get_global(&mut self, name: &str) -> VmResult<Value> {
        let qname = self.qname("", name);
        let global = self.global();
        self.get_property_by_name(&global, &qname)
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Type of any value
    pub fn type_of(&self, value: &Value) -> ObjRef {
        match value {
            Value::Undefined => self.core.void,
            Value::Null => self.core.null,
            Value::Boolean(_) => self.core.boolean,
            Value::Number(_) => self.core.number,
            Value::String(_) => self.core.string,
            Value::Object(obj) => self
                .gc
                .heap
                .get(*obj)
                .map(|o| o.header.ty)
                .unwrap_or(self.core.object),
        }
    }

    /// Type payload behind a handle
    pub fn type_obj(&self, ty: ObjRef) -> VmResult<&TypeObj> {
        self.gc
            .heap
            .get(ty)?
            .as_type()
            .ok_or_else(|| VmError::type_error(format!("Object {} is not a type", ty)))
    }

    /// Mutable type payload behind a handle
    pub fn type_obj_mut(&mut self, ty: ObjRef) -> VmResult<&mut TypeObj> {
        self.gc
            .heap
            .get_mut(ty)?
            .as_type_mut()
            .ok_or_else(|| VmError::type_error(format!("Object {} is not a type", ty)))
    }

    /// Operation table for a value
    pub fn helpers_of(&self, value: &Value) -> VmResult<Helpers> {
        Ok(self.type_obj(self.type_of(value))?.helpers)
    }

    /// Check whether `value` is an instance of `ty`, through base types
    /// and implemented interfaces
    pub fn is_instance_of(&self, value: &Value, ty: ObjRef) -> bool {
        self.type_extends(self.type_of(value), ty, 0)
    }

    /// Check whether `actual` is `target` or derives from it
    pub(crate) fn type_extends(&self, actual: ObjRef, target: ObjRef, depth: usize) -> bool {
        let mut cursor = Some(actual);
        let mut steps = depth;
        while let Some(current) = cursor {
            if current == target {
                return true;
            }
            steps += 1;
            if steps > MAX_BASE_CLASSES {
                return false;
            }
            let Ok(t) = self.type_obj(current) else {
                return false;
            };
            if t.implements.iter().any(|iface| self.type_extends(*iface, target, steps)) {
                return true;
            }
            cursor = t.base;
        }
        false
    }

    /// Name of a value's type
    pub fn type_name_of(&self, value: &Value) -> String {
        self.type_display_name(self.type_of(value))
    }

    /// Short name of a type
    pub fn type_display_name(&self, ty: ObjRef) -> String {
        self.type_obj(ty)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|_| format!("<{}>", ty))
    }

    /// True when the value can be called: functions with a body, and types
    pub fn is_callable(&self, value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        match self.gc.heap.get(obj).map(|o| &o.kind) {
            Ok(ObjKind::Function(_)) | Ok(ObjKind::Type(_)) => true,
            _ => false,
        }
    }

    /// Copy the instance layout and prototype of `base` into `ty`. Slots
    /// the derived type defines itself keep their numbers and override the
    /// inherited ones.
    pub(crate) fn inherit(&mut self, ty: ObjRef, base: ObjRef) -> VmResult<()> {
        let (mut instance, mut prototype, base_helpers) = {
            let b = self.type_obj(base)?;
            if b.attributes.contains(Attributes::FINAL) {
                return Err(VmError::type_error(format!("Cannot extend final type {}", b.qname)));
            }
            (b.instance.clone(), b.prototype.clone(), b.helpers)
        };
        let num_inherited = instance.len();
        let (own_instance, own_prototype) = {
            let t = self.type_obj(ty)?;
            (t.instance.clone(), t.prototype.clone())
        };
        overlay(&mut instance, &own_instance)?;
        overlay(&mut prototype, &own_prototype)?;

        let t = self.type_obj_mut(ty)?;
        t.base = Some(base);
        t.instance = instance;
        t.prototype = prototype;
        t.num_inherited = num_inherited;
        t.needs_fixup = false;
        t.attributes.remove(Attributes::FIXUP);
        if t.helpers_inherited {
            t.helpers = base_helpers;
        }
        Ok(())
    }

    // =========================================================================
    // Allocation and collection
    // =========================================================================

    /// Allocate a heap object. Running out of memory twice without the
    /// first failure being handled aborts the interpreter.
    pub(crate) fn alloc(&mut self, object: HeapObject) -> VmResult<ObjRef> {
        match self.gc.heap.allocate(object) {
            Ok(obj) => Ok(obj),
            Err(err) => {
                if self.fault == Some(Fault::OutOfMemory) {
                    return Err(self.abort("Out of memory while handling out of memory"));
                }
                self.fault = Some(Fault::OutOfMemory);
                Err(err)
            }
        }
    }

    /// Allocate a plain dynamic object of the core `Object` type
    pub fn new_object(&mut self) -> VmResult<Value> {
        let ty = self.core.object;
        self.create_instance(ty, 0)
    }

    /// Allocate an array holding `elements`
    pub fn new_array(&mut self, elements: Vec<Value>) -> VmResult<Value> {
        let ty = self.core.array;
        let array = self.create_instance(ty, elements.len())?;
        if let Some(obj) = array.as_object() {
            if let Some(payload) = self.gc.heap.get_mut(obj)?.as_array_mut() {
                payload.elements = elements;
            }
        }
        Ok(array)
    }

    /// Run a collection now. Inside script execution the collection is
    /// deferred to the next instruction boundary.
    pub fn collect(&mut self) -> usize {
        if self.nesting > 0 {
            self.gc.heap.request_collection();
            return 0;
        }
        self.collect_garbage()
    }

    /// Mark from every root and sweep
    pub(crate) fn collect_garbage(&mut self) -> usize {
        {
            let roots = &mut self.gc.roots;
            roots.add_object(self.global);
            for ty in self.core.all() {
                roots.add_object(ty);
            }
            for value in &self.stack {
                roots.add_stack_root(value);
            }
            for frame in &self.frames {
                for obj in frame.references() {
                    roots.add_object(obj);
                }
            }
            if let Some(exception) = &self.exception {
                roots.add_stack_root(exception);
            }
            roots.add_stack_root(&self.result);
            for module in &self.modules {
                for obj in module.references() {
                    roots.add_object(obj);
                }
            }
        }
        self.gc.collect(self.service.strings())
    }

    /// Keep a value alive until [`Self::unpin`]
    pub fn pin(&mut self, value: Value) -> PinHandle {
        self.gc.roots.pin(value)
    }

    /// Release a pinned value
    pub fn unpin(&mut self, handle: PinHandle) -> Option<Value> {
        self.gc.roots.unpin(handle)
    }

    /// Value behind a pin
    pub fn pinned(&self, handle: PinHandle) -> Option<&Value> {
        self.gc.roots.pinned(handle)
    }

    /// Suspend automatic collection, e.g. while building object graphs
    /// from the host. Calls nest.
    pub fn pause_gc(&mut self) {
        self.gc.pause();
    }

    /// Undo one [`Self::pause_gc`]
    pub fn resume_gc(&mut self) {
        self.gc.resume();
    }

    /// Collector statistics
    pub fn gc_stats(&self) -> &GcStats {
        self.gc.stats()
    }

    /// Number of live heap objects
    pub fn live_objects(&self) -> usize {
        self.gc.heap().live()
    }

    /// True when the handle still refers to a live object
    pub fn is_live(&self, obj: ObjRef) -> bool {
        self.gc.heap().contains(obj)
    }

    // =========================================================================
    // Fatal errors
    // =========================================================================

    /// End the interpreter. Every later entry point fails with
    /// [`VmError::Aborted`].
    pub(crate) fn abort(&mut self, reason: &str) -> VmError {
        error!(id = self.id.as_u64(), reason, "interpreter aborted");
        self.aborted = true;
        self.frames.clear();
        self.stack.clear();
        self.exception = None;
        VmError::Fatal(reason.to_string())
    }

    /// Stack overflow error; a second overflow while the first is still
    /// being unwound aborts
    pub(crate) fn stack_overflow(&mut self) -> VmError {
        if self.fault == Some(Fault::StackOverflow) {
            return self.abort("Stack overflow while handling stack overflow");
        }
        warn!(depth = self.frames.len(), "stack overflow");
        self.fault = Some(Fault::StackOverflow);
        VmError::raise(ErrorKind::InternalError, "Stack overflow")
    }

    pub(crate) fn check_live(&self) -> VmResult<()> {
        if self.aborted {
            return Err(VmError::Aborted);
        }
        Ok(())
    }
}

/// Define every live slot of `own` into `target` at the same slot number.
/// A name `target` already holds elsewhere is redefined in place.
fn overlay(target: &mut PropertyStore, own: &PropertyStore) -> VmResult<()> {
    for (slot, entry) in own.iter() {
        let Some(name) = entry.name.clone() else {
            continue;
        };
        let exact = target
            .lookup(&name)
            .filter(|found| matches!(target.name(*found), Ok(Some(n)) if *n == name));
        let hint = if exact.is_some() { SlotHint::Next } else { SlotHint::At(slot) };
        target.define(name, entry.traits.ty, entry.traits.attributes, entry.value.clone(), hint)?;
    }
    Ok(())
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("id", &self.id)
            .field("frames", &self.frames.len())
            .field("stack", &self.stack.len())
            .field("live", &self.gc.heap().live())
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}
