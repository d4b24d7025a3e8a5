//! Module instantiation, dependencies, fixups and initializers

mod common;

use common::*;
use std::sync::Arc;
use strix_bytecode::{make_version, BytecodeWriter, ModuleDef, ModuleFile, Opcode, TypeRef};
use strix_vm::{Interpreter, LoadError, LoadFlags, ModuleImage, Service, Value, VmError, VmOptions, VmResult};

const LIB_SLOT: u32 = FIRST_FREE_SLOT + 5;

/// `lib` 1.2.0 with `twice(x)` in global slot `LIB_SLOT`
fn lib() -> ModuleDef {
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op(Opcode::Add);
    w.emit_op(Opcode::Return);
    let mut m = ModuleBuilder::versioned("lib", make_version(1, 2, 0));
    m.function(function("twice", LIB_SLOT, 1, 1, w.into_bytes()));
    m.build()
}

/// `app` depending on `lib` 1.x, with `quad(x) = twice(twice(x))`
fn app(checksum: i64) -> ModuleDef {
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op_num2(Opcode::CallGlobalSlot, LIB_SLOT as i64, 1);
    w.emit_op_num2(Opcode::CallGlobalSlot, LIB_SLOT as i64, 1);
    w.emit_op(Opcode::Return);
    let mut m = ModuleBuilder::new("app");
    m.dependency("lib", make_version(1, 0, 0), make_version(1, 999, 999), checksum)
        .function(function("quad", LIB_SLOT + 1, 1, 1, w.into_bytes()));
    m.build()
}

fn call(interp: &mut Interpreter, name: &str, args: &[Value]) -> VmResult<Value> {
    let function = interp.get_global(name)?;
    interp.run_function(&function, Value::Undefined, args)
}

// ============================================================================
// Dependencies
// ============================================================================

#[test]
fn test_dependency_resolved_from_shared_cache() {
    let service = Arc::new(Service::new());
    let mut first = Interpreter::new(Arc::clone(&service), VmOptions::default()).unwrap();
    first.load_module(lib(), LoadFlags::empty()).unwrap();
    assert_eq!(service.cached_modules(), 1);

    let mut second = Interpreter::new(service, VmOptions::default()).unwrap();
    second.load_module(app(0), LoadFlags::empty()).unwrap();
    let names: Vec<&str> = second.loaded_modules().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["lib", "app"]);
    assert!(second.find_module("lib").unwrap().flags.contains(LoadFlags::DEP));
    assert_eq!(call(&mut second, "quad", &[Value::Number(3.0)]).unwrap(), Value::Number(12.0));
}

#[test]
fn test_missing_dependency_fails() {
    let mut interp = interp();
    let err = interp.load_module(app(0), LoadFlags::empty()).unwrap_err();
    assert!(matches!(
        err,
        VmError::Load(LoadError::MissingDependency { ref name, .. }) if name == "lib"
    ));
    assert!(interp.find_module("app").is_none());
}

#[test]
fn test_dependency_checksum_must_match() {
    let mut interp = interp();
    let lib = lib();
    let wrong = (lib.checksum + 1) & 0xffff_ffff;
    interp.load_module(lib, LoadFlags::empty()).unwrap();
    let err = interp.load_module(app(wrong), LoadFlags::empty()).unwrap_err();
    assert!(matches!(err, VmError::Load(LoadError::ChecksumMismatch { .. })));
}

#[test]
fn test_dependency_read_from_search_path() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = ModuleFile::single(lib()).encode().unwrap();
    std::fs::write(dir.path().join("lib.mod"), bytes).unwrap();

    let options = VmOptions {
        search_paths: vec![dir.path().to_path_buf()],
        ..VmOptions::default()
    };
    let mut interp = Interpreter::new(Arc::new(Service::new()), options).unwrap();
    interp.load_module(app(0), LoadFlags::empty()).unwrap();
    assert_eq!(call(&mut interp, "quad", &[Value::Number(1.0)]).unwrap(), Value::Number(4.0));
    assert_eq!(interp.service().cached_modules(), 2);
}

#[test]
fn test_circular_dependency_detected() {
    let mut a = ModuleBuilder::new("a");
    a.dependency("b", 0, i64::MAX, 0);
    let mut b = ModuleBuilder::new("b");
    b.dependency("a", 0, i64::MAX, 0);

    let service = Arc::new(Service::new());
    service.insert(Arc::new(ModuleImage::new(b.build(), service.strings())), false);
    let mut interp = Interpreter::new(service, VmOptions::default()).unwrap();
    let err = interp.load_module(a.build(), LoadFlags::empty()).unwrap_err();
    assert!(matches!(err, VmError::Load(LoadError::Circular(ref name)) if name == "a"));
}

// ============================================================================
// Checksums and reloads
// ============================================================================

#[test]
fn test_strict_load_rejects_tampered_checksum() {
    let mut def = lib();
    def.checksum ^= 1;
    let mut interp = interp();
    assert!(matches!(
        interp.load_module(def.clone(), LoadFlags::STRICT),
        Err(VmError::Module(_))
    ));
    interp.load_module(def, LoadFlags::empty()).unwrap();
}

#[test]
fn test_loading_twice_reuses_instance_unless_reload() {
    let mut interp = interp();
    let first = interp.load_module(lib(), LoadFlags::empty()).unwrap();
    let again = interp.load_module(lib(), LoadFlags::empty()).unwrap();
    assert_eq!(first, again);
    let reloaded = interp.load_module(lib(), LoadFlags::RELOAD).unwrap();
    assert_ne!(first, reloaded);
    assert_eq!(interp.loaded_modules().len(), 2);
}

#[test]
fn test_load_bytes_reports_module_names() {
    let mut m = ModuleBuilder::new("tiny");
    m.property("flag", FIRST_FREE_SLOT, 0, TypeRef::None);
    let mut interp = interp();
    let names = interp.load_module_bytes(&m.bytes()).unwrap();
    assert_eq!(names, ["tiny"]);
    assert_eq!(interp.get_global("flag").unwrap(), Value::Undefined);
}

// ============================================================================
// Types and fixups
// ============================================================================

#[test]
fn test_forward_base_reference_fixed_up() {
    let derived_slot = FIRST_FREE_SLOT;
    let base_slot = FIRST_FREE_SLOT + 1;
    let mut greet = BytecodeWriter::new();
    greet.emit_op_num(Opcode::LoadInt, 42);
    greet.emit_op(Opcode::Return);

    let mut m = ModuleBuilder::new("shapes");
    m.class("Derived", derived_slot, TypeRef::named("", "Base"), 0)
        .end_class()
        .class("Base", base_slot, TypeRef::None, 0)
        .function(function("greet", 1, 0, 0, greet.into_bytes()))
        .end_class();

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let derived = interp.get_global("Derived").unwrap();
    let base = interp.get_global("Base").unwrap().as_object().unwrap();

    let instance = interp.run_function(&derived, Value::Undefined, &[]).unwrap();
    assert!(interp.is_instance_of(&instance, base));
    let name = interp.qname("", "greet");
    let method = interp.get_property_by_name(&instance, &name).unwrap();
    assert_eq!(interp.run_function(&method, instance, &[]).unwrap(), Value::Number(42.0));

    let module = interp.find_module("shapes").unwrap();
    assert_eq!(module.types.len(), 2);
}

#[test]
fn test_unresolved_base_fails_load() {
    let mut m = ModuleBuilder::new("orphan");
    m.class("Lost", FIRST_FREE_SLOT, TypeRef::named("", "Nowhere"), 0).end_class();
    let mut interp = interp();
    let err = interp.load_module(m.build(), LoadFlags::empty()).unwrap_err();
    assert!(matches!(
        err,
        VmError::Load(LoadError::UnresolvedType { ref name, .. }) if name == "Nowhere"
    ));
}

#[test]
fn test_property_type_resolved_later_in_module() {
    let mut m = ModuleBuilder::new("typed");
    m.property("origin", FIRST_FREE_SLOT, 0, TypeRef::named("", "Point"))
        .class("Point", FIRST_FREE_SLOT + 1, TypeRef::None, 0)
        .end_class();
    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let point = interp.get_global("Point").unwrap().as_object();
    let global = interp.global();
    let traits = interp.get_property_traits(&global, FIRST_FREE_SLOT as usize).unwrap();
    assert_eq!(traits.ty, point);
}

// ============================================================================
// Initializers
// ============================================================================

/// `Counter.count` starts at 1 in the type initializer; the module
/// initializer stores `Counter.count + 10` in `total`
fn initialized() -> ModuleDef {
    let total_slot = FIRST_FREE_SLOT;
    let counter_slot = FIRST_FREE_SLOT + 1;

    let mut type_init = BytecodeWriter::new();
    type_init.emit_op(Opcode::LoadThis);
    type_init.emit_op_num(Opcode::LoadInt, 1);
    type_init.emit_op_num(Opcode::PutObjSlot, 0);
    type_init.emit_op(Opcode::ReturnUndefined);
    let mut type_init = function("Counter$init", 0, 0, 0, type_init.into_bytes());
    type_init.attributes = INITIALIZER | STATIC;

    let mut module_init = BytecodeWriter::new();
    module_init.emit_op_num(Opcode::GetGlobalSlot, counter_slot as i64);
    module_init.emit_op_num(Opcode::GetObjSlot, 0);
    module_init.emit_op_num(Opcode::Inc, 10);
    module_init.emit_op_num(Opcode::PutGlobalSlot, total_slot as i64);
    module_init.emit_op(Opcode::ReturnUndefined);
    let mut module_init = function("$init", 0, 0, 0, module_init.into_bytes());
    module_init.attributes = MODULE_INITIALIZER;

    let mut m = ModuleBuilder::new("counter");
    m.property("total", total_slot, 0, TypeRef::None)
        .class("Counter", counter_slot, TypeRef::None, 0)
        .property("count", 0, STATIC, TypeRef::None)
        .function(type_init)
        .end_class()
        .function(module_init);
    m.build()
}

#[test]
fn test_type_initializers_run_before_module_initializer() {
    let mut interp = interp();
    interp.load_module(initialized(), LoadFlags::empty()).unwrap();
    assert_eq!(interp.get_global("total").unwrap(), Value::Number(11.0));
    let module = interp.find_module("counter").unwrap();
    assert!(module.initializer.is_some());
    assert_eq!(module.type_initializers.len(), 1);
}

#[test]
fn test_no_init_skips_initializers() {
    let mut interp = Interpreter::new(Arc::new(Service::new()), VmOptions::default().no_init()).unwrap();
    interp.load_module(initialized(), LoadFlags::empty()).unwrap();
    assert_eq!(interp.get_global("total").unwrap(), Value::Undefined);
}

#[test]
fn test_clone_reinstantiates_modules() {
    let mut template = interp();
    template.load_module(initialized(), LoadFlags::empty()).unwrap();
    let mut clone = Interpreter::clone_from(&template).unwrap();
    assert_ne!(clone.id(), template.id());
    assert_eq!(clone.get_global("total").unwrap(), Value::Number(11.0));
    assert_eq!(clone.service().cached_modules(), 1);

    let global = clone.global();
    let total = clone.qname("", "total");
    clone.set_property_by_name(&global, &total, Value::Number(5.0)).unwrap();
    assert_eq!(clone.get_global("total").unwrap(), Value::Number(5.0));
    assert_eq!(template.get_global("total").unwrap(), Value::Number(11.0));
}

// ============================================================================
// Native modules
// ============================================================================

fn answer(_interp: &mut Interpreter, _this: Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::Number(42.0))
}

fn configure_native(interp: &mut Interpreter) -> VmResult<()> {
    let global = interp.global();
    interp.bind_slot(&global, FIRST_FREE_SLOT as usize, answer)
}

#[test]
fn test_native_configure_binds_declared_function() {
    let mut declared = function("answer", FIRST_FREE_SLOT, 0, 0, Vec::new());
    declared.attributes = 0x400;
    let mut m = ModuleBuilder::new("natives");
    m.function(declared);

    let service = Arc::new(Service::new());
    service.register_native("natives", configure_native);
    let mut interp = Interpreter::new(service, VmOptions::default()).unwrap();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    assert_eq!(call(&mut interp, "answer", &[]).unwrap(), Value::Number(42.0));
}

#[test]
fn test_declared_native_without_binding_is_abstract() {
    let mut declared = function("answer", FIRST_FREE_SLOT, 0, 0, Vec::new());
    declared.attributes = 0x400;
    let mut m = ModuleBuilder::new("unbound");
    m.function(declared);

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    assert!(call(&mut interp, "answer", &[]).is_err());
    let exception = interp.exception().cloned().unwrap();
    assert_eq!(interp.type_name_of(&exception), "TypeError");
}
