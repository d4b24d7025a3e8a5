//! Property definitions, traits and string sharing across interpreters

mod common;

use common::*;
use std::sync::Arc;
use strix_bytecode::TypeRef;
use strix_vm::object::SlotHint;
use strix_vm::{Attributes, ErrorKind, Interpreter, LoadFlags, QualifiedName, Service, Value, VmOptions};

fn public(interp: &Interpreter, name: &str) -> QualifiedName {
    QualifiedName::new(interp.intern("public"), interp.intern(name))
}

#[test]
fn test_readonly_property_rejects_writes() {
    let mut interp = interp();
    let object = interp.new_object().unwrap();
    let x = public(&interp, "x");

    let slot = interp
        .define_property_on(&object, SlotHint::Next, x.clone(), None, Attributes::empty(), Value::Number(10.0))
        .unwrap();
    assert_eq!(interp.get_property_by_name(&object, &x).unwrap(), Value::Number(10.0));

    interp.set_property_by_name(&object, &x, Value::Number(20.0)).unwrap();
    assert_eq!(interp.get_property(&object, slot).unwrap(), Value::Number(20.0));

    interp
        .set_property_traits(&object, slot, None, Attributes::READONLY)
        .unwrap();
    let err = interp.set_property_by_name(&object, &x, Value::Number(30.0)).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::ReferenceError));
    assert_eq!(interp.get_property_by_name(&object, &x).unwrap(), Value::Number(20.0));
    assert!(interp
        .get_property_traits(&object, slot)
        .unwrap()
        .attributes
        .contains(Attributes::READONLY));
}

#[test]
fn test_deleted_name_is_redefined_in_new_slot() {
    let mut interp = interp();
    let object = interp.new_object().unwrap();
    let x = public(&interp, "x");
    let y = public(&interp, "y");

    let first = interp
        .define_property_on(&object, SlotHint::Next, x.clone(), None, Attributes::empty(), Value::Number(1.0))
        .unwrap();
    interp
        .define_property_on(&object, SlotHint::Next, y.clone(), None, Attributes::empty(), Value::Number(2.0))
        .unwrap();

    assert!(interp.delete_property_by_name(&object, &x).unwrap());
    assert_eq!(interp.lookup_property(&object, &x).unwrap(), None);
    assert!(!interp.delete_property_by_name(&object, &x).unwrap());

    let second = interp
        .define_property_on(&object, SlotHint::Next, x.clone(), None, Attributes::empty(), Value::Number(3.0))
        .unwrap();
    assert_ne!(second, first);
    assert_eq!(interp.lookup_property(&object, &x).unwrap(), Some(second));
    assert_eq!(interp.get_property_by_name(&object, &y).unwrap(), Value::Number(2.0));
}

#[test]
fn test_wildcard_lookup_finds_any_namespace() {
    let mut interp = interp();
    let object = interp.new_object().unwrap();
    let internal = QualifiedName::new(interp.intern("internal"), interp.intern("size"));
    let slot = interp
        .define_property_on(&object, SlotHint::Next, internal, None, Attributes::empty(), Value::Number(4.0))
        .unwrap();

    let any = QualifiedName::new(interp.intern(""), interp.intern("size"));
    assert_eq!(interp.lookup_property(&object, &any).unwrap(), Some(slot));
    assert_eq!(interp.lookup_property(&object, &public(&interp, "size")).unwrap(), None);
}

#[test]
fn test_enumeration_reports_names() {
    let mut interp = interp();
    let object = interp.new_object().unwrap();
    let a = public(&interp, "a");
    interp
        .define_property_on(&object, SlotHint::Next, a.clone(), None, Attributes::empty(), Value::Null)
        .unwrap();
    assert_eq!(interp.get_property_count(&object).unwrap(), 1);
    assert_eq!(interp.get_property_name(&object, 0).unwrap(), Some(a));
}

#[test]
fn test_interned_strings_shared_across_threads() {
    let service = Arc::new(Service::new());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                let interp = Interpreter::new(service, VmOptions::default()).unwrap();
                interp.intern("shared-between-threads")
            })
        })
        .collect();
    let names: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    for name in &names[1..] {
        assert!(name.ptr_eq(&names[0]));
    }
    let local = service.strings().intern("shared-between-threads");
    assert!(local.ptr_eq(&names[0]));
    assert_eq!(&*local, "shared-between-threads");
}

/// `Shape`, `Polygon extends Shape`, `Square implements Polygon`,
/// `Tile extends Square` and an unrelated `Circle implements Shape`
fn shapes() -> Interpreter {
    let shape = TypeRef::named("", "Shape");
    let polygon = TypeRef::named("", "Polygon");
    let mut m = ModuleBuilder::new("interfaces");
    m.interface("Shape", FIRST_FREE_SLOT, &[])
        .end_class()
        .interface("Polygon", FIRST_FREE_SLOT + 1, &[shape.clone()])
        .end_class()
        .class("Tile", FIRST_FREE_SLOT + 2, TypeRef::named("", "Square"), 0)
        .end_class()
        .class_implementing("Square", FIRST_FREE_SLOT + 3, TypeRef::None, &[polygon])
        .end_class()
        .class_implementing("Circle", FIRST_FREE_SLOT + 4, TypeRef::None, &[shape])
        .end_class();

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    interp
}

fn instance(interp: &mut Interpreter, class: &str) -> Value {
    let class = interp.get_global(class).unwrap();
    interp.run_function(&class, Value::Undefined, &[]).unwrap()
}

#[test]
fn test_instance_of_through_interfaces() {
    let mut interp = shapes();
    let shape = interp.get_global("Shape").unwrap().as_object().unwrap();
    let polygon = interp.get_global("Polygon").unwrap().as_object().unwrap();

    let square = instance(&mut interp, "Square");
    assert!(interp.is_instance_of(&square, polygon));
    assert!(interp.is_instance_of(&square, shape));

    let circle = instance(&mut interp, "Circle");
    assert!(interp.is_instance_of(&circle, shape));
    assert!(!interp.is_instance_of(&circle, polygon));
}

#[test]
fn test_interfaces_inherited_from_base_class() {
    let mut interp = shapes();
    let shape = interp.get_global("Shape").unwrap().as_object().unwrap();
    let polygon = interp.get_global("Polygon").unwrap().as_object().unwrap();
    let circle = interp.get_global("Circle").unwrap().as_object().unwrap();

    let tile = instance(&mut interp, "Tile");
    assert!(interp.is_instance_of(&tile, polygon));
    assert!(interp.is_instance_of(&tile, shape));
    assert!(!interp.is_instance_of(&tile, circle));
    assert!(interp.is_instance_of(&tile, interp.core_types().object));
}
