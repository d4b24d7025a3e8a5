//! End-to-end execution of hand-assembled modules

mod common;

use common::*;
use strix_bytecode::{BytecodeWriter, FunctionDef, Opcode, TypeRef};
use strix_vm::object::SlotHint;
use strix_vm::{Attributes, Interpreter, LoadFlags, Value, VmError, VmResult};

// ============================================================================
// Functions
// ============================================================================

#[test]
fn test_add_function_returns_sum() {
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op_num(Opcode::GetLocal, 1);
    w.emit_op(Opcode::Add);
    w.emit_op(Opcode::Return);

    let mut m = ModuleBuilder::new("math");
    m.function(function("add", FIRST_FREE_SLOT, 2, 2, w.into_bytes()));

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let add = interp.get_global("add").unwrap();
    let sum = interp
        .run_function(&add, Value::Undefined, &[Value::Number(2.0), Value::Number(3.0)])
        .unwrap();
    assert_eq!(sum, Value::Number(5.0));
    assert_eq!(interp.result(), &Value::Number(5.0));
}

#[test]
fn test_loop_with_backward_jump() {
    // sum of 0..n
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::LoadInt, 0);
    w.emit_op_num(Opcode::PutLocal, 1);
    w.emit_op_num(Opcode::LoadInt, 0);
    w.emit_op_num(Opcode::PutLocal, 2);
    let top = w.offset();
    w.emit_op_num(Opcode::GetLocal, 1);
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op(Opcode::CompareLt);
    let exit = w.emit_jump(Opcode::BranchFalse);
    w.emit_op_num(Opcode::GetLocal, 2);
    w.emit_op_num(Opcode::GetLocal, 1);
    w.emit_op(Opcode::Add);
    w.emit_op_num(Opcode::PutLocal, 2);
    w.emit_op_num(Opcode::GetLocal, 1);
    w.emit_op_num(Opcode::Inc, 1);
    w.emit_op_num(Opcode::PutLocal, 1);
    w.emit_jump_to(Opcode::Goto, top);
    w.patch_jump(exit);
    w.emit_op_num(Opcode::GetLocal, 2);
    w.emit_op(Opcode::Return);

    let mut m = ModuleBuilder::new("loops");
    m.function(function("sum", FIRST_FREE_SLOT, 1, 3, w.into_bytes()));

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let sum = interp.get_global("sum").unwrap();
    let result = interp.run_function(&sum, Value::Undefined, &[Value::Number(5.0)]).unwrap();
    assert_eq!(result, Value::Number(10.0));
}

#[test]
fn test_named_property_on_dynamic_object() {
    let mut m = ModuleBuilder::new("objects");
    let size = m.string("size");
    let mut w = BytecodeWriter::new();
    w.emit_op(Opcode::NewObject);
    w.emit_op(Opcode::Dup);
    w.emit_op_num(Opcode::LoadInt, 3);
    w.emit_op_name(Opcode::PutObjName, 0, size);
    w.emit_op_name(Opcode::GetObjName, 0, size);
    w.emit_op(Opcode::Return);
    m.function(function("make", FIRST_FREE_SLOT, 0, 0, w.into_bytes()));

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let make = interp.get_global("make").unwrap();
    assert_eq!(interp.run_function(&make, Value::Undefined, &[]).unwrap(), Value::Number(3.0));
}

#[test]
fn test_undefined_name_raises_reference_error() {
    let mut m = ModuleBuilder::new("missing");
    let nope = m.string("nope");
    let mut w = BytecodeWriter::new();
    w.emit_op_name(Opcode::GetName, 0, nope);
    w.emit_op(Opcode::Return);
    m.function(function("read", FIRST_FREE_SLOT, 0, 0, w.into_bytes()));

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let read = interp.get_global("read").unwrap();
    let err = interp.run_function(&read, Value::Undefined, &[]).unwrap_err();
    assert!(matches!(err, VmError::Thrown(_)));
    let exception = interp.exception().cloned().unwrap();
    assert_eq!(interp.type_name_of(&exception), "ReferenceError");
    assert!(interp.format_exception().unwrap().contains("nope"));
}

// ============================================================================
// Classes
// ============================================================================

#[test]
fn test_constructor_and_method() {
    let point_slot = FIRST_FREE_SLOT + 1;
    let mut m = ModuleBuilder::new("geometry");
    let get_x = m.string("getX");

    let mut ctor = BytecodeWriter::new();
    ctor.emit_op_num(Opcode::GetLocal, 0);
    ctor.emit_op_num(Opcode::PutThisSlot, 0);
    ctor.emit_op(Opcode::ReturnUndefined);
    let mut constructor = function("Point", 0, 1, 1, ctor.into_bytes());
    constructor.attributes = CONSTRUCTOR;

    let mut method = BytecodeWriter::new();
    method.emit_op_num(Opcode::GetThisSlot, 0);
    method.emit_op(Opcode::Return);

    let mut make = BytecodeWriter::new();
    make.emit_op_num(Opcode::GetGlobalSlot, point_slot as i64);
    make.emit_op_num(Opcode::LoadInt, 9);
    make.emit_op_num(Opcode::New, 1);
    make.emit_op_num2(Opcode::CallObjName, 0, get_x as i64);
    make.emit_num(0);
    make.emit_op(Opcode::Return);

    m.class("Point", point_slot, TypeRef::None, 1)
        .property("x", 0, 0, TypeRef::None)
        .function(constructor)
        .function(function("getX", 1, 0, 0, method.into_bytes()))
        .end_class()
        .function(function("make", FIRST_FREE_SLOT, 0, 0, make.into_bytes()));

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let make = interp.get_global("make").unwrap();
    assert_eq!(interp.run_function(&make, Value::Undefined, &[]).unwrap(), Value::Number(9.0));

    let point = interp.get_global("Point").unwrap();
    let object = interp.core_types().object;
    let instance = interp.run_function(&point, Value::Undefined, &[Value::Number(4.0)]).unwrap();
    assert!(interp.is_instance_of(&instance, point.as_object().unwrap()));
    assert!(interp.is_instance_of(&instance, object));
    assert_eq!(interp.type_name_of(&instance), "Point");
}

// ============================================================================
// Arguments
// ============================================================================

fn loaded(m: &mut ModuleBuilder) -> Interpreter {
    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    interp
}

/// Type name of the exception an uncaught throw left behind
fn thrown_type(interp: &Interpreter, outcome: VmResult<Value>) -> String {
    assert!(matches!(outcome, Err(VmError::Thrown(_))), "expected a throw, got {:?}", outcome);
    let exception = interp.exception().cloned().unwrap();
    interp.type_name_of(&exception)
}

fn identity(attributes: i64) -> FunctionDef {
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op(Opcode::Return);
    let mut def = function("identity", FIRST_FREE_SLOT, 1, 0, w.into_bytes());
    def.attributes = attributes;
    def
}

#[test]
fn test_argument_count_is_checked_both_ways() {
    let mut m = ModuleBuilder::new("strict_args");
    m.function(identity(0));
    let mut interp = loaded(&mut m);
    let f = interp.get_global("identity").unwrap();
    let one = Value::Number(1.0);

    assert_eq!(interp.run_function(&f, Value::Undefined, &[one.clone()]).unwrap(), one);
    let outcome = interp.run_function(&f, Value::Undefined, &[one.clone(), Value::Null, Value::Null]);
    assert_eq!(thrown_type(&interp, outcome), "ArgumentError");
    let outcome = interp.run_function(&f, Value::Undefined, &[]);
    assert_eq!(thrown_type(&interp, outcome), "ArgumentError");
}

#[test]
fn test_excess_arguments_from_bytecode_raise() {
    let mut call = BytecodeWriter::new();
    for n in 1..=3 {
        call.emit_op_num(Opcode::LoadInt, n);
    }
    call.emit_op_num2(Opcode::CallGlobalSlot, FIRST_FREE_SLOT as i64, 3);
    call.emit_op(Opcode::Return);

    let mut m = ModuleBuilder::new("excess");
    m.function(identity(0))
        .function(function("caller", FIRST_FREE_SLOT + 1, 0, 0, call.into_bytes()));
    let mut interp = loaded(&mut m);
    let caller = interp.get_global("caller").unwrap();
    let outcome = interp.run_function(&caller, Value::Undefined, &[]);
    assert_eq!(thrown_type(&interp, outcome), "ArgumentError");
    assert!(interp.format_exception().unwrap().contains("identity"));
}

#[test]
fn test_loose_function_accepts_any_count() {
    let mut m = ModuleBuilder::new("loose_args");
    m.function(identity(LOOSE_ARGS));
    let mut interp = loaded(&mut m);
    let f = interp.get_global("identity").unwrap();

    let first = Value::Number(7.0);
    let many = [first.clone(), Value::Null, Value::Boolean(true)];
    assert_eq!(interp.run_function(&f, Value::Undefined, &many).unwrap(), first);
    assert_eq!(interp.run_function(&f, Value::Undefined, &[]).unwrap(), Value::Undefined);
}

/// `function f(first, ...rest)` returning `rest.length` or `rest[1]`
fn rest_function(name: &str, slot: u32, m: &mut ModuleBuilder, index: Option<i64>) {
    let length = m.string("length");
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::GetLocal, 1);
    match index {
        Some(i) => {
            w.emit_op_num(Opcode::LoadInt, i);
            w.emit_op(Opcode::GetIndex);
        }
        None => w.emit_op_name(Opcode::GetObjName, 0, length),
    }
    w.emit_op(Opcode::Return);
    let mut def = function(name, slot, 2, 0, w.into_bytes());
    def.attributes = REST_ARGS;
    m.function(def);
}

#[test]
fn test_rest_parameter_collects_extra_arguments() {
    let mut m = ModuleBuilder::new("rest_args");
    rest_function("count", FIRST_FREE_SLOT, &mut m, None);
    rest_function("second", FIRST_FREE_SLOT + 1, &mut m, Some(1));
    let mut interp = loaded(&mut m);
    let count = interp.get_global("count").unwrap();
    let second = interp.get_global("second").unwrap();
    let nums: Vec<Value> = (1..=4).map(|n| Value::Number(n as f64)).collect();

    assert_eq!(interp.run_function(&count, Value::Undefined, &nums[..1]).unwrap(), Value::Number(0.0));
    assert_eq!(interp.run_function(&count, Value::Undefined, &nums).unwrap(), Value::Number(3.0));
    assert_eq!(interp.run_function(&second, Value::Undefined, &nums[..3]).unwrap(), Value::Number(3.0));

    let outcome = interp.run_function(&count, Value::Undefined, &[]);
    assert_eq!(thrown_type(&interp, outcome), "ArgumentError");
}

/// `function sum(a, b = 10, c = 20) { return a + b + c }`
fn defaults_module() -> ModuleBuilder {
    let mut w = BytecodeWriter::new();
    let patches = w.emit_default_args(2);
    let table_end = w.offset();
    let all_supplied = w.emit_jump(Opcode::Goto);
    let init_b = w.offset();
    w.emit_op_num(Opcode::LoadInt, 10);
    w.emit_op_num(Opcode::PutLocal, 1);
    let init_c = w.offset();
    w.emit_op_num(Opcode::LoadInt, 20);
    w.emit_op_num(Opcode::PutLocal, 2);
    w.patch_jump(all_supplied);
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op_num(Opcode::GetLocal, 1);
    w.emit_op(Opcode::Add);
    w.emit_op_num(Opcode::GetLocal, 2);
    w.emit_op(Opcode::Add);
    w.emit_op(Opcode::Return);
    w.patch_table_entry(patches[0], table_end, init_b);
    w.patch_table_entry(patches[1], table_end, init_c);

    let mut def = function("sum", FIRST_FREE_SLOT, 3, 0, w.into_bytes());
    def.default_arg_count = 2;
    let mut m = ModuleBuilder::new("defaults");
    m.function(def);
    m
}

#[test]
fn test_default_arguments_jump_past_supplied_values() {
    let mut interp = loaded(&mut defaults_module());
    let sum = interp.get_global("sum").unwrap();
    let n = |v: f64| Value::Number(v);

    assert_eq!(interp.run_function(&sum, Value::Undefined, &[n(1.0)]).unwrap(), n(31.0));
    assert_eq!(interp.run_function(&sum, Value::Undefined, &[n(1.0), n(2.0)]).unwrap(), n(23.0));
    assert_eq!(interp.run_function(&sum, Value::Undefined, &[n(1.0), n(2.0), n(3.0)]).unwrap(), n(6.0));

    let outcome = interp.run_function(&sum, Value::Undefined, &[]);
    assert_eq!(thrown_type(&interp, outcome), "ArgumentError");
    let outcome = interp.run_function(&sum, Value::Undefined, &[n(1.0), n(2.0), n(3.0), n(4.0)]);
    assert_eq!(thrown_type(&interp, outcome), "ArgumentError");
}

// ============================================================================
// Namespaces
// ============================================================================

/// Defines `alpha::v = 1` then `beta::v = 2` on the global object
fn define_shadowed(interp: &mut Interpreter) {
    let global = interp.global();
    for (space, value) in [("alpha", 1.0), ("beta", 2.0)] {
        let name = interp.qname(space, "v");
        interp
            .define_property_on(&global, SlotHint::Next, name, None, Attributes::empty(), Value::Number(value))
            .unwrap();
    }
}

/// Opens `spaces` in order, then reads the unqualified `v`
fn open_and_read(m: &mut ModuleBuilder, w: &mut BytecodeWriter, spaces: &[&str]) {
    let any = m.string("");
    let v = m.string("v");
    for space in spaces {
        let space = m.string(space);
        w.emit_op_num(Opcode::AddNamespace, space as i64);
    }
    w.emit_op_name(Opcode::GetName, any, v);
}

#[test]
fn test_latest_opened_namespace_wins() {
    let mut m = ModuleBuilder::new("namespaces");
    for (name, slot, spaces) in [
        ("none", FIRST_FREE_SLOT, &[][..]),
        ("alpha_then_beta", FIRST_FREE_SLOT + 1, &["alpha", "beta"][..]),
        ("beta_then_alpha", FIRST_FREE_SLOT + 2, &["beta", "alpha"][..]),
    ] {
        let mut w = BytecodeWriter::new();
        open_and_read(&mut m, &mut w, spaces);
        w.emit_op(Opcode::Return);
        m.function(function(name, slot, 0, 0, w.into_bytes()));
    }

    let mut interp = interp();
    define_shadowed(&mut interp);
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();

    for (name, expected) in [("none", 1.0), ("alpha_then_beta", 2.0), ("beta_then_alpha", 1.0)] {
        let f = interp.get_global(name).unwrap();
        assert_eq!(interp.run_function(&f, Value::Undefined, &[]).unwrap(), Value::Number(expected), "{}", name);
    }
}

#[test]
fn test_namespace_opened_by_caller_reaches_nested_function() {
    let mut m = ModuleBuilder::new("nested_namespaces");
    let beta = m.string("beta");
    let mut outer = BytecodeWriter::new();
    outer.emit_op_num(Opcode::AddNamespace, beta as i64);
    outer.emit_op(Opcode::LoadUndefined);
    outer.emit_op_num(Opcode::GetLocal, 0);
    outer.emit_op_num(Opcode::Call, 0);
    outer.emit_op(Opcode::Return);

    let mut inner = BytecodeWriter::new();
    open_and_read(&mut m, &mut inner, &[]);
    inner.emit_op(Opcode::Return);

    m.begin_function(function("outer", FIRST_FREE_SLOT, 0, 1, outer.into_bytes()))
        .function(function("inner", 0, 0, 0, inner.into_bytes()))
        .end_function();

    let mut interp = interp();
    define_shadowed(&mut interp);
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let outer = interp.get_global("outer").unwrap();
    assert_eq!(interp.run_function(&outer, Value::Undefined, &[]).unwrap(), Value::Number(2.0));
}

// ============================================================================
// Exit
// ============================================================================

#[test]
fn test_exit_request_stops_loop() {
    let mut w = BytecodeWriter::new();
    let top = w.offset();
    w.emit_op(Opcode::Nop);
    w.emit_jump_to(Opcode::Goto, top);

    let mut m = ModuleBuilder::new("spin");
    m.function(function("spin", FIRST_FREE_SLOT, 0, 0, w.into_bytes()));

    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    let spin = interp.get_global("spin").unwrap();
    let handle = interp.exit_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.request();
    });
    let outcome = interp.run_function(&spin, Value::Undefined, &[]);
    stopper.join().unwrap();
    assert!(matches!(outcome, Err(VmError::Exiting)));
    assert!(interp.is_exiting());
}
