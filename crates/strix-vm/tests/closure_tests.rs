//! Closure creation, scope capture and lifetime
//!
//! Functions nested in another function live in its activation. Plain
//! nested functions run against the scope of whichever frame calls them;
//! `FULL_SCOPE` functions capture the creating frame and outlive it.

mod common;

use common::*;
use strix_bytecode::{BytecodeWriter, Opcode};
use strix_vm::{Interpreter, LoadFlags, Value};

/// `function make(n) { function inner() { return n } return inner }`
fn make_module(inner_attributes: i64) -> ModuleBuilder {
    let mut make = BytecodeWriter::new();
    make.emit_op_num(Opcode::GetLocal, 1);
    make.emit_op(Opcode::Closure);
    make.emit_op(Opcode::Return);

    let mut inner = BytecodeWriter::new();
    inner.emit_op_num2(Opcode::GetScopedSlot, 1, 0);
    inner.emit_op(Opcode::Return);

    let mut inner = function("inner", 1, 0, 0, inner.into_bytes());
    inner.attributes = inner_attributes;

    let mut m = ModuleBuilder::new("closures");
    m.begin_function(function("make", FIRST_FREE_SLOT, 1, 1, make.into_bytes()))
        .function(inner)
        .end_function();
    m
}

fn load(m: &mut ModuleBuilder) -> Interpreter {
    let mut interp = interp();
    interp.load_module(m.build(), LoadFlags::empty()).unwrap();
    interp
}

// ===== Scope Capture =====

#[test]
fn test_full_scope_closure_outlives_frame() {
    let mut interp = load(&mut make_module(FULL_SCOPE));
    let make = interp.get_global("make").unwrap();

    let three = interp.run_function(&make, Value::Undefined, &[Value::Number(3.0)]).unwrap();
    let seven = interp.run_function(&make, Value::Undefined, &[Value::Number(7.0)]).unwrap();
    assert_ne!(three, seven);

    assert_eq!(interp.run_function(&three, Value::Undefined, &[]).unwrap(), Value::Number(3.0));
    assert_eq!(interp.run_function(&seven, Value::Undefined, &[]).unwrap(), Value::Number(7.0));
}

#[test]
fn test_captured_scope_survives_collection() {
    let mut interp = load(&mut make_module(FULL_SCOPE));
    let make = interp.get_global("make").unwrap();
    let closure = interp.run_function(&make, Value::Undefined, &[Value::Number(5.0)]).unwrap();
    let handle = interp.pin(closure.clone());

    interp.collect();
    assert_eq!(interp.run_function(&closure, Value::Undefined, &[]).unwrap(), Value::Number(5.0));
    interp.unpin(handle);
}

#[test]
fn test_plain_closure_is_shared_not_copied() {
    let mut interp = load(&mut make_module(0));
    let make = interp.get_global("make").unwrap();

    let first = interp.run_function(&make, Value::Undefined, &[Value::Number(1.0)]).unwrap();
    let second = interp.run_function(&make, Value::Undefined, &[Value::Number(2.0)]).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_full_scope_closure_binds_creating_this() {
    let mut make = BytecodeWriter::new();
    make.emit_op_num(Opcode::GetLocal, 0);
    make.emit_op(Opcode::Closure);
    make.emit_op(Opcode::Return);

    let mut inner = BytecodeWriter::new();
    inner.emit_op(Opcode::LoadThis);
    inner.emit_op(Opcode::Return);
    let mut inner = function("owner", 0, 0, 0, inner.into_bytes());
    inner.attributes = FULL_SCOPE;

    let mut m = ModuleBuilder::new("bound_this");
    m.begin_function(function("method", FIRST_FREE_SLOT, 0, 1, make.into_bytes()))
        .function(inner)
        .end_function();

    let mut interp = load(&mut m);
    let owner = interp.new_object().unwrap();
    let method = interp.get_global("method").unwrap();
    let closure = interp.run_function(&method, owner.clone(), &[]).unwrap();

    assert_eq!(interp.run_function(&closure, Value::Undefined, &[]).unwrap(), owner);
}

// ===== Recursion =====

/// Creates `inner`, recurses once per level, then calls `inner` after the
/// recursive activations have returned. `inner` must see the activation of
/// the frame calling it.
fn recursive_module() -> ModuleBuilder {
    let mut outer = BytecodeWriter::new();
    outer.emit_op_num(Opcode::GetLocal, 1);
    outer.emit_op(Opcode::Closure);
    outer.emit_op_num(Opcode::PutLocal, 1);

    outer.emit_op_num(Opcode::GetLocal, 0);
    outer.emit_op_num(Opcode::LoadInt, 0);
    outer.emit_op(Opcode::CompareGt);
    let call_inner = outer.emit_jump(Opcode::BranchFalse);
    outer.emit_op_num(Opcode::GetLocal, 0);
    outer.emit_op_num(Opcode::LoadInt, 1);
    outer.emit_op(Opcode::Sub);
    outer.emit_op_num2(Opcode::CallGlobalSlot, FIRST_FREE_SLOT as i64, 1);
    outer.emit_op(Opcode::Pop);

    outer.patch_jump(call_inner);
    outer.emit_op(Opcode::LoadUndefined);
    outer.emit_op_num(Opcode::GetLocal, 1);
    outer.emit_op_num(Opcode::Call, 0);
    outer.emit_op(Opcode::Return);

    let mut inner = BytecodeWriter::new();
    inner.emit_op_num2(Opcode::GetScopedSlot, 1, 0);
    inner.emit_op(Opcode::Return);

    let mut m = ModuleBuilder::new("recursive");
    m.begin_function(function("outer", FIRST_FREE_SLOT, 1, 1, outer.into_bytes()))
        .function(function("inner", 1, 0, 0, inner.into_bytes()))
        .end_function();
    m
}

#[test]
fn test_closure_sees_caller_after_recursion() {
    let mut interp = load(&mut recursive_module());
    let outer = interp.get_global("outer").unwrap();

    assert_eq!(interp.run_function(&outer, Value::Undefined, &[Value::Number(1.0)]).unwrap(), Value::Number(1.0));
    assert_eq!(interp.run_function(&outer, Value::Undefined, &[Value::Number(4.0)]).unwrap(), Value::Number(4.0));
    assert_eq!(interp.run_function(&outer, Value::Undefined, &[Value::Number(0.0)]).unwrap(), Value::Number(0.0));
}
