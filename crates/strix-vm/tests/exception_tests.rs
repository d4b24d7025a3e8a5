//! Handler tables, finally semantics and fault recovery

mod common;

use common::*;
use std::sync::Arc;
use strix_bytecode::{BytecodeWriter, ModuleDef, Opcode, TypeRef};
use strix_vm::{ErrorKind, Interpreter, LoadFlags, Service, Value, VmError, VmOptions, VmResult};

const ERROR_SLOT: i64 = 10;
const TYPE_ERROR_SLOT: i64 = 24;

fn run(interp: &mut Interpreter, def: ModuleDef, name: &str, args: &[Value]) -> Result<Value, VmError> {
    interp.load_module(def, LoadFlags::empty()).unwrap();
    let function = interp.get_global(name).unwrap();
    interp.run_function(&function, Value::Undefined, args)
}

fn text(value: &Value) -> Option<&str> {
    value.as_istr().map(|s| s.as_str())
}

/// `try { throw "E1" } finally { <body> }`
fn try_finally(m: &mut ModuleBuilder, rethrow_in_finally: bool) {
    let e1 = m.string("E1");
    let e2 = m.string("E2");
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::LoadString, e1 as i64);
    w.emit_op(Opcode::Throw);
    let try_end = w.offset();
    if rethrow_in_finally {
        w.emit_op_num(Opcode::LoadString, e2 as i64);
        w.emit_op(Opcode::Throw);
    } else {
        w.emit_op(Opcode::Nop);
    }
    w.emit_op(Opcode::EndException);
    let handler_end = w.offset();
    w.emit_op(Opcode::ReturnUndefined);

    let h = handler(FINALLY, (0, try_end), (try_end, handler_end), TypeRef::None);
    m.function_with_handlers(function("guarded", FIRST_FREE_SLOT, 1, 1, w.into_bytes()), vec![h]);
}

#[test]
fn test_throw_in_finally_replaces_pending_exception() {
    let mut m = ModuleBuilder::new("finally_replace");
    try_finally(&mut m, true);
    let mut interp = interp();
    let err = run(&mut interp, m.build(), "guarded", &[Value::Number(1.0)]).unwrap_err();
    assert!(matches!(&err, VmError::Thrown(text) if text == "E2"));
    assert_eq!(text(interp.exception().unwrap()), Some("E2"));
}

#[test]
fn test_finally_completing_normally_rethrows_original() {
    let mut m = ModuleBuilder::new("finally_rethrow");
    try_finally(&mut m, false);
    let mut interp = interp();
    let err = run(&mut interp, m.build(), "guarded", &[Value::Number(1.0)]).unwrap_err();
    assert!(matches!(&err, VmError::Thrown(text) if text == "E1"));
    assert_eq!(text(interp.exception().unwrap()), Some("E1"));
}

fn catch_module(catch_type: TypeRef) -> ModuleDef {
    let mut m = ModuleBuilder::new("catching");
    let bad = m.string("bad");
    let caught = m.string("caught");
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::GetGlobalSlot, TYPE_ERROR_SLOT);
    w.emit_op_num(Opcode::LoadString, bad as i64);
    w.emit_op_num(Opcode::New, 1);
    w.emit_op(Opcode::Throw);
    let try_end = w.offset();
    w.emit_op(Opcode::Pop);
    w.emit_op_num(Opcode::LoadString, caught as i64);
    w.emit_op(Opcode::Return);
    let handler_end = w.offset();

    let h = handler(CATCH, (0, try_end), (try_end, handler_end), catch_type);
    m.function_with_handlers(function("attempt", FIRST_FREE_SLOT, 0, 0, w.into_bytes()), vec![h]);
    m.build()
}

#[test]
fn test_catch_by_type_name() {
    let mut interp = interp();
    let result = run(&mut interp, catch_module(TypeRef::named("", "TypeError")), "attempt", &[]).unwrap();
    assert_eq!(text(&result), Some("caught"));
    assert!(interp.exception().is_none());
}

#[test]
fn test_catch_of_unrelated_type_propagates() {
    let mut interp = interp();
    let err = run(&mut interp, catch_module(TypeRef::named("", "ArgumentError")), "attempt", &[]).unwrap_err();
    assert!(matches!(err, VmError::Thrown(_)));
    let exception = interp.exception().cloned().unwrap();
    let type_error = interp.core_types().error(ErrorKind::TypeError);
    assert!(interp.is_instance_of(&exception, type_error));
    assert_eq!(interp.format_exception().unwrap().lines().next(), Some("TypeError: bad"));
}

#[test]
fn test_stack_overflow_caught_by_ancestor_type() {
    let recurse_slot = FIRST_FREE_SLOT;
    let mut m = ModuleBuilder::new("deep");
    let overflow = m.string("overflow");

    let mut recurse = BytecodeWriter::new();
    recurse.emit_op_num2(Opcode::CallGlobalSlot, recurse_slot as i64, 0);
    recurse.emit_op(Opcode::Return);

    let mut outer = BytecodeWriter::new();
    outer.emit_op_num2(Opcode::CallGlobalSlot, recurse_slot as i64, 0);
    let try_end = outer.offset();
    outer.emit_op(Opcode::Return);
    let handler_start = outer.offset();
    outer.emit_op(Opcode::Pop);
    outer.emit_op_num(Opcode::LoadString, overflow as i64);
    outer.emit_op(Opcode::Return);
    let handler_end = outer.offset();

    let h = handler(CATCH, (0, try_end), (handler_start, handler_end), TypeRef::Slot(ERROR_SLOT as u32));
    m.function(function("recurse", recurse_slot, 0, 0, recurse.into_bytes()))
        .function_with_handlers(function("outer", recurse_slot + 1, 0, 0, outer.into_bytes()), vec![h]);

    let options = VmOptions {
        max_recursion: 64,
        ..VmOptions::default()
    };
    let mut interp = Interpreter::new(Arc::new(Service::new()), options).unwrap();
    let result = run(&mut interp, m.build(), "outer", &[]).unwrap();
    assert_eq!(text(&result), Some("overflow"));

    // The fault was handled, so a second overflow is recoverable too.
    let outer = interp.get_global("outer").unwrap();
    let again = interp.run_function(&outer, Value::Undefined, &[]).unwrap();
    assert_eq!(text(&again), Some("overflow"));
    assert!(!interp.is_aborted());
}

#[test]
fn test_uncaught_overflow_is_internal_error() {
    let mut m = ModuleBuilder::new("runaway");
    let mut w = BytecodeWriter::new();
    w.emit_op_num2(Opcode::CallGlobalSlot, FIRST_FREE_SLOT as i64, 0);
    w.emit_op(Opcode::Return);
    m.function(function("runaway", FIRST_FREE_SLOT, 0, 0, w.into_bytes()));

    let options = VmOptions {
        max_recursion: 32,
        ..VmOptions::default()
    };
    let mut interp = Interpreter::new(Arc::new(Service::new()), options).unwrap();
    assert!(run(&mut interp, m.build(), "runaway", &[]).is_err());
    let exception = interp.exception().cloned().unwrap();
    assert_eq!(interp.type_name_of(&exception), "InternalError");
    assert!(!interp.is_aborted());
}

/// Counts up to three, then signals the end of iteration
fn advance(_interp: &mut Interpreter, _this: Value, args: &[Value]) -> VmResult<Value> {
    match args.first().and_then(Value::as_number) {
        Some(n) if n < 3.0 => Ok(Value::Number(n + 1.0)),
        _ => Err(VmError::raise(ErrorKind::StopIteration, "exhausted")),
    }
}

fn refuse(_interp: &mut Interpreter, _this: Value, _args: &[Value]) -> VmResult<Value> {
    Err(VmError::type_error("not iterable"))
}

/// `n = 0; loop { n = next(n) }` guarded by an iteration handler returning `n`
fn iteration_module(next: &str) -> ModuleDef {
    let mut m = ModuleBuilder::new("iterating");
    let next = m.string(next);
    let mut w = BytecodeWriter::new();
    w.emit_op_num(Opcode::LoadInt, 0);
    w.emit_op_num(Opcode::PutLocal, 0);
    let try_start = w.offset();
    w.emit_op(Opcode::LoadUndefined);
    w.emit_op_name(Opcode::GetName, 0, next);
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op_num(Opcode::Call, 1);
    w.emit_op_num(Opcode::PutLocal, 0);
    w.emit_jump_to(Opcode::Goto, try_start);
    let try_end = w.offset();
    w.emit_op_num(Opcode::GetLocal, 0);
    w.emit_op(Opcode::Return);
    let handler_end = w.offset();

    let h = handler(ITERATION, (try_start, try_end), (try_end, handler_end), TypeRef::None);
    m.function_with_handlers(function("drain", FIRST_FREE_SLOT, 0, 1, w.into_bytes()), vec![h]);
    m.build()
}

#[test]
fn test_iteration_handler_ends_loop_on_stop_iteration() {
    let mut interp = interp();
    interp.define_global_function("advance", advance, 1).unwrap();
    let result = run(&mut interp, iteration_module("advance"), "drain", &[]).unwrap();
    assert_eq!(result, Value::Number(3.0));
    assert!(interp.exception().is_none());
}

#[test]
fn test_iteration_handler_ignores_other_errors() {
    let mut interp = interp();
    interp.define_global_function("refuse", refuse, 1).unwrap();
    let err = run(&mut interp, iteration_module("refuse"), "drain", &[]).unwrap_err();
    assert!(matches!(err, VmError::Thrown(_)));
    let exception = interp.exception().cloned().unwrap();
    assert_eq!(interp.type_name_of(&exception), "TypeError");
}
