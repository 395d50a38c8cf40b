//! End-to-end bytecode tests: modules are assembled with the rill-core
//! builders, loaded into a fresh VM and driven through the scheduler.
//! Covers the interpreter instruction families, linking, module
//! initialization and the std builtins.

use rill_core::{FunctionBuilder, ModuleBuilder, ModuleData, Op};
use rill_runtime::{ErrorKind, Scope, Value, Vm};
use std::cell::RefCell;
use std::rc::Rc;

fn new_vm() -> Vm {
    let mut vm = Vm::new().expect("vm construction succeeds");
    vm.load_std().expect("std loads");
    vm
}

/// Load `data`, look up `export` and run it with `args` to completion.
/// Returns the coroutine's result object, rooted in `scope`.
fn run_export(
    vm: &mut Vm,
    scope: &Scope,
    data: &ModuleData,
    export: &str,
    args: &[Value],
) -> Value {
    vm.load_module(data).expect("module loads");
    run_loaded_export(vm, scope, &data.name, export, args)
}

fn run_loaded_export(
    vm: &mut Vm,
    scope: &Scope,
    module: &str,
    export: &str,
    args: &[Value],
) -> Value {
    let function = scope.local(vm.get_export(module, export).expect("export exists"));
    let arguments = if args.is_empty() {
        Value::null()
    } else {
        scope.local(vm.make_tuple_with(args).unwrap()).get()
    };
    let coroutine = scope.local(vm.make_coroutine(function.get(), arguments).unwrap());
    vm.coroutine_start(coroutine.get()).unwrap();
    vm.run_ready().unwrap();
    assert!(vm.coroutine_completed(coroutine.get()).unwrap());
    vm.coroutine_result(coroutine.get()).unwrap()
}

fn expect_success_int(vm: &mut Vm, result: Value) -> i64 {
    assert!(
        vm.result_is_success(result).unwrap(),
        "expected success, got {}",
        vm.debug_repr(result).unwrap()
    );
    let value = vm.result_value(result).unwrap();
    vm.integer_value(value).unwrap()
}

fn expect_error_message(vm: &mut Vm, result: Value) -> String {
    assert!(vm.result_is_error(result).unwrap());
    let exception = vm.result_error(result).unwrap();
    vm.exception_message(exception).unwrap()
}

// --- arithmetic and control flow -------------------------------------------

#[test]
fn test_exported_add_function() {
    // export func test(a, b) { return a + b; }
    let mut f = FunctionBuilder::new("test", 2, 0);
    f.op_u32(Op::LoadParam, 0);
    f.op_u32(Op::LoadParam, 1);
    f.op(Op::Add);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("arith");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let args = [vm.make_integer(4).unwrap(), vm.make_integer(5).unwrap()];
    let result = scope.local(run_export(&mut vm, &scope, &data, "test", &args));
    assert_eq!(expect_success_int(&mut vm, result.get()), 9);
}

#[test]
fn test_mixed_arithmetic_promotes_to_float() {
    let mut f = FunctionBuilder::new("mixed", 0, 0);
    f.load_int(1);
    f.load_float(2.5);
    f.op(Op::Add);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("mixed");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "mixed", &[]));
    let value = vm.result_value(result.get()).unwrap();
    assert_eq!(vm.float_value(value).unwrap(), 3.5);
}

#[test]
fn test_integer_overflow_panics() {
    let mut f = FunctionBuilder::new("overflow", 0, 0);
    f.load_int(i64::MAX);
    f.load_int(1);
    f.op(Op::Add);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("overflow");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "overflow", &[]));
    let message = expect_error_message(&mut vm, result.get());
    assert!(message.contains("overflow"), "{message}");
}

#[test]
fn test_division_by_zero_panics() {
    let mut f = FunctionBuilder::new("div", 2, 0);
    f.op_u32(Op::LoadParam, 0);
    f.op_u32(Op::LoadParam, 1);
    f.op(Op::Div);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("div");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let args = [vm.make_integer(7).unwrap(), vm.make_integer(0).unwrap()];
    let result = scope.local(run_export(&mut vm, &scope, &data, "div", &args));
    let message = expect_error_message(&mut vm, result.get());
    assert!(message.contains("division by zero"), "{message}");

    let args = [vm.make_integer(7).unwrap(), vm.make_integer(2).unwrap()];
    let result = scope.local(run_loaded_export(&mut vm, &scope, "div", "div", &args));
    assert_eq!(expect_success_int(&mut vm, result.get()), 3);
}

#[test]
fn test_truncated_modulo_and_shifts() {
    let mut f = FunctionBuilder::new("ops", 0, 0);
    // (-7 % 2) stays -1 under truncation; (1 << 65) wraps the count to 1.
    f.load_int(-7);
    f.load_int(2);
    f.op(Op::Mod);
    f.load_int(1);
    f.load_int(65);
    f.op(Op::LShift);
    f.op(Op::Add);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("ops");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "ops", &[]));
    // -1 + 2 = 1
    assert_eq!(expect_success_int(&mut vm, result.get()), 1);
}

#[test]
fn test_branching_max() {
    // func max(a, b) { if a > b { return a; } return b; }
    let mut f = FunctionBuilder::new("max", 2, 0);
    let bigger = f.label();
    f.op_u32(Op::LoadParam, 0);
    f.op_u32(Op::LoadParam, 1);
    f.op(Op::Gt);
    f.branch(Op::JmpTrue, bigger);
    f.op_u32(Op::LoadParam, 1);
    f.op(Op::Return);
    f.bind(bigger);
    f.op_u32(Op::LoadParam, 0);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("branching");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    vm.load_module(&data).unwrap();

    for (a, b, expected) in [(3, 9, 9), (9, 3, 9), (-4, -7, -4)] {
        let args = [vm.make_integer(a).unwrap(), vm.make_integer(b).unwrap()];
        let result = scope.local(run_loaded_export(&mut vm, &scope, "branching", "max", &args));
        assert_eq!(expect_success_int(&mut vm, result.get()), expected);
    }
}

#[test]
fn test_loop_with_locals() {
    // func sum(n) { var i = 0; var acc = 0; while i < n { i = i + 1; acc = acc + i; } return acc; }
    let mut f = FunctionBuilder::new("sum", 1, 2);
    let head = f.label();
    let end = f.label();
    f.load_int(0);
    f.op_u32(Op::StoreLocal, 0);
    f.load_int(0);
    f.op_u32(Op::StoreLocal, 1);
    f.bind(head);
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadParam, 0);
    f.op(Op::Lt);
    f.branch(Op::JmpFalse, end);
    f.op_u32(Op::LoadLocal, 0);
    f.load_int(1);
    f.op(Op::Add);
    f.op(Op::Dup);
    f.op_u32(Op::StoreLocal, 0);
    f.op_u32(Op::LoadLocal, 1);
    f.op(Op::Add);
    f.op_u32(Op::StoreLocal, 1);
    f.branch(Op::Jmp, head);
    f.bind(end);
    f.op_u32(Op::LoadLocal, 1);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("looping");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let args = [vm.make_integer(5).unwrap()];
    let result = scope.local(run_export(&mut vm, &scope, &data, "sum", &args));
    assert_eq!(expect_success_int(&mut vm, result.get()), 15);
}

#[test]
fn test_assert_fail_panics_with_message() {
    let mut m = ModuleBuilder::new("asserts");
    let message = m.string("boom");
    let mut f = FunctionBuilder::new("fail", 0, 0);
    f.op_u32(Op::LoadModule, message);
    f.op(Op::AssertFail);
    let data = {
        m.exported_function(f.finish());
        m.finish()
    };

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "fail", &[]));
    let message = expect_error_message(&mut vm, result.get());
    assert_eq!(message, "assertion failed: boom");
}

// --- containers and methods ------------------------------------------------

#[test]
fn test_array_literal_and_method_calls() {
    let mut m = ModuleBuilder::new("arrays");
    let append = m.symbol("append");
    let size = m.symbol("size");

    let mut f = FunctionBuilder::new("build", 0, 1);
    f.load_int(1);
    f.load_int(2);
    f.op_u32(Op::Array, 2);
    f.op_u32(Op::StoreLocal, 0);
    // array.append(3)
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadMethod, append);
    f.load_int(3);
    f.op_u32(Op::CallMethod, 1);
    f.op(Op::Pop);
    // return array.size()
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadMethod, size);
    f.op_u32(Op::CallMethod, 0);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "build", &[]));
    assert_eq!(expect_success_int(&mut vm, result.get()), 3);
}

#[test]
fn test_tuple_and_indexed_access() {
    let mut f = FunctionBuilder::new("pick", 0, 0);
    f.load_int(10);
    f.load_int(20);
    f.load_int(30);
    f.op_u32(Op::Tuple, 3);
    f.load_int(1);
    f.op(Op::LoadIndex);
    f.op(Op::Return);

    let mut m = ModuleBuilder::new("tuples");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "pick", &[]));
    assert_eq!(expect_success_int(&mut vm, result.get()), 20);
}

#[test]
fn test_map_literal_and_lookup() {
    let mut m = ModuleBuilder::new("maps");
    let key_a = m.string("a");
    let key_b = m.string("b");

    let mut f = FunctionBuilder::new("lookup", 0, 1);
    f.op_u32(Op::LoadModule, key_a);
    f.load_int(1);
    f.op_u32(Op::LoadModule, key_b);
    f.load_int(2);
    f.op_u32(Op::Map, 2);
    f.op_u32(Op::StoreLocal, 0);
    // return map["b"]
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadModule, key_b);
    f.op(Op::LoadIndex);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "lookup", &[]));
    assert_eq!(expect_success_int(&mut vm, result.get()), 2);
}

#[test]
fn test_set_literal_builds_table_with_null_values() {
    let mut m = ModuleBuilder::new("sets");
    let size = m.symbol("size");
    let contains = m.symbol("contains");

    // Duplicate keys collapse; returns the set size if it contains 2,
    // otherwise -1.
    let mut f = FunctionBuilder::new("probe", 0, 1);
    let miss = f.label();
    f.load_int(1);
    f.load_int(2);
    f.load_int(2);
    f.op_u32(Op::Set, 3);
    f.op_u32(Op::StoreLocal, 0);
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadMethod, contains);
    f.load_int(2);
    f.op_u32(Op::CallMethod, 1);
    f.branch(Op::JmpFalse, miss);
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadMethod, size);
    f.op_u32(Op::CallMethod, 0);
    f.op(Op::Return);
    f.bind(miss);
    f.load_int(-1);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "probe", &[]));
    assert_eq!(expect_success_int(&mut vm, result.get()), 2);
}

#[test]
fn test_string_formatter() {
    let mut m = ModuleBuilder::new("formats");
    let prefix = m.string("x = ");

    let mut f = FunctionBuilder::new("format", 0, 0);
    f.op(Op::Formatter);
    f.op_u32(Op::LoadModule, prefix);
    f.op(Op::AppendFormat);
    f.load_int(42);
    f.op(Op::AppendFormat);
    f.op(Op::FormatResult);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "format", &[]));
    let value = vm.result_value(result.get()).unwrap();
    assert_eq!(vm.string_value(value).unwrap(), "x = 42");
}

#[test]
fn test_method_reified_as_bound_method() {
    // f = array.append; f(9); return array.size()
    let mut m = ModuleBuilder::new("bound");
    let append = m.symbol("append");
    let size = m.symbol("size");

    let mut f = FunctionBuilder::new("reify", 0, 2);
    f.op_u32(Op::Array, 0);
    f.op_u32(Op::StoreLocal, 0);
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadMember, append);
    f.op_u32(Op::StoreLocal, 1);
    f.op_u32(Op::LoadLocal, 1);
    f.load_int(9);
    f.op_u32(Op::Call, 1);
    f.op(Op::Pop);
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadMethod, size);
    f.op_u32(Op::CallMethod, 0);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "reify", &[]));
    assert_eq!(expect_success_int(&mut vm, result.get()), 1);
}

// --- closures --------------------------------------------------------------

#[test]
fn test_closure_captures_environment() {
    let mut m = ModuleBuilder::new("closures");

    // inner() { return captured + 1; }
    let mut inner = FunctionBuilder::new("inner", 0, 0);
    inner.op_u32_u32(Op::LoadEnv, 0, 0);
    inner.load_int(1);
    inner.op(Op::Add);
    inner.op(Op::Return);
    let inner_index = m.function(inner.finish());

    // outer() { var env = [41]; return closure(inner, env); }
    let mut outer = FunctionBuilder::new("outer", 0, 1);
    outer.op(Op::LoadNull);
    outer.op_u32(Op::MakeEnv, 1);
    outer.op_u32(Op::StoreLocal, 0);
    outer.op_u32(Op::LoadLocal, 0);
    outer.load_int(0);
    outer.load_int(41);
    outer.op(Op::StoreIndex);
    outer.op_u32(Op::LoadModule, inner_index);
    outer.op_u32(Op::LoadLocal, 0);
    outer.op(Op::MakeClosure);
    outer.op(Op::Return);
    m.exported_function(outer.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "outer", &[]));
    assert!(vm.result_is_success(result.get()).unwrap());
    let closure = scope.local(vm.result_value(result.get()).unwrap());

    // Run the returned closure; it reads the captured slot.
    let coroutine = scope.local(vm.make_coroutine(closure.get(), Value::null()).unwrap());
    vm.coroutine_start(coroutine.get()).unwrap();
    vm.run_ready().unwrap();
    let inner_result = scope.local(vm.coroutine_result(coroutine.get()).unwrap());
    assert_eq!(expect_success_int(&mut vm, inner_result.get()), 42);
}

// --- std interop -----------------------------------------------------------

/// Emit `std.<name>(arg_from_member)`; the call result stays on the stack.
fn emit_std_call_member(
    f: &mut FunctionBuilder,
    std_import: u32,
    symbol: u32,
    arg_member: Option<u32>,
) {
    f.op_u32(Op::LoadModule, std_import);
    f.op_u32(Op::LoadMethod, symbol);
    match arg_member {
        Some(member) => {
            f.op_u32(Op::LoadModule, member);
            f.op_u32(Op::CallMethod, 1);
        }
        None => {
            f.op_u32(Op::CallMethod, 0);
        }
    }
}

#[test]
fn test_std_panic_with_message() {
    // import std; export func foo() { std.panic("nope!"); }
    let mut m = ModuleBuilder::new("panics");
    let std_import = m.import("std");
    let panic = m.symbol("panic");
    let message = m.string("nope!");

    let mut f = FunctionBuilder::new("foo", 0, 0);
    emit_std_call_member(&mut f, std_import, panic, Some(message));
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "foo", &[]));
    assert_eq!(expect_error_message(&mut vm, result.get()), "nope!");
}

#[test]
fn test_stdout_redirection() {
    // std.print("Hello"); std.print("World");
    let mut m = ModuleBuilder::new("printer");
    let std_import = m.import("std");
    let print = m.symbol("print");
    let hello = m.string("Hello");
    let world = m.string("World");

    let mut f = FunctionBuilder::new("greet", 0, 0);
    emit_std_call_member(&mut f, std_import, print, Some(hello));
    f.op(Op::Pop);
    emit_std_call_member(&mut f, std_import, print, Some(world));
    f.op(Op::Pop);
    f.op(Op::LoadNull);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let lines: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink_lines = Rc::clone(&lines);
    vm.set_print_stdout(Box::new(move |text| {
        sink_lines.borrow_mut().push(text.to_string());
    }));

    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "greet", &[]));
    assert!(vm.result_is_success(result.get()).unwrap());
    assert_eq!(*lines.borrow(), vec!["Hello\n".to_string(), "World\n".to_string()]);
}

#[test]
fn test_catch_panic_returns_error_result() {
    let mut m = ModuleBuilder::new("catches");
    let std_import = m.import("std");
    let catch = m.symbol("catch_panic");
    let panic = m.symbol("panic");
    let message = m.string("caught!");

    // func boom() { std.panic("caught!"); }
    let mut boom = FunctionBuilder::new("boom", 0, 0);
    emit_std_call_member(&mut boom, std_import, panic, Some(message));
    boom.op(Op::Return);
    let boom_index = m.function(boom.finish());

    // func safe() { return std.catch_panic(boom); }
    let mut safe = FunctionBuilder::new("safe", 0, 0);
    f_emit_catch(&mut safe, std_import, catch, boom_index);
    safe.op(Op::Return);
    m.exported_function(safe.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let outer = scope.local(run_export(&mut vm, &scope, &data, "safe", &[]));
    assert!(vm.result_is_success(outer.get()).unwrap());

    // The returned value is itself a result holding the caught exception.
    let inner = scope.local(vm.result_value(outer.get()).unwrap());
    assert!(vm.result_is_error(inner.get()).unwrap());
    let exception = vm.result_error(inner.get()).unwrap();
    assert_eq!(vm.exception_message(exception).unwrap(), "caught!");
}

fn f_emit_catch(f: &mut FunctionBuilder, std_import: u32, catch: u32, target: u32) {
    f.op_u32(Op::LoadModule, std_import);
    f.op_u32(Op::LoadMethod, catch);
    f.op_u32(Op::LoadModule, target);
    f.op_u32(Op::CallMethod, 1);
}

#[test]
fn test_yield_interleaves_coroutines() {
    // func chat(first, second) { std.print(first); std.yield_coroutine(); std.print(second); }
    let mut m = ModuleBuilder::new("chatty");
    let std_import = m.import("std");
    let print = m.symbol("print");
    let yield_sym = m.symbol("yield_coroutine");

    let mut f = FunctionBuilder::new("chat", 2, 0);
    f.op_u32(Op::LoadModule, std_import);
    f.op_u32(Op::LoadMethod, print);
    f.op_u32(Op::LoadParam, 0);
    f.op_u32(Op::CallMethod, 1);
    f.op(Op::Pop);
    emit_std_call_member(&mut f, std_import, yield_sym, None);
    f.op(Op::Pop);
    f.op_u32(Op::LoadModule, std_import);
    f.op_u32(Op::LoadMethod, print);
    f.op_u32(Op::LoadParam, 1);
    f.op_u32(Op::CallMethod, 1);
    f.op(Op::Pop);
    f.op(Op::LoadNull);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let lines: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink_lines = Rc::clone(&lines);
    vm.set_print_stdout(Box::new(move |text| {
        sink_lines.borrow_mut().push(text.trim_end().to_string());
    }));

    let scope = Scope::new(&vm);
    vm.load_module(&data).unwrap();
    let function = scope.local(vm.get_export("chatty", "chat").unwrap());

    for (first, second) in [("a1", "a2"), ("b1", "b2")] {
        let args = [
            scope.local(vm.make_string(first).unwrap()).get(),
            scope.local(vm.make_string(second).unwrap()).get(),
        ];
        let arguments = scope.local(vm.make_tuple_with(&args).unwrap());
        let coroutine = scope.local(
            vm.make_coroutine(function.get(), arguments.get()).unwrap(),
        );
        vm.coroutine_start(coroutine.get()).unwrap();
    }

    vm.run_ready().unwrap();
    assert_eq!(*lines.borrow(), vec!["a1", "b1", "a2", "b2"]);
}

// --- linking and initialization --------------------------------------------

#[test]
fn test_import_resolves_to_loaded_module() {
    // lib: export func one() { return 1; }
    let mut lib_fn = FunctionBuilder::new("one", 0, 0);
    lib_fn.load_int(1);
    lib_fn.op(Op::Return);
    let mut lib = ModuleBuilder::new("lib");
    lib.exported_function(lib_fn.finish());

    // app: import lib; export func use_lib() { return lib.one(); }
    let mut app = ModuleBuilder::new("app");
    let lib_import = app.import("lib");
    let one = app.symbol("one");
    let mut app_fn = FunctionBuilder::new("use_lib", 0, 0);
    app_fn.op_u32(Op::LoadModule, lib_import);
    app_fn.op_u32(Op::LoadMethod, one);
    app_fn.op_u32(Op::CallMethod, 0);
    app_fn.op(Op::Return);
    app.exported_function(app_fn.finish());

    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    vm.load_module(&lib.finish()).unwrap();
    vm.load_module(&app.finish()).unwrap();

    let result = scope.local(run_loaded_export(&mut vm, &scope, "app", "use_lib", &[]));
    assert_eq!(expect_success_int(&mut vm, result.get()), 1);
}

#[test]
fn test_missing_import_reports_module_not_found() {
    let mut m = ModuleBuilder::new("lonely");
    m.import("missing");
    let mut f = FunctionBuilder::new("f", 0, 0);
    f.op(Op::LoadNull);
    f.op(Op::Return);
    m.exported_function(f.finish());

    let mut vm = new_vm();
    vm.load_module(&m.finish()).unwrap();
    let err = vm.get_export("lonely", "f").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleNotFound);
}

#[test]
fn test_duplicate_module_name_rejected() {
    let mut f = FunctionBuilder::new("f", 0, 0);
    f.op(Op::LoadNull);
    f.op(Op::Return);
    let mut m = ModuleBuilder::new("dup");
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    vm.load_module(&data).unwrap();
    let err = vm.load_module(&data).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleExists);
}

#[test]
fn test_cyclic_imports_rejected() {
    fn dummy_export(m: &mut ModuleBuilder) {
        let mut f = FunctionBuilder::new("f", 0, 0);
        f.op(Op::LoadNull);
        f.op(Op::Return);
        m.exported_function(f.finish());
    }

    let mut a = ModuleBuilder::new("cycle_a");
    a.import("cycle_b");
    dummy_export(&mut a);

    let mut b = ModuleBuilder::new("cycle_b");
    b.import("cycle_a");
    dummy_export(&mut b);

    let mut vm = new_vm();
    vm.load_module(&a.finish()).unwrap();
    vm.load_module(&b.finish()).unwrap();

    let err = vm.get_export("cycle_a", "f").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadState);
    assert!(err.message().contains("cycle"), "{}", err.message());
}

#[test]
fn test_module_initializer_runs_once_before_export_access() {
    // var counter; init: counter = 42
    let mut m = ModuleBuilder::new("inits");
    let counter = m.variable("counter", None);
    let mut boot = FunctionBuilder::new("boot", 0, 0);
    boot.load_int(42);
    boot.op_u32(Op::StoreModule, counter);
    boot.op(Op::LoadNull);
    boot.op(Op::Return);
    let boot_index = m.function(boot.finish());
    m.initializer(boot_index);
    m.export("counter", counter);
    let data = m.finish();

    let mut vm = new_vm();
    vm.load_module(&data).unwrap();
    let value = vm.get_export("inits", "counter").unwrap();
    assert_eq!(vm.integer_value(value).unwrap(), 42);
}

#[test]
fn test_failing_initializer_fails_module_load() {
    let mut m = ModuleBuilder::new("broken");
    let std_import = m.import("std");
    let panic = m.symbol("panic");
    let message = m.string("init exploded");

    let mut boot = FunctionBuilder::new("boot", 0, 0);
    emit_std_call_member(&mut boot, std_import, panic, Some(message));
    boot.op(Op::Return);
    let boot_index = m.function(boot.finish());
    m.initializer(boot_index);

    let mut f = FunctionBuilder::new("f", 0, 0);
    f.op(Op::LoadNull);
    f.op(Op::Return);
    m.exported_function(f.finish());

    let mut vm = new_vm();
    vm.load_module(&m.finish()).unwrap();
    let err = vm.get_export("broken", "f").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadState);
    assert!(err.message().contains("init exploded"), "{}", err.message());
}

#[test]
fn test_yielding_initializer_fails_module_load() {
    // Initializers run synchronously; a yield must fail the load rather
    // than re-enter the scheduler.
    let mut m = ModuleBuilder::new("yieldy");
    let std_import = m.import("std");
    let yield_sym = m.symbol("yield_coroutine");

    let mut boot = FunctionBuilder::new("boot", 0, 0);
    emit_std_call_member(&mut boot, std_import, yield_sym, None);
    boot.op(Op::Pop);
    boot.op(Op::LoadNull);
    boot.op(Op::Return);
    let boot_index = m.function(boot.finish());
    m.initializer(boot_index);

    let mut f = FunctionBuilder::new("f", 0, 0);
    f.op(Op::LoadNull);
    f.op(Op::Return);
    m.exported_function(f.finish());

    let mut vm = new_vm();
    vm.load_module(&m.finish()).unwrap();
    let err = vm.get_export("yieldy", "f").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadState);
    // The abandoned initializer must not linger on the ready queue.
    assert!(!vm.has_ready());
}

#[test]
fn test_native_module_export_law() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let bound = scope.local(vm.make_integer(42).unwrap());
    let module = scope.local(
        vm.make_module("host", &[("answer", bound.get())]).unwrap(),
    );

    let exported = vm.module_get_export(module.get(), "answer").unwrap();
    assert!(vm.same(exported, bound.get()));

    let err = vm.module_get_export(module.get(), "missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExportNotFound);
}

#[test]
fn test_get_export_unknown_module_and_name() {
    let mut vm = new_vm();
    assert_eq!(
        vm.get_export("nope", "f").unwrap_err().kind(),
        ErrorKind::ModuleNotFound
    );
    assert_eq!(
        vm.get_export("std", "not_a_builtin").unwrap_err().kind(),
        ErrorKind::ExportNotFound
    );
}

#[test]
fn test_panic_stack_trace_when_enabled() {
    let mut m = ModuleBuilder::new("traced");
    let std_import = m.import("std");
    let panic = m.symbol("panic");
    let message = m.string("with trace");

    let mut inner = FunctionBuilder::new("inner", 0, 0);
    emit_std_call_member(&mut inner, std_import, panic, Some(message));
    inner.op(Op::Return);
    let inner_index = m.function(inner.finish());

    let mut outer = FunctionBuilder::new("outer", 0, 0);
    outer.op_u32(Op::LoadModule, inner_index);
    outer.op_u32(Op::Call, 0);
    outer.op(Op::Return);
    m.exported_function(outer.finish());
    let data = m.finish();

    let mut vm = Vm::with_settings(rill_runtime::VmSettings {
        enable_panic_stack_trace: true,
        ..Default::default()
    })
    .unwrap();
    vm.load_std().unwrap();

    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "outer", &[]));
    assert!(vm.result_is_error(result.get()).unwrap());
    let exception = vm.result_error(result.get()).unwrap();
    let trace = vm.exception_trace(exception).unwrap().expect("trace captured");
    assert!(trace.contains("inner"), "{trace}");
    assert!(trace.contains("outer"), "{trace}");
}

#[test]
fn test_launch_runs_sibling_coroutine() {
    // export func spawn_and_return() { std.launch(worker); return 1; }
    // worker prints "worked".
    let mut m = ModuleBuilder::new("spawner");
    let std_import = m.import("std");
    let print = m.symbol("print");
    let launch = m.symbol("launch");
    let text = m.string("worked");

    let mut worker = FunctionBuilder::new("worker", 0, 0);
    emit_std_call_member(&mut worker, std_import, print, Some(text));
    worker.op(Op::Pop);
    worker.op(Op::LoadNull);
    worker.op(Op::Return);
    let worker_index = m.function(worker.finish());

    let mut f = FunctionBuilder::new("spawn_and_return", 0, 0);
    f.op_u32(Op::LoadModule, std_import);
    f.op_u32(Op::LoadMethod, launch);
    f.op_u32(Op::LoadModule, worker_index);
    f.op_u32(Op::CallMethod, 1);
    f.op(Op::Pop);
    f.load_int(1);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = new_vm();
    let lines: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink_lines = Rc::clone(&lines);
    vm.set_print_stdout(Box::new(move |text| {
        sink_lines.borrow_mut().push(text.trim_end().to_string());
    }));

    let scope = Scope::new(&vm);
    let result = scope.local(run_export(&mut vm, &scope, &data, "spawn_and_return", &[]));
    assert_eq!(expect_success_int(&mut vm, result.get()), 1);
    // run_ready drained the launched coroutine in the same invocation.
    assert_eq!(*lines.borrow(), vec!["worked"]);
}

#[test]
fn test_gc_survives_deep_interpreter_allocation() {
    // Allocate thousands of short-lived strings through the formatter in
    // a loop; a small heap forces collections while frames are live.
    let mut m = ModuleBuilder::new("churn");
    let chunk = m.string("chunk of text ");

    let mut f = FunctionBuilder::new("spin", 1, 1);
    let head = f.label();
    let end = f.label();
    f.load_int(0);
    f.op_u32(Op::StoreLocal, 0);
    f.bind(head);
    f.op_u32(Op::LoadLocal, 0);
    f.op_u32(Op::LoadParam, 0);
    f.op(Op::Lt);
    f.branch(Op::JmpFalse, end);
    // Build and discard a formatted string.
    f.op(Op::Formatter);
    f.op_u32(Op::LoadModule, chunk);
    f.op(Op::AppendFormat);
    f.op_u32(Op::LoadLocal, 0);
    f.op(Op::AppendFormat);
    f.op(Op::FormatResult);
    f.op(Op::Pop);
    // i += 1
    f.op_u32(Op::LoadLocal, 0);
    f.load_int(1);
    f.op(Op::Add);
    f.op_u32(Op::StoreLocal, 0);
    f.branch(Op::Jmp, head);
    f.bind(end);
    f.op_u32(Op::LoadLocal, 0);
    f.op(Op::Return);
    m.exported_function(f.finish());
    let data = m.finish();

    let mut vm = Vm::with_settings(rill_runtime::VmSettings {
        page_size: 1 << 16,
        max_heap_size: 1 << 22,
        ..Default::default()
    })
    .unwrap();
    vm.load_std().unwrap();

    let scope = Scope::new(&vm);
    let args = [vm.make_integer(5000).unwrap()];
    let result = scope.local(run_export(&mut vm, &scope, &data, "spin", &args));
    assert_eq!(expect_success_int(&mut vm, result.get()), 5000);
}
