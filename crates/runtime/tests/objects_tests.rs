//! Object model and embedding API tests: construction round-trips,
//! identity/equality laws, container invariants, boundary behavior and
//! collector interaction.

use rill_runtime::{ErrorKind, Global, Kind, Scope, Value, Vm};

fn new_vm() -> Vm {
    Vm::new().expect("vm construction succeeds")
}

#[test]
fn test_primitive_round_trips() {
    let mut vm = new_vm();

    assert!(vm.make_null().is_null());
    assert_eq!(vm.boolean_value(vm.make_boolean(true)).unwrap(), true);
    assert_eq!(vm.boolean_value(vm.make_boolean(false)).unwrap(), false);

    for n in [0i64, 1, -1, 4711, i64::MAX, i64::MIN, i64::MAX / 2] {
        let value = vm.make_integer(n).unwrap();
        assert_eq!(vm.integer_value(value).unwrap(), n);
        assert_eq!(value.kind(), Kind::Integer);
    }

    for x in [0.0f64, -1.5, f64::INFINITY, f64::MIN_POSITIVE] {
        let value = vm.make_float(x).unwrap();
        assert_eq!(vm.float_value(value).unwrap(), x);
    }

    // NaN round-trips bit-identically (no canonicalization).
    let nan = f64::from_bits(0x7ff8_dead_beef_0001);
    let value = vm.make_float(nan).unwrap();
    assert_eq!(vm.float_value(value).unwrap().to_bits(), nan.to_bits());
}

#[test]
fn test_string_round_trip_and_unicode() {
    let mut vm = new_vm();
    for text in ["", "hello", "grüße", "日本語のテキスト", "a\0b"] {
        let value = vm.make_string(text).unwrap();
        assert_eq!(vm.string_value(value).unwrap(), text);
        assert_eq!(value.kind(), Kind::String);
    }
}

#[test]
fn test_same_is_identity_not_equality() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let a = scope.local(vm.make_string("twin").unwrap());
    let b = scope.local(vm.make_string("twin").unwrap());
    // Equal contents, distinct objects.
    assert_eq!(
        vm.string_value(a.get()).unwrap(),
        vm.string_value(b.get()).unwrap()
    );
    assert!(!vm.same(a.get(), b.get()));
    assert!(vm.same(a.get(), a.get()));

    // same(a, b) implies kind(a) == kind(b) trivially; sanity check the
    // negative direction is not implied.
    assert_eq!(a.get().kind(), b.get().kind());
}

#[test]
fn test_interning_law() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let a = scope.local(vm.make_interned_string("unique-intern").unwrap());
    let b = scope.local(vm.make_interned_string("unique-intern").unwrap());
    let c = scope.local(vm.make_interned_string("other-intern").unwrap());

    assert!(vm.same(a.get(), b.get()));
    assert!(!vm.same(a.get(), c.get()));

    // Interning an equal plain string yields the canonical object.
    let plain = scope.local(vm.make_string("unique-intern").unwrap());
    let interned = vm.intern_string(plain.get()).unwrap();
    assert!(vm.same(interned, a.get()));
}

#[test]
fn test_symbols_are_identity_interned() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let a = scope.local(vm.make_symbol("name").unwrap());
    let b = scope.local(vm.make_symbol("name").unwrap());
    let c = scope.local(vm.make_symbol("other").unwrap());

    assert!(vm.same(a.get(), b.get()));
    assert!(!vm.same(a.get(), c.get()));
    assert_eq!(vm.symbol_name(a.get()).unwrap(), "name");
    assert_eq!(a.get().kind(), Kind::Symbol);
}

#[test]
fn test_tuple_initial_values_law() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let items = [
        scope.local(vm.make_integer(1).unwrap()),
        scope.local(vm.make_string("two").unwrap()),
        scope.local(vm.make_boolean(true)),
    ];
    let values: Vec<Value> = items.iter().map(|local| local.get()).collect();
    let tuple = scope.local(vm.make_tuple_with(&values).unwrap());

    assert_eq!(vm.tuple_len(tuple.get()).unwrap(), 3);
    for (i, item) in items.iter().enumerate() {
        assert!(vm.same(vm.tuple_get(tuple.get(), i).unwrap(), item.get()));
    }

    // Slots are mutable.
    vm.tuple_set(tuple.get(), 0, vm.make_null()).unwrap();
    assert!(vm.tuple_get(tuple.get(), 0).unwrap().is_null());
}

#[test]
fn test_tuple_out_of_bounds() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let tuple = scope.local(vm.make_tuple(2).unwrap());

    let err = vm.tuple_get(tuple.get(), 2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBounds);
    let err = vm.tuple_set(tuple.get(), 9, Value::null()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBounds);
}

#[test]
fn test_record_schema_and_fields() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let schema = scope.local(vm.record_schema_from_names(&["x", "y"]).unwrap());
    let record = scope.local(vm.make_record(schema.get()).unwrap());

    // keys() preserves schema order.
    let keys = scope.local(vm.record_keys(record.get()).unwrap());
    assert_eq!(vm.tuple_len(keys.get()).unwrap(), 2);
    assert_eq!(
        vm.symbol_name(vm.tuple_get(keys.get(), 0).unwrap()).unwrap(),
        "x"
    );
    assert_eq!(
        vm.symbol_name(vm.tuple_get(keys.get(), 1).unwrap()).unwrap(),
        "y"
    );

    let x = scope.local(vm.make_symbol("x").unwrap());
    assert!(vm.record_get(record.get(), x.get()).unwrap().is_null());

    let value = scope.local(vm.make_integer(17).unwrap());
    vm.record_set(record.get(), x.get(), value.get()).unwrap();
    assert!(vm.same(vm.record_get(record.get(), x.get()).unwrap(), value.get()));

    // Unknown keys report BAD_KEY; the key set itself is fixed.
    let z = scope.local(vm.make_symbol("z").unwrap());
    assert_eq!(
        vm.record_get(record.get(), z.get()).unwrap_err().kind(),
        ErrorKind::BadKey
    );
    assert_eq!(
        vm.record_set(record.get(), z.get(), value.get())
            .unwrap_err()
            .kind(),
        ErrorKind::BadKey
    );
}

#[test]
fn test_record_schema_rejects_non_string_keys() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let keys = scope.local(vm.make_tuple(1).unwrap());
    let number = vm.make_integer(1).unwrap();
    vm.tuple_set(keys.get(), 0, number).unwrap();

    let err = vm.make_record_schema(keys.get()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadType);
}

#[test]
fn test_record_schema_rejects_duplicate_keys() {
    let mut vm = new_vm();

    let err = vm.record_schema_from_names(&["a", "b", "a"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadArg);
}

#[test]
fn test_array_invariants() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let array = scope.local(vm.make_array(0).unwrap());

    for n in 0..100 {
        let old_len = vm.array_len(array.get()).unwrap();
        let value = scope.local(vm.make_integer(n).unwrap());
        vm.array_push(array.get(), value.get()).unwrap();
        assert_eq!(vm.array_len(array.get()).unwrap(), old_len + 1);
        assert!(vm.same(vm.array_get(array.get(), old_len).unwrap(), value.get()));
    }

    let before = vm.array_len(array.get()).unwrap();
    let popped = vm.array_pop(array.get()).unwrap();
    assert_eq!(vm.integer_value(popped).unwrap(), 99);
    assert_eq!(vm.array_len(array.get()).unwrap(), before - 1);

    vm.array_clear(array.get()).unwrap();
    assert_eq!(vm.array_len(array.get()).unwrap(), 0);
}

#[test]
fn test_array_boundaries() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let array = scope.local(vm.make_array(0).unwrap());

    assert_eq!(
        vm.array_get(array.get(), 0).unwrap_err().kind(),
        ErrorKind::OutOfBounds
    );
    assert_eq!(
        vm.array_pop(array.get()).unwrap_err().kind(),
        ErrorKind::OutOfBounds
    );
}

#[test]
fn test_hash_table_basic_laws() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let table = scope.local(vm.make_hash_table().unwrap());

    let key = scope.local(vm.make_string("k").unwrap());
    let value = scope.local(vm.make_integer(5).unwrap());

    assert!(!vm.hash_table_contains(table.get(), key.get()).unwrap());
    vm.hash_table_set(table.get(), key.get(), value.get()).unwrap();
    assert!(vm.hash_table_contains(table.get(), key.get()).unwrap());
    assert!(vm.same(
        vm.hash_table_get(table.get(), key.get()).unwrap().unwrap(),
        value.get()
    ));
    assert_eq!(vm.hash_table_len(table.get()).unwrap(), 1);

    // Structural key equality: an equal but distinct string finds the
    // entry, and an integer-valued float matches the integer key.
    let twin = scope.local(vm.make_string("k").unwrap());
    assert!(vm.hash_table_contains(table.get(), twin.get()).unwrap());

    let int_key = scope.local(vm.make_integer(7).unwrap());
    vm.hash_table_set(table.get(), int_key.get(), value.get()).unwrap();
    let float_key = scope.local(vm.make_float(7.0).unwrap());
    assert!(vm.hash_table_contains(table.get(), float_key.get()).unwrap());

    assert!(vm.hash_table_remove(table.get(), key.get()).unwrap());
    assert!(!vm.hash_table_contains(table.get(), key.get()).unwrap());
    assert!(!vm.hash_table_remove(table.get(), key.get()).unwrap());
    assert_eq!(vm.hash_table_len(table.get()).unwrap(), 1);
}

#[test]
fn test_hash_table_insert_remove_churn() {
    // Insert 1000, remove 600: the survivors stay reachable and iteration
    // enumerates exactly those 400, despite compaction.
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let table = scope.local(vm.make_hash_table().unwrap());

    for n in 0..1000i64 {
        let key = scope.local(vm.make_integer(n).unwrap());
        let value = scope.local(vm.make_integer(n * 10).unwrap());
        vm.hash_table_set(table.get(), key.get(), value.get()).unwrap();
    }
    assert_eq!(vm.hash_table_len(table.get()).unwrap(), 1000);

    for n in 0..600i64 {
        let key = scope.local(vm.make_integer(n).unwrap());
        assert!(vm.hash_table_remove(table.get(), key.get()).unwrap());
    }
    assert_eq!(vm.hash_table_len(table.get()).unwrap(), 400);

    for n in 0..1000i64 {
        let key = scope.local(vm.make_integer(n).unwrap());
        let contained = vm.hash_table_contains(table.get(), key.get()).unwrap();
        assert_eq!(contained, n >= 600, "key {n}");
        if contained {
            let got = vm.hash_table_get(table.get(), key.get()).unwrap().unwrap();
            assert_eq!(vm.integer_value(got).unwrap(), n * 10);
        }
    }

    // Iteration visits each live entry exactly once.
    let entries = vm.hash_table_entries(table.get()).unwrap();
    assert_eq!(entries.len(), 400);
    let mut seen: Vec<i64> = entries
        .iter()
        .map(|(k, _)| vm.integer_value(*k).unwrap())
        .collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 400);
    assert_eq!(seen.first(), Some(&600));
    assert_eq!(seen.last(), Some(&999));
}

#[test]
fn test_buffer_round_trip_and_bounds() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let buffer = scope.local(vm.make_buffer(16).unwrap());

    assert_eq!(vm.buffer_len(buffer.get()).unwrap(), 16);
    assert_eq!(vm.buffer_get(buffer.get(), 0).unwrap(), 0);

    vm.buffer_set(buffer.get(), 3, 0xab).unwrap();
    assert_eq!(vm.buffer_get(buffer.get(), 3).unwrap(), 0xab);

    vm.buffer_write(buffer.get(), 8, &[1, 2, 3]).unwrap();
    let bytes = vm.buffer_to_vec(buffer.get()).unwrap();
    assert_eq!(&bytes[8..11], &[1, 2, 3]);

    assert_eq!(
        vm.buffer_get(buffer.get(), 16).unwrap_err().kind(),
        ErrorKind::OutOfBounds
    );
    assert_eq!(
        vm.buffer_write(buffer.get(), 15, &[0, 0]).unwrap_err().kind(),
        ErrorKind::OutOfBounds
    );
}

#[test]
fn test_buffer_data_is_pinned_across_collections() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let buffer = scope.local(vm.make_buffer(64).unwrap());
    vm.buffer_set(buffer.get(), 0, 42).unwrap();

    let before = vm.buffer_data(buffer.get()).unwrap();
    vm.collect_garbage();
    let after = vm.buffer_data(buffer.get()).unwrap();

    assert_eq!(before, after);
    assert_eq!(vm.buffer_get(buffer.get(), 0).unwrap(), 42);
}

#[test]
fn test_result_laws() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let value = scope.local(vm.make_integer(9).unwrap());
    let success = scope.local(vm.make_success(value.get()).unwrap());
    assert!(vm.result_is_success(success.get()).unwrap());
    assert!(!vm.result_is_error(success.get()).unwrap());
    assert!(vm.same(vm.result_value(success.get()).unwrap(), value.get()));
    assert_eq!(
        vm.result_error(success.get()).unwrap_err().kind(),
        ErrorKind::BadState
    );

    let error = scope.local(vm.make_error(value.get()).unwrap());
    assert!(vm.result_is_error(error.get()).unwrap());
    assert!(!vm.result_is_success(error.get()).unwrap());
    assert!(vm.same(vm.result_error(error.get()).unwrap(), value.get()));
    assert_eq!(
        vm.result_value(error.get()).unwrap_err().kind(),
        ErrorKind::BadState
    );
}

#[test]
fn test_type_of_and_kind_to_type() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let value = scope.local(vm.make_integer(1).unwrap());
    let type_object = scope.local(vm.type_of(value.get()).unwrap());
    assert_eq!(type_object.get().kind(), Kind::Type);

    // Small and boxed integers share one public type.
    let boxed = scope.local(vm.make_integer(i64::MAX).unwrap());
    assert!(vm.same(vm.type_of(boxed.get()).unwrap(), type_object.get()));

    assert!(vm.same(vm.kind_to_type(Kind::Integer).unwrap(), type_object.get()));

    assert_eq!(
        vm.kind_to_type(Kind::Internal).unwrap_err().kind(),
        ErrorKind::BadArg
    );
}

#[test]
fn test_kind_stability_across_collections() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let values = [
        scope.local(vm.make_string("s").unwrap()),
        scope.local(vm.make_integer(i64::MAX).unwrap()),
        scope.local(vm.make_float(1.0).unwrap()),
        scope.local(vm.make_tuple(3).unwrap()),
        scope.local(vm.make_hash_table().unwrap()),
    ];
    let kinds: Vec<Kind> = values.iter().map(|v| v.get().kind()).collect();

    for _ in 0..3 {
        vm.collect_garbage();
    }

    for (local, kind) in values.iter().zip(kinds) {
        assert_eq!(local.get().kind(), kind);
    }
    assert_eq!(vm.string_value(values[0].get()).unwrap(), "s");
    assert_eq!(vm.integer_value(values[1].get()).unwrap(), i64::MAX);
}

#[test]
fn test_collector_reclaims_garbage_and_keeps_roots() {
    let mut vm = new_vm();

    // Build a keeper deep inside nested tuples, then drown it in garbage.
    let keeper = {
        let scope = Scope::new(&vm);
        let inner = scope.local(vm.make_string("keep me").unwrap());
        let tuple = scope.local(vm.make_tuple(1).unwrap());
        vm.tuple_set(tuple.get(), 0, inner.get()).unwrap();
        Global::new(&vm, tuple.get())
    };

    for round in 0..50 {
        let scope = Scope::new(&vm);
        for n in 0..100 {
            let _garbage = scope.local(
                vm.make_string(&format!("garbage {round}-{n}")).unwrap(),
            );
        }
    }
    vm.collect_garbage();

    let inner = vm.tuple_get(keeper.get(), 0).unwrap();
    assert_eq!(vm.string_value(inner).unwrap(), "keep me");
}

#[test]
fn test_global_handles_outlive_scopes() {
    let mut vm = new_vm();

    let global = {
        let scope = Scope::new(&vm);
        let value = scope.local(vm.make_string("global").unwrap());
        Global::new(&vm, value.get())
    };

    vm.collect_garbage();
    assert_eq!(vm.string_value(global.get()).unwrap(), "global");

    // Handles stay assignable.
    let other = vm.make_integer(3).unwrap();
    global.set(other);
    assert_eq!(vm.integer_value(global.get()).unwrap(), 3);
}

#[test]
fn test_span_handles() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);
    let span = scope.span(3);

    assert_eq!(span.len(), 3);
    for i in 0..3 {
        let value = vm.make_integer(i as i64).unwrap();
        span.set(i, value);
    }
    vm.collect_garbage();
    for i in 0..3 {
        assert_eq!(vm.integer_value(span.get(i)).unwrap(), i as i64);
    }
}

#[test]
fn test_native_object_payload_and_finalizer() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_finalize(_data: *mut u8, _len: usize) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    let mut vm = new_vm();
    {
        let scope = Scope::new(&vm);
        let object = scope.local(
            vm.make_native_object(8, Some(count_finalize)).unwrap(),
        );
        assert_eq!(vm.native_object_len(object.get()).unwrap(), 8);

        let data = vm.native_object_data(object.get()).unwrap();
        unsafe {
            *data = 0x5a;
        }
        vm.collect_garbage();
        // Still rooted: payload intact, finalizer not run.
        let data = vm.native_object_data(object.get()).unwrap();
        unsafe {
            assert_eq!(*data, 0x5a);
        }
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 0);
    }

    // Unrooted now: the next collection finalizes exactly once.
    vm.collect_garbage();
    vm.collect_garbage();
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_native_object_finalized_at_teardown() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_finalize(_data: *mut u8, _len: usize) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    let vm_holder = {
        let mut vm = new_vm();
        let object = vm.make_native_object(4, Some(count_finalize)).unwrap();
        let _global = Global::new(&vm, object);
        vm
    };
    drop(vm_holder);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_native_pointer_round_trip() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let mut payload = 7u32;
    let raw = &mut payload as *mut u32 as *mut ();
    let pointer = scope.local(vm.make_native_pointer(raw).unwrap());
    assert_eq!(vm.native_pointer_value(pointer.get()).unwrap(), raw);
}

#[test]
fn test_display_and_debug_repr() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let int = vm.make_integer(42).unwrap();
    assert_eq!(vm.to_display_string(int).unwrap(), "42");
    assert_eq!(vm.to_display_string(Value::null()).unwrap(), "null");

    let string = scope.local(vm.make_string("hi").unwrap());
    assert_eq!(vm.to_display_string(string.get()).unwrap(), "hi");
    assert_eq!(vm.debug_repr(string.get()).unwrap(), "\"hi\"");

    let values = [vm.make_integer(1).unwrap(), vm.make_integer(2).unwrap()];
    let tuple = scope.local(vm.make_tuple_with(&values).unwrap());
    assert_eq!(vm.debug_repr(tuple.get()).unwrap(), "(1, 2)");

    let float = scope.local(vm.make_float(2.0).unwrap());
    assert_eq!(vm.to_display_string(float.get()).unwrap(), "2.0");
}

#[test]
fn test_exception_accessors() {
    let mut vm = new_vm();
    let scope = Scope::new(&vm);

    let exception = scope.local(vm.make_exception("it broke").unwrap());
    assert_eq!(exception.get().kind(), Kind::Exception);
    assert_eq!(vm.exception_message(exception.get()).unwrap(), "it broke");
    assert_eq!(vm.exception_trace(exception.get()).unwrap(), None);
}

#[test]
fn test_vms_are_isolated() {
    let mut vm1 = new_vm();
    let mut vm2 = new_vm();

    // Interning tables are per VM: equal names are not shared objects.
    let s1 = vm1.make_interned_string("shared-name").unwrap();
    let s2 = vm2.make_interned_string("shared-name").unwrap();
    assert!(!s1.same(s2));
}
