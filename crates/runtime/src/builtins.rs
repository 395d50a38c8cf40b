//! Public types and the `std` module
//!
//! Public type objects carry the method tables consulted by method
//! dispatch (`value.method(...)`); they are created once per VM at
//! construction. The `std` module is the native standard library surface:
//! printing, result construction, panics, coroutine primitives and a few
//! math helpers. It also exports the public type objects under their
//! names.

use crate::error::{Error, VmResult};
use crate::natives::{MagicFn, NativeCallable, Panic, SyncContext, SyncFn, VARIADIC};
use crate::objects::array::{Array, Tuple};
use crate::objects::buffer::Buffer;
use crate::objects::hash_table::HashTable;
use crate::objects::number::{self, Number};
use crate::objects::record::Record;
use crate::objects::result::{Exception, ResultObject};
use crate::objects::string::{Str, StringBuilder};
use crate::scheduler;
use crate::types::{InternalKind, TypeObject};
use crate::value::{Kind, Value};
use crate::vm::Vm;

fn to_panic(ctx: &mut SyncContext<'_>, error: Error) -> Panic {
    let message = error.message().to_string();
    Panic::msg(ctx.vm(), &message)
}

// --- type builder ---------------------------------------------------------

/// Builds one public type object: an interned name plus a method table of
/// sync natives whose argument 0 is the receiver.
fn build_type(vm: &mut Vm, name: &str, methods: &[(&str, u32, SyncFn)]) -> VmResult<Value> {
    let name_value = vm.make_interned_string(name)?;
    let _name_root = vm.temp_root(name_value);
    let table = HashTable::new(vm)?;
    let _table_root = vm.temp_root(table);

    for (method_name, params, function) in methods {
        let symbol = vm.make_symbol(method_name)?;
        let _symbol_root = vm.temp_root(symbol);
        let function = vm.make_native_function(
            method_name,
            *params,
            0,
            Value::null(),
            NativeCallable::Sync(*function),
        )?;
        let _function_root = vm.temp_root(function);
        HashTable::try_from(table)
            .expect("still a table")
            .set(vm, symbol, function)?;
    }

    TypeObject::new(vm, name_value, table)
}

fn simple_type(vm: &mut Vm, name: &str) -> VmResult<Value> {
    build_type(vm, name, &[])
}

macro_rules! receiver {
    ($ctx:expr, $cast:path, $what:literal) => {{
        let receiver = $ctx.arg(0);
        match $cast(receiver) {
            Some(object) => object,
            None => return Err($ctx.panic(concat!("`this` is not ", $what))),
        }
    }};
}

// --- method implementations -----------------------------------------------

fn type_name(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, TypeObject::try_from, "a type");
    Ok(this.name())
}

fn string_size(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Str::try_from, "a string");
    let len = this.len() as i64;
    number::make_integer(ctx.vm(), len).map_err(|e| to_panic(ctx, e))
}

fn tuple_size(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Tuple::try_from, "a tuple");
    let len = this.len() as i64;
    number::make_integer(ctx.vm(), len).map_err(|e| to_panic(ctx, e))
}

fn buffer_size(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Buffer::try_from, "a buffer");
    let len = this.len() as i64;
    number::make_integer(ctx.vm(), len).map_err(|e| to_panic(ctx, e))
}

fn array_size(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Array::try_from, "an array");
    let len = this.len() as i64;
    number::make_integer(ctx.vm(), len).map_err(|e| to_panic(ctx, e))
}

fn array_append(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Array::try_from, "an array");
    let item = ctx.arg(1);
    this.push(ctx.vm(), item).map_err(|e| to_panic(ctx, e))?;
    Ok(Value::null())
}

fn array_pop(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Array::try_from, "an array");
    this.pop().map_err(|_| ctx.panic("pop on empty array"))
}

fn array_clear(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Array::try_from, "an array");
    this.clear();
    Ok(Value::null())
}

fn map_size(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, HashTable::try_from, "a map");
    let len = this.len() as i64;
    number::make_integer(ctx.vm(), len).map_err(|e| to_panic(ctx, e))
}

fn map_set(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, HashTable::try_from, "a map");
    let key = ctx.arg(1);
    let value = ctx.arg(2);
    this.set(ctx.vm(), key, value).map_err(|e| to_panic(ctx, e))?;
    Ok(Value::null())
}

fn map_get(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, HashTable::try_from, "a map");
    Ok(this.get(ctx.arg(1)).unwrap_or(Value::null()))
}

fn map_contains(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, HashTable::try_from, "a map");
    Ok(Value::from_bool(this.contains(ctx.arg(1))))
}

fn map_remove(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, HashTable::try_from, "a map");
    let key = ctx.arg(1);
    let removed = this.remove(ctx.vm(), key).map_err(|e| to_panic(ctx, e))?;
    Ok(Value::from_bool(removed))
}

fn map_clear(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, HashTable::try_from, "a map");
    this.clear();
    Ok(Value::null())
}

fn map_keys(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, HashTable::try_from, "a map");
    let mut keys = Vec::with_capacity(this.len());
    this.for_each(|k, _| keys.push(k));
    let array = Array::new(ctx.vm(), keys.len().max(1)).map_err(|e| to_panic(ctx, e))?;
    // The keys stay rooted through the receiver while the array grows.
    let array_ref = Array::try_from(array).expect("just created");
    for key in keys {
        array_ref.push(ctx.vm(), key).map_err(|e| to_panic(ctx, e))?;
    }
    Ok(array)
}

fn record_keys_method(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Record::try_from, "a record");
    Ok(this.schema().keys().value())
}

fn schema_keys(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, crate::objects::record::RecordSchema::try_from, "a record schema");
    Ok(this.keys().value())
}

fn builder_append(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, StringBuilder::try_from, "a string builder");
    for i in 1..ctx.arg_count() {
        let arg = ctx.arg(i);
        let text = match (Str::try_from(arg), StringBuilder::try_from(arg)) {
            (Some(s), _) => s.as_str().to_string(),
            (_, Some(b)) => b.as_str().to_string(),
            _ => return Err(ctx.panic("append accepts strings and string builders")),
        };
        this.append(ctx.vm(), &text).map_err(|e| to_panic(ctx, e))?;
    }
    Ok(Value::null())
}

fn builder_clear(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, StringBuilder::try_from, "a string builder");
    this.clear();
    Ok(Value::null())
}

fn builder_size(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, StringBuilder::try_from, "a string builder");
    let len = this.len() as i64;
    number::make_integer(ctx.vm(), len).map_err(|e| to_panic(ctx, e))
}

fn builder_to_str(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, StringBuilder::try_from, "a string builder");
    this.to_string_value(ctx.vm()).map_err(|e| to_panic(ctx, e))
}

fn result_is_success(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, ResultObject::try_from, "a result");
    Ok(Value::from_bool(this.is_success()))
}

fn result_is_error(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, ResultObject::try_from, "a result");
    Ok(Value::from_bool(this.is_error()))
}

fn result_value(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, ResultObject::try_from, "a result");
    this.success_value()
        .map_err(|_| ctx.panic("result does not hold a success value"))
}

fn result_error(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, ResultObject::try_from, "a result");
    this.error_value()
        .map_err(|_| ctx.panic("result does not hold an error value"))
}

fn exception_message(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Exception::try_from, "an exception");
    Ok(this.message())
}

fn exception_trace(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, Exception::try_from, "an exception");
    Ok(this.trace())
}

fn coroutine_name_method(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let this = receiver!(ctx, crate::objects::coroutine::Coroutine::try_from, "a coroutine");
    Ok(this.name())
}

/// Create the public type objects and register them in the type table.
pub(crate) fn init_public_types(vm: &mut Vm) -> VmResult<()> {
    use InternalKind as K;

    let set = |vm: &mut Vm, kinds: &[K], value: Value| {
        for &kind in kinds {
            vm.types.set_public_type(kind, value);
        }
    };

    let null_type = simple_type(vm, "Null")?;
    set(vm, &[K::Null], null_type);
    let boolean_type = simple_type(vm, "Boolean")?;
    set(vm, &[K::Boolean], boolean_type);
    let integer_type = simple_type(vm, "Integer")?;
    set(vm, &[K::SmallInt, K::HeapInt], integer_type);
    let float_type = simple_type(vm, "Float")?;
    set(vm, &[K::Float], float_type);
    let symbol_type = simple_type(vm, "Symbol")?;
    set(vm, &[K::Symbol], symbol_type);
    let module_type = simple_type(vm, "Module")?;
    set(vm, &[K::Module], module_type);
    let native_object_type = simple_type(vm, "NativeObject")?;
    set(vm, &[K::NativeObject], native_object_type);
    let native_pointer_type = simple_type(vm, "NativePointer")?;
    set(vm, &[K::NativePointer], native_pointer_type);
    let token_type = simple_type(vm, "CoroutineToken")?;
    set(vm, &[K::CoroutineToken], token_type);

    let string_type = build_type(vm, "String", &[("size", 1, string_size)])?;
    set(vm, &[K::String], string_type);

    let function_type = simple_type(vm, "Function")?;
    set(vm, &[K::Function, K::NativeFunction, K::BoundMethod], function_type);

    let tuple_type = build_type(vm, "Tuple", &[("size", 1, tuple_size)])?;
    set(vm, &[K::Tuple], tuple_type);

    let buffer_type = build_type(vm, "Buffer", &[("size", 1, buffer_size)])?;
    set(vm, &[K::Buffer], buffer_type);

    let array_type = build_type(
        vm,
        "Array",
        &[
            ("size", 1, array_size),
            ("append", 2, array_append),
            ("pop", 1, array_pop),
            ("clear", 1, array_clear),
        ],
    )?;
    set(vm, &[K::Array], array_type);

    let map_type = build_type(
        vm,
        "Map",
        &[
            ("size", 1, map_size),
            ("set", 3, map_set),
            ("get", 2, map_get),
            ("contains", 2, map_contains),
            ("remove", 2, map_remove),
            ("clear", 1, map_clear),
            ("keys", 1, map_keys),
        ],
    )?;
    set(vm, &[K::HashTable], map_type);

    let record_type = build_type(vm, "Record", &[("keys", 1, record_keys_method)])?;
    set(vm, &[K::Record], record_type);

    let schema_type = build_type(vm, "RecordSchema", &[("keys", 1, schema_keys)])?;
    set(vm, &[K::RecordSchema], schema_type);

    let builder_type = build_type(
        vm,
        "StringBuilder",
        &[
            ("append", VARIADIC, builder_append),
            ("clear", 1, builder_clear),
            ("size", 1, builder_size),
            ("to_str", 1, builder_to_str),
        ],
    )?;
    set(vm, &[K::StringBuilder], builder_type);

    let result_type = build_type(
        vm,
        "Result",
        &[
            ("is_success", 1, result_is_success),
            ("is_error", 1, result_is_error),
            ("value", 1, result_value),
            ("error", 1, result_error),
        ],
    )?;
    set(vm, &[K::Result], result_type);

    let exception_type = build_type(
        vm,
        "Exception",
        &[
            ("message", 1, exception_message),
            ("trace", 1, exception_trace),
        ],
    )?;
    set(vm, &[K::Exception], exception_type);

    let coroutine_type = build_type(vm, "Coroutine", &[("name", 1, coroutine_name_method)])?;
    set(vm, &[K::Coroutine], coroutine_type);

    let type_type = build_type(vm, "Type", &[("name", 1, type_name)])?;
    set(vm, &[K::Type], type_type);

    Ok(())
}

// --- std functions --------------------------------------------------------

fn std_print(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let mut line = String::new();
    for i in 0..ctx.arg_count() {
        if i > 0 {
            line.push(' ');
        }
        let arg = ctx.arg(i);
        let text = ctx.vm().to_display_string(arg).map_err(|e| to_panic(ctx, e))?;
        line.push_str(&text);
    }
    line.push('\n');

    let vm = ctx.vm();
    match vm.print_stdout.as_mut() {
        Some(sink) => sink(&line),
        None => print!("{line}"),
    }
    Ok(Value::null())
}

fn std_debug_repr(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let arg = ctx.arg(0);
    let text = ctx.vm().debug_repr(arg).map_err(|e| to_panic(ctx, e))?;
    Str::new(ctx.vm(), &text).map_err(|e| to_panic(ctx, e))
}

fn std_to_string(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let arg = ctx.arg(0);
    let text = ctx.vm().to_display_string(arg).map_err(|e| to_panic(ctx, e))?;
    Str::new(ctx.vm(), &text).map_err(|e| to_panic(ctx, e))
}

fn std_type_of(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let arg = ctx.arg(0);
    ctx.vm()
        .type_of(arg)
        .map_err(|_| ctx.panic("value has no public type"))
}

fn std_success(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let arg = ctx.arg(0);
    ResultObject::success(ctx.vm(), arg).map_err(|e| to_panic(ctx, e))
}

fn std_error(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let arg = ctx.arg(0);
    ResultObject::error(ctx.vm(), arg).map_err(|e| to_panic(ctx, e))
}

fn std_panic(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let arg = ctx.arg(0);
    // Panicking with an exception value rethrows it unchanged; any other
    // value becomes the message of a fresh exception.
    if Exception::try_from(arg).is_some() {
        return Err(Panic::from_value(arg));
    }
    let message = match Str::try_from(arg) {
        Some(s) => s.as_str().to_string(),
        None => ctx
            .vm()
            .to_display_string(arg)
            .unwrap_or_else(|_| "<panic>".to_string()),
    };
    Err(ctx.panic(&message))
}

fn std_launch(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let function = ctx.arg(0);
    let coroutine =
        scheduler::make_coroutine(ctx.vm(), function, Value::null()).map_err(|e| to_panic(ctx, e))?;
    let _coroutine_root = ctx.vm().temp_root(coroutine);
    scheduler::start_coroutine(ctx.vm(), coroutine).map_err(|e| to_panic(ctx, e))?;
    Ok(coroutine)
}

fn std_current_coroutine(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    Ok(ctx.coroutine())
}

fn std_coroutine_token(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let coroutine = ctx.coroutine();
    scheduler::coroutine_token(ctx.vm(), coroutine).map_err(|e| to_panic(ctx, e))
}

fn std_new_string_builder(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    StringBuilder::new(ctx.vm()).map_err(|e| to_panic(ctx, e))
}

fn std_new_buffer(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let size = number::extract_integer(ctx.arg(0))
        .filter(|&size| size >= 0)
        .ok_or_else(|| ctx.panic("buffer size must be a non-negative integer"))?;
    Buffer::new(ctx.vm(), size as usize).map_err(|e| to_panic(ctx, e))
}

fn std_new_array(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    Array::new(ctx.vm(), 0).map_err(|e| to_panic(ctx, e))
}

fn std_new_record_schema(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let keys = ctx.arg(0);
    ctx.vm()
        .make_record_schema(keys)
        .map_err(|e| to_panic(ctx, e))
}

fn std_new_record(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let schema = ctx.arg(0);
    Record::new(ctx.vm(), schema).map_err(|e| to_panic(ctx, e))
}

fn number_arg(ctx: &mut SyncContext<'_>, index: usize) -> Result<Number, Panic> {
    number::extract_number(ctx.arg(index)).ok_or_else(|| ctx.panic("expected a number"))
}

fn std_abs(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    match number_arg(ctx, 0)? {
        Number::Int(i) => {
            let value = i
                .checked_abs()
                .ok_or_else(|| ctx.panic("integer overflow"))?;
            number::make_integer(ctx.vm(), value).map_err(|e| to_panic(ctx, e))
        }
        Number::Float(f) => number::Float::new(ctx.vm(), f.abs()).map_err(|e| to_panic(ctx, e)),
    }
}

fn float_arg(ctx: &mut SyncContext<'_>, index: usize) -> Result<f64, Panic> {
    Ok(match number_arg(ctx, index)? {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    })
}

fn std_pow(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let x = float_arg(ctx, 0)?;
    let y = float_arg(ctx, 1)?;
    number::Float::new(ctx.vm(), x.powf(y)).map_err(|e| to_panic(ctx, e))
}

fn std_sqrt(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let x = float_arg(ctx, 0)?;
    number::Float::new(ctx.vm(), x.sqrt()).map_err(|e| to_panic(ctx, e))
}

fn std_floor(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let x = float_arg(ctx, 0)?;
    number::Float::new(ctx.vm(), x.floor()).map_err(|e| to_panic(ctx, e))
}

fn std_ceil(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let x = float_arg(ctx, 0)?;
    number::Float::new(ctx.vm(), x.ceil()).map_err(|e| to_panic(ctx, e))
}

fn std_round(ctx: &mut SyncContext<'_>) -> Result<Value, Panic> {
    let x = float_arg(ctx, 0)?;
    number::Float::new(ctx.vm(), x.round()).map_err(|e| to_panic(ctx, e))
}

/// Build and register the `std` module.
pub(crate) fn load_std(vm: &mut Vm) -> VmResult<()> {
    let scope = crate::handles::Scope::new(vm);

    struct Entry {
        name: &'static str,
        value: crate::handles::Local,
    }
    let mut entries: Vec<Entry> = Vec::new();

    let add_sync = |vm: &mut Vm, entries: &mut Vec<Entry>, name: &'static str, params: u32, f: SyncFn| -> VmResult<()> {
        let function = vm.make_native_function(name, params, 0, Value::null(), NativeCallable::Sync(f))?;
        entries.push(Entry {
            name,
            value: scope.local(function),
        });
        Ok(())
    };

    add_sync(vm, &mut entries, "print", VARIADIC, std_print)?;
    add_sync(vm, &mut entries, "debug_repr", 1, std_debug_repr)?;
    add_sync(vm, &mut entries, "to_string", 1, std_to_string)?;
    add_sync(vm, &mut entries, "type_of", 1, std_type_of)?;
    add_sync(vm, &mut entries, "success", 1, std_success)?;
    add_sync(vm, &mut entries, "error", 1, std_error)?;
    add_sync(vm, &mut entries, "panic", 1, std_panic)?;
    add_sync(vm, &mut entries, "launch", 1, std_launch)?;
    add_sync(vm, &mut entries, "current_coroutine", 0, std_current_coroutine)?;
    add_sync(vm, &mut entries, "coroutine_token", 0, std_coroutine_token)?;
    add_sync(vm, &mut entries, "new_string_builder", 0, std_new_string_builder)?;
    add_sync(vm, &mut entries, "new_buffer", 1, std_new_buffer)?;
    add_sync(vm, &mut entries, "new_array", 0, std_new_array)?;
    add_sync(vm, &mut entries, "new_record_schema", 1, std_new_record_schema)?;
    add_sync(vm, &mut entries, "new_record", 1, std_new_record)?;
    add_sync(vm, &mut entries, "abs", 1, std_abs)?;
    add_sync(vm, &mut entries, "pow", 2, std_pow)?;
    add_sync(vm, &mut entries, "sqrt", 1, std_sqrt)?;
    add_sync(vm, &mut entries, "floor", 1, std_floor)?;
    add_sync(vm, &mut entries, "ceil", 1, std_ceil)?;
    add_sync(vm, &mut entries, "round", 1, std_round)?;

    // Interpreter-level primitives.
    for (name, params, magic) in [
        ("yield_coroutine", 0u32, MagicFn::Yield),
        ("dispatch", 0, MagicFn::Dispatch),
        ("catch_panic", 1, MagicFn::CatchPanic),
    ] {
        let function =
            vm.make_native_function(name, params, 0, Value::null(), NativeCallable::Magic(magic))?;
        entries.push(Entry {
            name,
            value: scope.local(function),
        });
    }

    // Export the public type objects under their names.
    for (name, kind) in [
        ("Null", Kind::Null),
        ("Boolean", Kind::Boolean),
        ("Integer", Kind::Integer),
        ("Float", Kind::Float),
        ("String", Kind::String),
        ("Symbol", Kind::Symbol),
        ("Function", Kind::Function),
        ("Tuple", Kind::Tuple),
        ("Record", Kind::Record),
        ("Array", Kind::Array),
        ("Result", Kind::Result),
        ("Exception", Kind::Exception),
        ("Coroutine", Kind::Coroutine),
        ("Module", Kind::Module),
        ("Type", Kind::Type),
        ("Buffer", Kind::Buffer),
        ("Map", Kind::HashTable),
        ("StringBuilder", Kind::StringBuilder),
    ] {
        let type_object = vm.kind_to_type(kind)?;
        debug_assert!(TypeObject::try_from(type_object).is_some());
        entries.push(Entry {
            name,
            value: scope.local(type_object),
        });
    }

    let members: Vec<(&str, Value)> = entries
        .iter()
        .map(|entry| (entry.name, entry.value.get()))
        .collect();
    let module = crate::modules::make_native_module(vm, "std", &members)?;
    let _module_root = vm.temp_root(module);
    crate::modules::register_module(vm, module)
}
