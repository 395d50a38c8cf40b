//! The virtual machine
//!
//! One [`Vm`] is one isolated runtime instance: heap, type tables, intern
//! tables, module registry, handle roots and scheduler state. Instances
//! share nothing; parallelism across instances is fine, but a single
//! instance is strictly single-threaded and performs no locking.
//!
//! The embedding API lives here as methods on `Vm`. Operations take and
//! return plain [`Value`]s; a value not reachable from a handle (or other
//! root) is only guaranteed to survive until the next allocating call, so
//! hosts root values through [`crate::handles`] before calling further
//! into the VM. Raw pointers obtained from buffers or native objects stay
//! valid across collections (the collector never relocates) but obviously
//! not past the death of their object.

use crate::error::{Error, ErrorKind, VmResult};
use crate::gc;
use crate::handles::{RootSet, TempRoot};
use crate::heap::{Header, Heap, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::natives::{AsyncFn, NativeCallable, ResumableFn, SyncFn};
use crate::objects::array::{Array, Tuple};
use crate::objects::buffer::Buffer;
use crate::objects::coroutine::Coroutine;
use crate::objects::function::NativeFunction;
use crate::objects::hash_table::HashTable;
use crate::objects::module::Module;
use crate::objects::native::{FinalizerFn, NativeObject, NativePointer};
use crate::objects::number::{self, extract_integer};
use crate::objects::record::{Record, RecordSchema};
use crate::objects::result::{Exception, ResultObject};
use crate::objects::string::{Str, Symbol};
use crate::types::{self, InternalKind, TypeTable};
use crate::value::{Kind, Value};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

const ERR_NOT_BOOL: Error = Error::new(ErrorKind::BadType, "expected a boolean");
const ERR_NOT_INT: Error = Error::new(ErrorKind::BadType, "expected an integer");
const ERR_NOT_FLOAT: Error = Error::new(ErrorKind::BadType, "expected a float");
const ERR_NOT_STRING: Error = Error::new(ErrorKind::BadType, "expected a string");
const ERR_NOT_SYMBOL: Error = Error::new(ErrorKind::BadType, "expected a symbol");
const ERR_NOT_TUPLE: Error = Error::new(ErrorKind::BadType, "expected a tuple");
const ERR_NOT_ARRAY: Error = Error::new(ErrorKind::BadType, "expected an array");
const ERR_NOT_RECORD: Error = Error::new(ErrorKind::BadType, "expected a record");
const ERR_NOT_TABLE: Error = Error::new(ErrorKind::BadType, "expected a hash table");
const ERR_NOT_BUFFER: Error = Error::new(ErrorKind::BadType, "expected a buffer");
const ERR_NOT_RESULT: Error = Error::new(ErrorKind::BadType, "expected a result");
const ERR_NOT_EXCEPTION: Error = Error::new(ErrorKind::BadType, "expected an exception");
const ERR_NOT_MODULE: Error = Error::new(ErrorKind::BadType, "expected a module");
const ERR_NOT_COROUTINE: Error = Error::new(ErrorKind::BadType, "expected a coroutine");

/// VM construction parameters.
#[derive(Debug, Clone)]
pub struct VmSettings {
    /// Heap page size; power of two in `[2^16, 2^24]`.
    pub page_size: usize,
    /// Total heap byte cap; `usize::MAX` means unbounded.
    pub max_heap_size: usize,
    /// Capture stack traces when panics unwind.
    pub enable_panic_stack_trace: bool,
}

impl Default for VmSettings {
    fn default() -> Self {
        VmSettings {
            page_size: 1 << 20,
            max_heap_size: 1 << 30,
            enable_panic_stack_trace: false,
        }
    }
}

impl VmSettings {
    fn validate(&self) -> VmResult<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(Error::new(
                ErrorKind::BadArg,
                "page size must be a power of two in [2^16, 2^24]",
            ));
        }
        if self.max_heap_size < self.page_size {
            return Err(Error::new(
                ErrorKind::BadArg,
                "max heap size must hold at least one page",
            ));
        }
        Ok(())
    }
}

/// Host sink for `std.print` output. Installed with
/// [`Vm::set_print_stdout`]; process stdout is used otherwise.
pub type PrintSink = Box<dyn FnMut(&str)>;

pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) types: TypeTable,
    roots: Rc<RootSet>,
    settings: VmSettings,
    id: u64,

    // Intrinsics (all rooted for the VM's lifetime).
    /// HashTable: string -> the canonical interned string.
    pub(crate) interned_strings: Value,
    /// HashTable: interned string -> symbol.
    pub(crate) symbols: Value,
    /// HashTable: interned string -> module.
    pub(crate) modules: Value,
    /// Preallocated exception for allocation failures inside panics.
    pub(crate) oom_exception: Value,

    // Scheduler state.
    pub(crate) ready_head: Value,
    pub(crate) ready_tail: Value,
    pub(crate) current: Value,
    /// Coroutines in `Waiting` state (kept alive even if the host holds
    /// no handle to them).
    pub(crate) suspended: Vec<Value>,

    gc_threshold: usize,
    pub(crate) coroutine_counter: u64,
    pub(crate) print_stdout: Option<PrintSink>,
}

impl Vm {
    pub fn new() -> VmResult<Vm> {
        Vm::with_settings(VmSettings::default())
    }

    pub fn with_settings(settings: VmSettings) -> VmResult<Vm> {
        settings.validate()?;
        let mut heap = Heap::new(settings.page_size, settings.max_heap_size);
        let types = TypeTable::bootstrap(&mut heap)?;
        let id = NEXT_VM_ID.fetch_add(1, Ordering::Relaxed);
        let gc_threshold = settings.page_size / 2;

        let mut vm = Vm {
            heap,
            types,
            roots: RootSet::new(id),
            settings,
            id,
            interned_strings: Value::null(),
            symbols: Value::null(),
            modules: Value::null(),
            oom_exception: Value::null(),
            ready_head: Value::null(),
            ready_tail: Value::null(),
            current: Value::null(),
            suspended: Vec::new(),
            gc_threshold,
            coroutine_counter: 0,
            print_stdout: None,
        };

        vm.interned_strings = HashTable::new(&mut vm)?;
        vm.symbols = HashTable::new(&mut vm)?;
        vm.modules = HashTable::new(&mut vm)?;

        let oom_message = Str::new(&mut vm, "out of memory")?;
        let _message_root = vm.temp_root(oom_message);
        vm.oom_exception = Exception::new(&mut vm, oom_message)?;
        drop(_message_root);

        crate::builtins::init_public_types(&mut vm)?;
        Ok(vm)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn settings(&self) -> &VmSettings {
        &self.settings
    }

    pub(crate) fn roots(&self) -> Rc<RootSet> {
        Rc::clone(&self.roots)
    }

    /// Redirect `std.print` output into a host sink.
    pub fn set_print_stdout(&mut self, sink: PrintSink) {
        self.print_stdout = Some(sink);
    }

    // --- allocation ------------------------------------------------------

    /// Allocate a raw object of `kind`. The caller must fully initialize
    /// every field before the next allocating operation; the collector
    /// traces objects by their header kind.
    pub(crate) fn alloc_raw(&mut self, kind: InternalKind, size: usize) -> VmResult<*mut Header> {
        if self.heap.live_estimate() + size > self.gc_threshold {
            gc::collect(self, "threshold");
        }
        let ptr = match self.heap.allocate(size) {
            Some(ptr) => ptr,
            None => {
                // Over the cap: collect once and retry before failing.
                gc::collect(self, "max heap");
                self.heap.allocate(size).ok_or(Error::alloc())?
            }
        };
        unsafe {
            (*ptr.as_ptr()).type_desc = self.types.descriptor(kind);
        }
        Ok(ptr.as_ptr())
    }

    /// Root `value` until the returned guard drops. Crate-internal helper
    /// for constructors that allocate between acquiring and storing a
    /// value.
    pub(crate) fn temp_root(&self, value: Value) -> TempRoot {
        TempRoot::new(&self.roots, value)
    }

    pub(crate) fn update_gc_threshold(&mut self, live_bytes: usize) {
        let floor = self.settings.page_size / 2;
        self.gc_threshold = (live_bytes * 2).clamp(floor, self.settings.max_heap_size);
    }

    /// Enumerate every root slot. This is the single place where the
    /// collector learns about mutator state.
    pub(crate) fn trace_roots(&self, f: &mut dyn FnMut(Value)) {
        self.types.trace_roots(f);
        f(self.interned_strings);
        f(self.symbols);
        f(self.modules);
        f(self.oom_exception);
        f(self.ready_head);
        f(self.ready_tail);
        f(self.current);
        for &value in &self.suspended {
            f(value);
        }
        self.roots.trace(f);
    }

    /// Force a full collection (for tests and memory-pressure hosts).
    pub fn collect_garbage(&mut self) {
        gc::collect(self, "requested");
    }

    // --- interning -------------------------------------------------------

    /// The canonical interned string for `text`. Byte-equal interned
    /// strings are pointer-equal.
    pub fn make_interned_string(&mut self, text: &str) -> VmResult<Value> {
        let probe = Str::new(self, text)?;
        let _probe_root = self.temp_root(probe);
        let table = HashTable::try_from(self.interned_strings).expect("intern table exists");
        if let Some(existing) = table.get(probe) {
            return Ok(existing);
        }
        Str::try_from(probe).unwrap().mark_interned();
        table.set(self, probe, probe)?;
        Ok(probe)
    }

    /// Interned version of an existing string value.
    pub fn intern_string(&mut self, value: Value) -> VmResult<Value> {
        let string = Str::try_from(value).ok_or(ERR_NOT_STRING)?;
        if string.is_interned() {
            return Ok(value);
        }
        let _value_root = self.temp_root(value);
        let table = HashTable::try_from(self.interned_strings).expect("intern table exists");
        if let Some(existing) = table.get(value) {
            return Ok(existing);
        }
        string.mark_interned();
        table.set(self, value, value)?;
        Ok(value)
    }

    /// The unique symbol named `name`.
    pub fn make_symbol(&mut self, name: &str) -> VmResult<Value> {
        let interned = self.make_interned_string(name)?;
        let _interned_root = self.temp_root(interned);
        let table = HashTable::try_from(self.symbols).expect("symbol table exists");
        if let Some(existing) = table.get(interned) {
            return Ok(existing);
        }
        let symbol = Symbol::new(self, interned)?;
        let _symbol_root = self.temp_root(symbol);
        table.set(self, interned, symbol)?;
        Ok(symbol)
    }

    // --- introspection ---------------------------------------------------

    pub fn kind(&self, value: Value) -> Kind {
        value.kind()
    }

    /// Identity: both values name the same immediate or object.
    pub fn same(&self, a: Value, b: Value) -> bool {
        a.same(b)
    }

    /// The public type object of a value. Internal kinds report `BadType`.
    pub fn type_of(&self, value: Value) -> VmResult<Value> {
        self.types.public_type(value.internal_kind())
    }

    /// The public type object for a kind.
    pub fn kind_to_type(&self, kind: Kind) -> VmResult<Value> {
        let internal = match kind {
            Kind::Null => InternalKind::Null,
            Kind::Boolean => InternalKind::Boolean,
            Kind::Integer => InternalKind::SmallInt,
            Kind::Float => InternalKind::Float,
            Kind::String => InternalKind::String,
            Kind::Symbol => InternalKind::Symbol,
            Kind::Function => InternalKind::Function,
            Kind::Tuple => InternalKind::Tuple,
            Kind::Record => InternalKind::Record,
            Kind::RecordSchema => InternalKind::RecordSchema,
            Kind::Array => InternalKind::Array,
            Kind::Result => InternalKind::Result,
            Kind::Exception => InternalKind::Exception,
            Kind::Coroutine => InternalKind::Coroutine,
            Kind::CoroutineToken => InternalKind::CoroutineToken,
            Kind::Module => InternalKind::Module,
            Kind::Type => InternalKind::Type,
            Kind::NativeObject => InternalKind::NativeObject,
            Kind::NativePointer => InternalKind::NativePointer,
            Kind::Buffer => InternalKind::Buffer,
            Kind::HashTable => InternalKind::HashTable,
            Kind::StringBuilder => InternalKind::StringBuilder,
            Kind::Internal => {
                return Err(Error::new(ErrorKind::BadArg, "internal kinds have no type"));
            }
        };
        self.types.public_type(internal)
    }

    /// Display form of a value (what `std.print` and string formatting
    /// produce).
    pub fn to_display_string(&mut self, value: Value) -> VmResult<String> {
        let mut out = String::new();
        self.display_into(&mut out, value, 0, false);
        Ok(out)
    }

    /// Structural debug representation.
    pub fn debug_repr(&mut self, value: Value) -> VmResult<String> {
        let mut out = String::new();
        self.display_into(&mut out, value, 0, true);
        Ok(out)
    }

    fn display_into(&mut self, out: &mut String, value: Value, depth: usize, debug: bool) {
        use std::fmt::Write;

        if depth > 8 {
            out.push_str("...");
            return;
        }
        if value.is_null() {
            out.push_str("null");
            return;
        }
        if let Some(b) = value.as_bool() {
            let _ = write!(out, "{b}");
            return;
        }
        if let Some(i) = extract_integer(value) {
            let _ = write!(out, "{i}");
            return;
        }
        if let Some(f) = number::extract_float(value) {
            let _ = write!(out, "{f:?}");
            return;
        }
        if let Some(s) = Str::try_from(value) {
            if debug {
                let _ = write!(out, "{:?}", s.as_str());
            } else {
                out.push_str(s.as_str());
            }
            return;
        }
        if let Some(symbol) = Symbol::try_from(value) {
            out.push('#');
            let name = symbol.name();
            if let Some(s) = Str::try_from(name) {
                out.push_str(s.as_str());
            }
            return;
        }
        match value.internal_kind() {
            InternalKind::Tuple => {
                let tuple = Tuple::try_from(value).unwrap();
                out.push('(');
                for i in 0..tuple.len() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let item = tuple.get(i).unwrap_or(Value::null());
                    self.display_into(out, item, depth + 1, true);
                }
                out.push(')');
            }
            InternalKind::Array => {
                let array = Array::try_from(value).unwrap();
                out.push('[');
                for i in 0..array.len() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let item = array.get(i).unwrap_or(Value::null());
                    self.display_into(out, item, depth + 1, true);
                }
                out.push(']');
            }
            InternalKind::HashTable => {
                let table = HashTable::try_from(value).unwrap();
                out.push('{');
                let mut entries = Vec::new();
                table.for_each(|k, v| entries.push((k, v)));
                for (i, (k, v)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.display_into(out, k, depth + 1, true);
                    out.push_str(": ");
                    self.display_into(out, v, depth + 1, true);
                }
                out.push('}');
            }
            InternalKind::Record => {
                let record = Record::try_from(value).unwrap();
                let keys = record.schema().keys();
                out.push('(');
                for i in 0..keys.len() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let key = keys.get(i).unwrap_or(Value::null());
                    self.display_into(out, key, depth + 1, true);
                    out.push_str(": ");
                    self.display_into(out, record.get_index(i), depth + 1, true);
                }
                out.push(')');
            }
            InternalKind::Result => {
                let result = ResultObject::try_from(value).unwrap();
                if result.is_success() {
                    out.push_str("success(");
                } else {
                    out.push_str("error(");
                }
                self.display_into(out, result.raw_value(), depth + 1, true);
                out.push(')');
            }
            InternalKind::Exception => {
                let exception = Exception::try_from(value).unwrap();
                out.push_str("exception: ");
                self.display_into(out, exception.message(), depth + 1, false);
            }
            other => {
                use std::fmt::Write;
                let _ = write!(out, "<{}>", other.name());
            }
        }
    }

    // --- primitives ------------------------------------------------------

    pub fn make_null(&self) -> Value {
        Value::null()
    }

    pub fn make_boolean(&self, value: bool) -> Value {
        Value::from_bool(value)
    }

    pub fn boolean_value(&self, value: Value) -> VmResult<bool> {
        value.as_bool().ok_or(ERR_NOT_BOOL)
    }

    pub fn make_integer(&mut self, value: i64) -> VmResult<Value> {
        number::make_integer(self, value)
    }

    pub fn integer_value(&self, value: Value) -> VmResult<i64> {
        extract_integer(value).ok_or(ERR_NOT_INT)
    }

    pub fn make_float(&mut self, value: f64) -> VmResult<Value> {
        number::Float::new(self, value)
    }

    pub fn float_value(&self, value: Value) -> VmResult<f64> {
        number::extract_float(value).ok_or(ERR_NOT_FLOAT)
    }

    pub fn make_string(&mut self, text: &str) -> VmResult<Value> {
        Str::new(self, text)
    }

    pub fn string_value(&self, value: Value) -> VmResult<String> {
        Ok(Str::try_from(value).ok_or(ERR_NOT_STRING)?.as_str().to_string())
    }

    pub fn symbol_name(&self, value: Value) -> VmResult<String> {
        let symbol = Symbol::try_from(value).ok_or(ERR_NOT_SYMBOL)?;
        self.string_value(symbol.name())
    }

    // --- buffers ---------------------------------------------------------

    pub fn make_buffer(&mut self, len: usize) -> VmResult<Value> {
        Buffer::new(self, len)
    }

    pub fn buffer_len(&self, value: Value) -> VmResult<usize> {
        Ok(Buffer::try_from(value).ok_or(ERR_NOT_BUFFER)?.len())
    }

    pub fn buffer_get(&self, value: Value, index: usize) -> VmResult<u8> {
        Buffer::try_from(value).ok_or(ERR_NOT_BUFFER)?.get(index)
    }

    pub fn buffer_set(&self, value: Value, index: usize, byte: u8) -> VmResult<()> {
        Buffer::try_from(value).ok_or(ERR_NOT_BUFFER)?.set(index, byte)
    }

    pub fn buffer_to_vec(&self, value: Value) -> VmResult<Vec<u8>> {
        let buffer = Buffer::try_from(value).ok_or(ERR_NOT_BUFFER)?;
        unsafe {
            Ok(std::slice::from_raw_parts(buffer.data(), buffer.len()).to_vec())
        }
    }

    pub fn buffer_write(&self, value: Value, offset: usize, bytes: &[u8]) -> VmResult<()> {
        let buffer = Buffer::try_from(value).ok_or(ERR_NOT_BUFFER)?;
        if offset.checked_add(bytes.len()).is_none_or(|end| end > buffer.len()) {
            return Err(Error::new(ErrorKind::OutOfBounds, "buffer write out of bounds"));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.data().add(offset), bytes.len());
        }
        Ok(())
    }

    /// Raw pointer to the buffer bytes. Pinned across collections, but
    /// invalid once the buffer is collected or the VM is destroyed.
    pub fn buffer_data(&self, value: Value) -> VmResult<*mut u8> {
        Ok(Buffer::try_from(value).ok_or(ERR_NOT_BUFFER)?.data())
    }

    // --- tuples ----------------------------------------------------------

    pub fn make_tuple(&mut self, len: usize) -> VmResult<Value> {
        Tuple::new(self, len)
    }

    /// Tuple from rooted values.
    pub fn make_tuple_with(&mut self, values: &[Value]) -> VmResult<Value> {
        Tuple::from_slice(self, values)
    }

    pub fn tuple_len(&self, value: Value) -> VmResult<usize> {
        Ok(Tuple::try_from(value).ok_or(ERR_NOT_TUPLE)?.len())
    }

    pub fn tuple_get(&self, value: Value, index: usize) -> VmResult<Value> {
        Tuple::try_from(value).ok_or(ERR_NOT_TUPLE)?.get(index)
    }

    pub fn tuple_set(&self, value: Value, index: usize, item: Value) -> VmResult<()> {
        Tuple::try_from(value).ok_or(ERR_NOT_TUPLE)?.set(index, item)
    }

    // --- records ---------------------------------------------------------

    /// Create a schema from a tuple of strings (the ordered key set).
    pub fn make_record_schema(&mut self, keys: Value) -> VmResult<Value> {
        let tuple = Tuple::try_from(keys).ok_or(ERR_NOT_TUPLE)?;
        let _keys_root = self.temp_root(keys);
        let symbols_value = Tuple::new(self, tuple.len())?;
        let _symbols_root = self.temp_root(symbols_value);
        for i in 0..tuple.len() {
            let key = self.tuple_get(keys, i)?;
            let name = Str::try_from(key)
                .ok_or(Error::new(ErrorKind::BadType, "schema keys must be strings"))?
                .as_str()
                .to_string();
            let symbol = self.make_symbol(&name)?;
            Tuple::try_from(symbols_value).unwrap().set(i, symbol)?;
        }
        RecordSchema::new(self, symbols_value)
    }

    /// Convenience: schema from Rust key names.
    pub fn record_schema_from_names(&mut self, names: &[&str]) -> VmResult<Value> {
        let tuple = Tuple::new(self, names.len())?;
        let _tuple_root = self.temp_root(tuple);
        for (i, name) in names.iter().enumerate() {
            let key = Str::new(self, name)?;
            Tuple::try_from(tuple).unwrap().set(i, key)?;
        }
        self.make_record_schema(tuple)
    }

    pub fn make_record(&mut self, schema: Value) -> VmResult<Value> {
        Record::new(self, schema)
    }

    /// Tuple of key symbols, in schema order.
    pub fn record_keys(&self, value: Value) -> VmResult<Value> {
        let record = Record::try_from(value).ok_or(ERR_NOT_RECORD)?;
        Ok(record.schema().keys().value())
    }

    pub fn record_get(&self, value: Value, key: Value) -> VmResult<Value> {
        let record = Record::try_from(value).ok_or(ERR_NOT_RECORD)?;
        Symbol::try_from(key).ok_or(ERR_NOT_SYMBOL)?;
        record.get(key)
    }

    pub fn record_set(&self, value: Value, key: Value, item: Value) -> VmResult<()> {
        let record = Record::try_from(value).ok_or(ERR_NOT_RECORD)?;
        Symbol::try_from(key).ok_or(ERR_NOT_SYMBOL)?;
        record.set(key, item)
    }

    // --- arrays ----------------------------------------------------------

    pub fn make_array(&mut self, initial_capacity: usize) -> VmResult<Value> {
        Array::new(self, initial_capacity)
    }

    pub fn array_len(&self, value: Value) -> VmResult<usize> {
        Ok(Array::try_from(value).ok_or(ERR_NOT_ARRAY)?.len())
    }

    pub fn array_get(&self, value: Value, index: usize) -> VmResult<Value> {
        Array::try_from(value).ok_or(ERR_NOT_ARRAY)?.get(index)
    }

    pub fn array_set(&self, value: Value, index: usize, item: Value) -> VmResult<()> {
        Array::try_from(value).ok_or(ERR_NOT_ARRAY)?.set(index, item)
    }

    pub fn array_push(&mut self, value: Value, item: Value) -> VmResult<()> {
        let array = Array::try_from(value).ok_or(ERR_NOT_ARRAY)?;
        array.push(self, item)
    }

    pub fn array_pop(&self, value: Value) -> VmResult<Value> {
        Array::try_from(value).ok_or(ERR_NOT_ARRAY)?.pop()
    }

    pub fn array_clear(&self, value: Value) -> VmResult<()> {
        Array::try_from(value).ok_or(ERR_NOT_ARRAY)?.clear();
        Ok(())
    }

    // --- hash tables -----------------------------------------------------

    pub fn make_hash_table(&mut self) -> VmResult<Value> {
        HashTable::new(self)
    }

    pub fn hash_table_len(&self, value: Value) -> VmResult<usize> {
        Ok(HashTable::try_from(value).ok_or(ERR_NOT_TABLE)?.len())
    }

    pub fn hash_table_set(&mut self, value: Value, key: Value, item: Value) -> VmResult<()> {
        let table = HashTable::try_from(value).ok_or(ERR_NOT_TABLE)?;
        table.set(self, key, item)
    }

    pub fn hash_table_get(&self, value: Value, key: Value) -> VmResult<Option<Value>> {
        Ok(HashTable::try_from(value).ok_or(ERR_NOT_TABLE)?.get(key))
    }

    pub fn hash_table_contains(&self, value: Value, key: Value) -> VmResult<bool> {
        Ok(HashTable::try_from(value).ok_or(ERR_NOT_TABLE)?.contains(key))
    }

    pub fn hash_table_remove(&mut self, value: Value, key: Value) -> VmResult<bool> {
        let table = HashTable::try_from(value).ok_or(ERR_NOT_TABLE)?;
        table.remove(self, key)
    }

    pub fn hash_table_clear(&self, value: Value) -> VmResult<()> {
        HashTable::try_from(value).ok_or(ERR_NOT_TABLE)?.clear();
        Ok(())
    }

    /// Snapshot of the live entries, in insertion order.
    pub fn hash_table_entries(&self, value: Value) -> VmResult<Vec<(Value, Value)>> {
        let table = HashTable::try_from(value).ok_or(ERR_NOT_TABLE)?;
        let mut entries = Vec::with_capacity(table.len());
        table.for_each(|k, v| entries.push((k, v)));
        Ok(entries)
    }

    // --- results and exceptions ------------------------------------------

    pub fn make_success(&mut self, value: Value) -> VmResult<Value> {
        ResultObject::success(self, value)
    }

    pub fn make_error(&mut self, value: Value) -> VmResult<Value> {
        ResultObject::error(self, value)
    }

    pub fn result_is_success(&self, value: Value) -> VmResult<bool> {
        Ok(ResultObject::try_from(value).ok_or(ERR_NOT_RESULT)?.is_success())
    }

    pub fn result_is_error(&self, value: Value) -> VmResult<bool> {
        Ok(ResultObject::try_from(value).ok_or(ERR_NOT_RESULT)?.is_error())
    }

    /// The success value; `BadState` if the result holds an error.
    pub fn result_value(&self, value: Value) -> VmResult<Value> {
        ResultObject::try_from(value).ok_or(ERR_NOT_RESULT)?.success_value()
    }

    /// The error value; `BadState` if the result holds a success.
    pub fn result_error(&self, value: Value) -> VmResult<Value> {
        ResultObject::try_from(value).ok_or(ERR_NOT_RESULT)?.error_value()
    }

    pub fn make_exception(&mut self, message: &str) -> VmResult<Value> {
        let text = Str::new(self, message)?;
        let _text_root = self.temp_root(text);
        Exception::new(self, text)
    }

    pub fn exception_message(&self, value: Value) -> VmResult<String> {
        let exception = Exception::try_from(value).ok_or(ERR_NOT_EXCEPTION)?;
        self.string_value(exception.message())
    }

    /// Stack trace text, if one was captured.
    pub fn exception_trace(&self, value: Value) -> VmResult<Option<String>> {
        let exception = Exception::try_from(value).ok_or(ERR_NOT_EXCEPTION)?;
        let trace = exception.trace();
        if trace.is_null() {
            Ok(None)
        } else {
            Ok(Some(self.string_value(trace)?))
        }
    }

    // --- native objects --------------------------------------------------

    pub fn make_native_object(
        &mut self,
        len: usize,
        finalizer: Option<FinalizerFn>,
    ) -> VmResult<Value> {
        NativeObject::new(self, len, finalizer)
    }

    pub fn native_object_len(&self, value: Value) -> VmResult<usize> {
        Ok(NativeObject::try_from(value)
            .ok_or(Error::new(ErrorKind::BadType, "expected a native object"))?
            .len())
    }

    /// Payload pointer; pinned across collections.
    pub fn native_object_data(&self, value: Value) -> VmResult<*mut u8> {
        Ok(NativeObject::try_from(value)
            .ok_or(Error::new(ErrorKind::BadType, "expected a native object"))?
            .data())
    }

    pub fn make_native_pointer(&mut self, ptr: *mut ()) -> VmResult<Value> {
        NativePointer::new(self, ptr)
    }

    pub fn native_pointer_value(&self, value: Value) -> VmResult<*mut ()> {
        Ok(NativePointer::try_from(value)
            .ok_or(Error::new(ErrorKind::BadType, "expected a native pointer"))?
            .get())
    }

    // --- native functions ------------------------------------------------

    pub fn make_sync_function(
        &mut self,
        name: &str,
        params: u32,
        closure: Value,
        function: SyncFn,
    ) -> VmResult<Value> {
        self.make_native_function(name, params, 0, closure, NativeCallable::Sync(function))
    }

    pub fn make_async_function(
        &mut self,
        name: &str,
        params: u32,
        closure: Value,
        function: AsyncFn,
    ) -> VmResult<Value> {
        self.make_native_function(name, params, 0, closure, NativeCallable::Async(function))
    }

    pub fn make_resumable_function(
        &mut self,
        name: &str,
        params: u32,
        locals: u32,
        closure: Value,
        function: ResumableFn,
    ) -> VmResult<Value> {
        self.make_native_function(name, params, locals, closure, NativeCallable::Resumable(function))
    }

    pub(crate) fn make_native_function(
        &mut self,
        name: &str,
        params: u32,
        locals: u32,
        closure: Value,
        callable: NativeCallable,
    ) -> VmResult<Value> {
        let _closure_root = self.temp_root(closure);
        let name_value = Str::new(self, name)?;
        let _name_root = self.temp_root(name_value);
        NativeFunction::new(self, name_value, closure, params, locals, callable)
    }

    // --- modules ---------------------------------------------------------

    /// Build a native module from `(export name, value)` pairs. The
    /// module is fully initialized; register it with
    /// [`Vm::register_module`] to make it importable.
    pub fn make_module(&mut self, name: &str, members: &[(&str, Value)]) -> VmResult<Value> {
        crate::modules::make_native_module(self, name, members)
    }

    /// Register a module object under its name. Fails with
    /// `MODULE_EXISTS` if the name is taken.
    pub fn register_module(&mut self, module: Value) -> VmResult<()> {
        crate::modules::register_module(self, module)
    }

    /// Load the `std` builtin module.
    pub fn load_std(&mut self) -> VmResult<()> {
        crate::builtins::load_std(self)
    }

    /// Load a validated bytecode module description.
    pub fn load_module(&mut self, data: &rill_core::ModuleData) -> VmResult<Value> {
        crate::modules::load_module(self, data)
    }

    /// Load a serialized bytecode module file.
    pub fn load_bytecode(&mut self, bytes: &[u8]) -> VmResult<Value> {
        let data = rill_core::ModuleData::from_bytes(bytes)
            .map_err(|e| Error::detailed(ErrorKind::BadSource, e.to_string()))?;
        crate::modules::load_module(self, &data)
    }

    pub fn module_name(&self, value: Value) -> VmResult<String> {
        let module = Module::try_from(value).ok_or(ERR_NOT_MODULE)?;
        self.string_value(module.name())
    }

    /// Look up an export on a module object, linking and initializing the
    /// module first if needed.
    pub fn module_get_export(&mut self, module: Value, name: &str) -> VmResult<Value> {
        Module::try_from(module).ok_or(ERR_NOT_MODULE)?;
        crate::modules::resolve_module(self, module)?;
        let symbol = self.make_symbol(name)?;
        Module::try_from(module).unwrap().get_export(symbol)
    }

    /// Look up an export by module name.
    pub fn get_export(&mut self, module_name: &str, export_name: &str) -> VmResult<Value> {
        let module = crate::modules::find_module(self, module_name)?
            .ok_or(Error::new(ErrorKind::ModuleNotFound, "module is not loaded"))?;
        self.module_get_export(module, export_name)
    }

    // --- coroutines & scheduling -----------------------------------------

    /// Create a coroutine closing over `function` and an optional argument
    /// tuple (null for none).
    pub fn make_coroutine(&mut self, function: Value, arguments: Value) -> VmResult<Value> {
        crate::scheduler::make_coroutine(self, function, arguments)
    }

    /// Move a `New` coroutine into the ready queue.
    pub fn coroutine_start(&mut self, coroutine: Value) -> VmResult<()> {
        crate::scheduler::start_coroutine(self, coroutine)
    }

    /// Install a completion callback, invoked exactly once when the
    /// coroutine finishes (it is dropped uninvoked at VM teardown). The
    /// callback must not capture unrooted VM values; use [`crate::handles::Global`]
    /// for values it needs.
    pub fn coroutine_set_callback(
        &mut self,
        coroutine: Value,
        callback: Box<dyn FnOnce(&mut Vm, Value)>,
    ) -> VmResult<()> {
        crate::scheduler::set_callback(self, coroutine, callback)
    }

    pub fn coroutine_started(&self, coroutine: Value) -> VmResult<bool> {
        Ok(Coroutine::try_from(coroutine).ok_or(ERR_NOT_COROUTINE)?.started())
    }

    pub fn coroutine_completed(&self, coroutine: Value) -> VmResult<bool> {
        Ok(Coroutine::try_from(coroutine).ok_or(ERR_NOT_COROUTINE)?.completed())
    }

    /// The coroutine's result object; `BadState` until completed.
    pub fn coroutine_result(&self, coroutine: Value) -> VmResult<Value> {
        let coroutine = Coroutine::try_from(coroutine).ok_or(ERR_NOT_COROUTINE)?;
        if !coroutine.completed() {
            return Err(Error::new(ErrorKind::BadState, "coroutine has not completed"));
        }
        Ok(coroutine.result())
    }

    pub fn coroutine_name(&self, coroutine: Value) -> VmResult<String> {
        let coroutine = Coroutine::try_from(coroutine).ok_or(ERR_NOT_COROUTINE)?;
        self.string_value(coroutine.name())
    }

    /// Resume a waiting coroutine through its current token.
    pub fn resume_token(&mut self, token: Value) -> VmResult<()> {
        crate::scheduler::resume_token(self, token)
    }

    /// Drain the ready queue, running each coroutine until it yields,
    /// waits or completes.
    pub fn run_ready(&mut self) -> VmResult<()> {
        crate::scheduler::run_ready(self)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready_head.is_null()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if !self.suspended.is_empty() {
            tracing::warn!(
                suspended = self.suspended.len(),
                "vm teardown with suspended coroutines; releasing their frames without a result"
            );
        }
        // Run every pending finalizer exactly once (completion callbacks,
        // native object payloads). The heap itself is freed by its Drop.
        self.heap.each_object(
            |ptr| unsafe { types::finalize_object(ptr) },
            |ptr| unsafe { types::object_size(ptr) },
        );
        self.roots.kill();
    }
}
