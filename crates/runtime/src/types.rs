//! Internal types and the type system
//!
//! Every heap object's header points at an `InternalType` descriptor. The
//! descriptor names the object's internal kind, which drives layout (size
//! computation), precise tracing and finalization. The descriptor for
//! `InternalType` itself points at itself; it is the fixed point created
//! first during VM bootstrap.
//!
//! Public `Type` objects are distinct: they are what `type_of` returns and
//! they carry the method tables used by method dispatch. Several internal
//! kinds share one public type (small and heap integers are both
//! `Integer`; functions, native functions and bound methods are all
//! `Function`), and purely internal kinds have no public type at all.

use crate::error::{Error, ErrorKind, VmResult};
use crate::heap::{Header, Heap};
use crate::objects::array::{Array, ArrayStorage, Tuple};
use crate::objects::buffer::Buffer;
use crate::objects::coroutine::{Coroutine, CoroutineData, CoroutineToken, CoroutineTokenData};
use crate::objects::coroutine_stack::CoroutineStack;
use crate::objects::function::{
    BoundMethod, BoundMethodData, Code, CodeFunctionTemplate, CodeFunctionTemplateData,
    Environment, Function, FunctionData, NativeFunction, NativeFunctionData,
};
use crate::objects::hash_table::{HashTable, HashTableData};
use crate::objects::module::{Module, ModuleData, UnresolvedImport, UnresolvedImportData};
use crate::objects::native::{NativeObject, NativePointerData};
use crate::objects::number::{FloatData, HeapIntData};
use crate::objects::record::{Record, RecordSchema, RecordSchemaData};
use crate::objects::result::{ExceptionData, ResultData, ResultObject};
use crate::objects::string::{StringBuilderData, SymbolData};
use crate::value::{Kind, Value};
use crate::vm::Vm;

/// Internal object kinds. The first three are immediates and never appear
/// in an object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub(crate) enum InternalKind {
    Null = 0,
    Boolean,
    SmallInt,

    InternalType,
    HeapInt,
    Float,
    String,
    Symbol,
    StringBuilder,
    Buffer,
    Tuple,
    Array,
    ArrayStorage,
    Record,
    RecordSchema,
    HashTable,
    Code,
    CodeFunctionTemplate,
    Environment,
    Function,
    NativeFunction,
    BoundMethod,
    Result,
    Exception,
    Coroutine,
    CoroutineStack,
    CoroutineToken,
    Module,
    UnresolvedImport,
    NativeObject,
    NativePointer,
    Type,
}

pub(crate) const KIND_COUNT: usize = InternalKind::Type as usize + 1;

/// Heap kinds, in header-descriptor creation order. `InternalType` must
/// come first (it is its own type).
pub(crate) const HEAP_KINDS: [InternalKind; 29] = [
    InternalKind::InternalType,
    InternalKind::HeapInt,
    InternalKind::Float,
    InternalKind::String,
    InternalKind::Symbol,
    InternalKind::StringBuilder,
    InternalKind::Buffer,
    InternalKind::Tuple,
    InternalKind::Array,
    InternalKind::ArrayStorage,
    InternalKind::Record,
    InternalKind::RecordSchema,
    InternalKind::HashTable,
    InternalKind::Code,
    InternalKind::CodeFunctionTemplate,
    InternalKind::Environment,
    InternalKind::Function,
    InternalKind::NativeFunction,
    InternalKind::BoundMethod,
    InternalKind::Result,
    InternalKind::Exception,
    InternalKind::Coroutine,
    InternalKind::CoroutineStack,
    InternalKind::CoroutineToken,
    InternalKind::Module,
    InternalKind::UnresolvedImport,
    InternalKind::NativeObject,
    InternalKind::NativePointer,
    InternalKind::Type,
];

impl InternalKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            InternalKind::Null => "Null",
            InternalKind::Boolean => "Boolean",
            InternalKind::SmallInt => "SmallInt",
            InternalKind::InternalType => "InternalType",
            InternalKind::HeapInt => "HeapInt",
            InternalKind::Float => "Float",
            InternalKind::String => "String",
            InternalKind::Symbol => "Symbol",
            InternalKind::StringBuilder => "StringBuilder",
            InternalKind::Buffer => "Buffer",
            InternalKind::Tuple => "Tuple",
            InternalKind::Array => "Array",
            InternalKind::ArrayStorage => "ArrayStorage",
            InternalKind::Record => "Record",
            InternalKind::RecordSchema => "RecordSchema",
            InternalKind::HashTable => "Map",
            InternalKind::Code => "Code",
            InternalKind::CodeFunctionTemplate => "CodeFunctionTemplate",
            InternalKind::Environment => "Environment",
            InternalKind::Function => "Function",
            InternalKind::NativeFunction => "NativeFunction",
            InternalKind::BoundMethod => "BoundMethod",
            InternalKind::Result => "Result",
            InternalKind::Exception => "Exception",
            InternalKind::Coroutine => "Coroutine",
            InternalKind::CoroutineStack => "CoroutineStack",
            InternalKind::CoroutineToken => "CoroutineToken",
            InternalKind::Module => "Module",
            InternalKind::UnresolvedImport => "UnresolvedImport",
            InternalKind::NativeObject => "NativeObject",
            InternalKind::NativePointer => "NativePointer",
            InternalKind::Type => "Type",
        }
    }

    /// Map onto the user-visible kind.
    pub(crate) fn public_kind(self) -> Kind {
        match self {
            InternalKind::Null => Kind::Null,
            InternalKind::Boolean => Kind::Boolean,
            InternalKind::SmallInt | InternalKind::HeapInt => Kind::Integer,
            InternalKind::Float => Kind::Float,
            InternalKind::String => Kind::String,
            InternalKind::Symbol => Kind::Symbol,
            InternalKind::StringBuilder => Kind::StringBuilder,
            InternalKind::Buffer => Kind::Buffer,
            InternalKind::Tuple => Kind::Tuple,
            InternalKind::Array => Kind::Array,
            InternalKind::Record => Kind::Record,
            InternalKind::RecordSchema => Kind::RecordSchema,
            InternalKind::HashTable => Kind::HashTable,
            InternalKind::Function | InternalKind::NativeFunction | InternalKind::BoundMethod => {
                Kind::Function
            }
            InternalKind::Result => Kind::Result,
            InternalKind::Exception => Kind::Exception,
            InternalKind::Coroutine => Kind::Coroutine,
            InternalKind::CoroutineToken => Kind::CoroutineToken,
            InternalKind::Module => Kind::Module,
            InternalKind::NativeObject => Kind::NativeObject,
            InternalKind::NativePointer => Kind::NativePointer,
            InternalKind::Type => Kind::Type,
            InternalKind::InternalType
            | InternalKind::ArrayStorage
            | InternalKind::Code
            | InternalKind::CodeFunctionTemplate
            | InternalKind::Environment
            | InternalKind::CoroutineStack
            | InternalKind::UnresolvedImport => Kind::Internal,
        }
    }
}

/// The descriptor object behind every heap object header.
#[repr(C)]
pub(crate) struct InternalTypeData {
    pub(crate) header: Header,
    pub(crate) kind: InternalKind,
    pub(crate) name: &'static str,
}

/// A user-visible type object: a name plus a method table keyed by symbol.
#[repr(C)]
pub(crate) struct TypeData {
    pub(crate) header: Header,
    name: Value,
    /// HashTable: symbol -> function.
    methods: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct TypeObject(*mut TypeData);

impl TypeObject {
    pub(crate) fn try_from(v: Value) -> Option<TypeObject> {
        if v.is(InternalKind::Type) {
            Some(TypeObject(v.heap_ptr().unwrap() as *mut TypeData))
        } else {
            None
        }
    }

    /// `name` (string) and `methods` (hash table) must be rooted.
    pub(crate) fn new(vm: &mut Vm, name: Value, methods: Value) -> VmResult<Value> {
        let ptr = vm.alloc_raw(InternalKind::Type, std::mem::size_of::<TypeData>())? as *mut TypeData;
        unsafe {
            (*ptr).name = name;
            (*ptr).methods = methods;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn name(self) -> Value {
        unsafe { (*self.0).name }
    }

    pub(crate) fn methods(self) -> HashTable {
        unsafe { HashTable::try_from((*self.0).methods).expect("type methods are a table") }
    }

    pub(crate) fn find_method(self, symbol: Value) -> Option<Value> {
        self.methods().get(symbol)
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut TypeData;
        unsafe {
            f((*data).name);
            f((*data).methods);
        }
    }
}

/// The per-VM tables of internal descriptors and public type objects.
pub(crate) struct TypeTable {
    internal: [Value; KIND_COUNT],
    public: [Value; KIND_COUNT],
}

impl TypeTable {
    /// Create the internal descriptors directly on the heap. Runs before
    /// the VM is usable, so it cannot go through the normal allocation
    /// path (which would consult this very table).
    pub(crate) fn bootstrap(heap: &mut Heap) -> VmResult<TypeTable> {
        let mut table = TypeTable {
            internal: [Value::null(); KIND_COUNT],
            public: [Value::null(); KIND_COUNT],
        };

        let size = std::mem::size_of::<InternalTypeData>();
        for kind in HEAP_KINDS {
            let ptr = heap.allocate(size).ok_or(Error::alloc())?.as_ptr() as *mut InternalTypeData;
            unsafe {
                (*ptr).kind = kind;
                (*ptr).name = kind.name();
            }
            table.internal[kind as usize] = Value::from_heap(ptr as *mut Header);
        }

        // Patch the descriptor headers; InternalType's points to itself.
        let internal_type = table.internal[InternalKind::InternalType as usize]
            .heap_ptr()
            .expect("descriptor is a heap object") as *mut InternalTypeData;
        for kind in HEAP_KINDS {
            let ptr = table.internal[kind as usize]
                .heap_ptr()
                .expect("descriptor is a heap object");
            unsafe {
                (*ptr).type_desc = internal_type;
            }
        }

        Ok(table)
    }

    pub(crate) fn descriptor(&self, kind: InternalKind) -> *mut InternalTypeData {
        let value = self.internal[kind as usize];
        debug_assert!(!value.is_null(), "no descriptor for {kind:?}");
        value.heap_ptr().expect("descriptor is a heap object") as *mut InternalTypeData
    }

    pub(crate) fn set_public_type(&mut self, kind: InternalKind, type_object: Value) {
        self.public[kind as usize] = type_object;
    }

    /// Public type of a value's kind, or `BadType` for internal kinds.
    pub(crate) fn public_type(&self, kind: InternalKind) -> VmResult<Value> {
        let value = self.public[kind as usize];
        if value.is_null() {
            return Err(Error::new(
                ErrorKind::BadType,
                "value has no public type (internal kind)",
            ));
        }
        Ok(value)
    }

    pub(crate) fn trace_roots(&self, f: &mut dyn FnMut(Value)) {
        for value in self.internal.iter().chain(self.public.iter()) {
            f(*value);
        }
    }
}

/// Byte size of a live object, from its descriptor's layout rules.
///
/// # Safety
/// `ptr` must point to an initialized heap object.
pub(crate) unsafe fn object_size(ptr: *mut Header) -> usize {
    use std::mem::size_of;
    unsafe {
        match Header::kind(ptr) {
            InternalKind::InternalType => size_of::<InternalTypeData>(),
            InternalKind::HeapInt => size_of::<HeapIntData>(),
            InternalKind::Float => size_of::<FloatData>(),
            InternalKind::String => crate::objects::string::Str::size_of(ptr),
            InternalKind::Symbol => size_of::<SymbolData>(),
            InternalKind::StringBuilder => size_of::<StringBuilderData>(),
            InternalKind::Buffer => Buffer::size_of(ptr),
            InternalKind::Tuple => Tuple::size_of(ptr),
            InternalKind::Array => size_of::<crate::objects::array::ArrayData>(),
            InternalKind::ArrayStorage => ArrayStorage::size_of(ptr),
            InternalKind::Record => Record::size_of(ptr),
            InternalKind::RecordSchema => size_of::<RecordSchemaData>(),
            InternalKind::HashTable => size_of::<HashTableData>(),
            InternalKind::Code => Code::size_of(ptr),
            InternalKind::CodeFunctionTemplate => size_of::<CodeFunctionTemplateData>(),
            InternalKind::Environment => Environment::size_of(ptr),
            InternalKind::Function => size_of::<FunctionData>(),
            InternalKind::NativeFunction => size_of::<NativeFunctionData>(),
            InternalKind::BoundMethod => size_of::<BoundMethodData>(),
            InternalKind::Result => size_of::<ResultData>(),
            InternalKind::Exception => size_of::<ExceptionData>(),
            InternalKind::Coroutine => size_of::<CoroutineData>(),
            InternalKind::CoroutineStack => CoroutineStack::size_of(ptr),
            InternalKind::CoroutineToken => size_of::<CoroutineTokenData>(),
            InternalKind::Module => size_of::<ModuleData>(),
            InternalKind::UnresolvedImport => size_of::<UnresolvedImportData>(),
            InternalKind::NativeObject => NativeObject::size_of(ptr),
            InternalKind::NativePointer => size_of::<NativePointerData>(),
            InternalKind::Type => size_of::<TypeData>(),
            InternalKind::Null | InternalKind::Boolean | InternalKind::SmallInt => {
                unreachable!("immediates have no heap objects")
            }
        }
    }
}

/// Visit every value slot of a live object.
///
/// # Safety
/// `ptr` must point to an initialized heap object.
pub(crate) unsafe fn trace_object(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
    unsafe {
        match Header::kind(ptr) {
            // Leaf objects: raw bytes or immutable payloads only.
            InternalKind::InternalType
            | InternalKind::HeapInt
            | InternalKind::Float
            | InternalKind::String
            | InternalKind::Buffer
            | InternalKind::Code
            | InternalKind::NativeObject
            | InternalKind::NativePointer => {}

            InternalKind::Symbol => crate::objects::string::Symbol::trace(ptr, f),
            InternalKind::StringBuilder => crate::objects::string::StringBuilder::trace(ptr, f),
            InternalKind::Tuple => Tuple::trace(ptr, f),
            InternalKind::Array => Array::trace(ptr, f),
            InternalKind::ArrayStorage => ArrayStorage::trace(ptr, f),
            InternalKind::Record => Record::trace(ptr, f),
            InternalKind::RecordSchema => RecordSchema::trace(ptr, f),
            InternalKind::HashTable => HashTable::trace(ptr, f),
            InternalKind::CodeFunctionTemplate => CodeFunctionTemplate::trace(ptr, f),
            InternalKind::Environment => Environment::trace(ptr, f),
            InternalKind::Function => Function::trace(ptr, f),
            InternalKind::NativeFunction => NativeFunction::trace(ptr, f),
            InternalKind::BoundMethod => BoundMethod::trace(ptr, f),
            InternalKind::Result => ResultObject::trace(ptr, f),
            InternalKind::Exception => crate::objects::result::Exception::trace_refs(ptr, f),
            InternalKind::Coroutine => Coroutine::trace(ptr, f),
            InternalKind::CoroutineStack => CoroutineStack::trace(ptr, f),
            InternalKind::CoroutineToken => CoroutineToken::trace(ptr, f),
            InternalKind::Module => Module::trace(ptr, f),
            InternalKind::UnresolvedImport => UnresolvedImport::trace(ptr, f),
            InternalKind::Type => TypeObject::trace(ptr, f),

            InternalKind::Null | InternalKind::Boolean | InternalKind::SmallInt => {
                unreachable!("immediates have no heap objects")
            }
        }
    }
}

/// Run the object's finalizer if its kind declares one. Safe to call more
/// than once; finalization is latched.
///
/// # Safety
/// `ptr` must point to an initialized heap object.
pub(crate) unsafe fn finalize_object(ptr: *mut Header) {
    unsafe {
        if Header::kind(ptr) == InternalKind::NativeObject {
            NativeObject::finalize(ptr);
        }
    }
}
