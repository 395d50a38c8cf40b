//! Records and record schemas
//!
//! A schema fixes an ordered set of symbol keys at construction time and
//! is shared between all records built from it. Records store one value
//! slot per key; fields can be written but the key set never changes.

use crate::error::{Error, ErrorKind, VmResult};
use crate::heap::Header;
use crate::objects::array::Tuple;
use crate::objects::string::Symbol;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

const ERR_NO_KEY: Error = Error::new(ErrorKind::BadKey, "record has no such key");

#[repr(C)]
pub(crate) struct RecordSchemaData {
    pub(crate) header: Header,
    /// Tuple of symbols, in declaration order.
    keys: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct RecordSchema(*mut RecordSchemaData);

impl RecordSchema {
    pub(crate) fn try_from(v: Value) -> Option<RecordSchema> {
        if v.is(InternalKind::RecordSchema) {
            Some(RecordSchema(v.heap_ptr().unwrap() as *mut RecordSchemaData))
        } else {
            None
        }
    }

    /// `keys` must be a rooted tuple of distinct symbols.
    pub(crate) fn new(vm: &mut Vm, keys: Value) -> VmResult<Value> {
        let tuple = Tuple::try_from(keys)
            .ok_or(Error::new(ErrorKind::BadType, "schema keys must be a tuple"))?;
        for i in 0..tuple.len() {
            let key = tuple.get(i)?;
            if Symbol::try_from(key).is_none() {
                return Err(Error::new(
                    ErrorKind::BadType,
                    "schema keys must be symbols",
                ));
            }
            // Symbols are interned; identity comparison is enough to
            // enforce the ordered-set invariant.
            for j in 0..i {
                if tuple.get(j)?.same(key) {
                    return Err(Error::new(
                        ErrorKind::BadArg,
                        "schema keys must be distinct",
                    ));
                }
            }
        }
        let ptr = vm.alloc_raw(
            InternalKind::RecordSchema,
            std::mem::size_of::<RecordSchemaData>(),
        )? as *mut RecordSchemaData;
        unsafe {
            (*ptr).keys = keys;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn keys(self) -> Tuple {
        unsafe { Tuple::try_from((*self.0).keys).expect("schema keys are a tuple") }
    }

    pub(crate) fn len(self) -> usize {
        self.keys().len()
    }

    /// Slot index of `symbol`, by identity. Schemas are small; lookup is a
    /// linear scan over the key tuple.
    pub(crate) fn index_of(self, symbol: Value) -> Option<usize> {
        let keys = self.keys();
        (0..keys.len()).find(|&i| unsafe { *keys.slots().add(i) }.same(symbol))
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut RecordSchemaData;
        unsafe { f((*data).keys) }
    }
}

#[repr(C)]
pub(crate) struct RecordData {
    pub(crate) header: Header,
    schema: Value,
    len: usize,
    // `len` value slots follow inline, one per schema key.
}

#[derive(Copy, Clone)]
pub(crate) struct Record(*mut RecordData);

impl Record {
    pub(crate) fn try_from(v: Value) -> Option<Record> {
        if v.is(InternalKind::Record) {
            Some(Record(v.heap_ptr().unwrap() as *mut RecordData))
        } else {
            None
        }
    }

    /// A record over `schema` with all fields null.
    pub(crate) fn new(vm: &mut Vm, schema: Value) -> VmResult<Value> {
        let schema_ref = RecordSchema::try_from(schema)
            .ok_or(Error::new(ErrorKind::BadType, "expected a record schema"))?;
        let len = schema_ref.len();
        let _schema_root = vm.temp_root(schema);
        let size = std::mem::size_of::<RecordData>() + len * std::mem::size_of::<Value>();
        let ptr = vm.alloc_raw(InternalKind::Record, size)? as *mut RecordData;
        unsafe {
            (*ptr).schema = schema;
            (*ptr).len = len;
            let slots = ptr.add(1) as *mut Value;
            for i in 0..len {
                slots.add(i).write(Value::null());
            }
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn schema(self) -> RecordSchema {
        unsafe { RecordSchema::try_from((*self.0).schema).expect("record schema is valid") }
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    fn slots(self) -> *mut Value {
        unsafe { self.0.add(1) as *mut Value }
    }

    pub(crate) fn get(self, symbol: Value) -> VmResult<Value> {
        let index = self.schema().index_of(symbol).ok_or(ERR_NO_KEY)?;
        unsafe { Ok(*self.slots().add(index)) }
    }

    pub(crate) fn set(self, symbol: Value, value: Value) -> VmResult<()> {
        let index = self.schema().index_of(symbol).ok_or(ERR_NO_KEY)?;
        unsafe {
            *self.slots().add(index) = value;
        }
        Ok(())
    }

    pub(crate) fn get_index(self, index: usize) -> Value {
        debug_assert!(index < self.len());
        unsafe { *self.slots().add(index) }
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut RecordData;
        unsafe { std::mem::size_of::<RecordData>() + (*data).len * std::mem::size_of::<Value>() }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let record = Record(ptr as *mut RecordData);
        unsafe {
            f((*(ptr as *mut RecordData)).schema);
            for i in 0..record.len() {
                f(*record.slots().add(i));
            }
        }
    }
}
