//! Tuples, array storage and arrays
//!
//! A tuple is a fixed-size slot array; its slots are mutable (language
//! level immutability is a compiler concern, not a runtime one). An array
//! is a resizable sequence backed by a separate `ArrayStorage` object that
//! is replaced wholesale when the array grows; the array owns its storage
//! exclusively.

use crate::error::{Error, ErrorKind, VmResult};
use crate::heap::Header;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

const ERR_TUPLE_BOUNDS: Error =
    Error::new(ErrorKind::OutOfBounds, "tuple index out of bounds");
const ERR_ARRAY_BOUNDS: Error =
    Error::new(ErrorKind::OutOfBounds, "array index out of bounds");

/// Minimum storage capacity allocated when an empty array first grows.
const MIN_CAPACITY: usize = 8;

#[repr(C)]
pub(crate) struct TupleData {
    pub(crate) header: Header,
    len: usize,
    // `len` value slots follow inline.
}

#[derive(Copy, Clone)]
pub(crate) struct Tuple(*mut TupleData);

impl Tuple {
    pub(crate) fn try_from(v: Value) -> Option<Tuple> {
        if v.is(InternalKind::Tuple) {
            Some(Tuple(v.heap_ptr().unwrap() as *mut TupleData))
        } else {
            None
        }
    }

    /// A tuple of `len` null slots.
    pub(crate) fn new(vm: &mut Vm, len: usize) -> VmResult<Value> {
        let size = std::mem::size_of::<TupleData>() + len * std::mem::size_of::<Value>();
        let ptr = vm.alloc_raw(InternalKind::Tuple, size)? as *mut TupleData;
        unsafe {
            (*ptr).len = len;
            let slots = ptr.add(1) as *mut Value;
            for i in 0..len {
                slots.add(i).write(Value::null());
            }
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    /// A tuple initialized from a rooted slice of values.
    pub(crate) fn from_slice(vm: &mut Vm, values: &[Value]) -> VmResult<Value> {
        let tuple_value = Tuple::new(vm, values.len())?;
        let tuple = Tuple::try_from(tuple_value).unwrap();
        for (i, &v) in values.iter().enumerate() {
            unsafe { tuple.slots().add(i).write(v) };
        }
        Ok(tuple_value)
    }

    pub(crate) fn value(self) -> Value {
        Value::from_heap(self.0 as *mut Header)
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    pub(crate) fn slots(self) -> *mut Value {
        unsafe { self.0.add(1) as *mut Value }
    }

    pub(crate) fn get(self, index: usize) -> VmResult<Value> {
        if index >= self.len() {
            return Err(ERR_TUPLE_BOUNDS);
        }
        unsafe { Ok(*self.slots().add(index)) }
    }

    pub(crate) fn set(self, index: usize, value: Value) -> VmResult<()> {
        if index >= self.len() {
            return Err(ERR_TUPLE_BOUNDS);
        }
        unsafe {
            *self.slots().add(index) = value;
        }
        Ok(())
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut TupleData;
        unsafe { std::mem::size_of::<TupleData>() + (*data).len * std::mem::size_of::<Value>() }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let tuple = Tuple(ptr as *mut TupleData);
        for i in 0..tuple.len() {
            unsafe { f(*tuple.slots().add(i)) }
        }
    }
}

#[repr(C)]
pub(crate) struct ArrayStorageData {
    pub(crate) header: Header,
    capacity: usize,
    len: usize,
    // `capacity` value slots follow inline; slots `0..len` are live.
}

#[derive(Copy, Clone)]
pub(crate) struct ArrayStorage(*mut ArrayStorageData);

impl ArrayStorage {
    pub(crate) fn try_from(v: Value) -> Option<ArrayStorage> {
        if v.is(InternalKind::ArrayStorage) {
            Some(ArrayStorage(v.heap_ptr().unwrap() as *mut ArrayStorageData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, capacity: usize) -> VmResult<Value> {
        let size =
            std::mem::size_of::<ArrayStorageData>() + capacity * std::mem::size_of::<Value>();
        let ptr = vm.alloc_raw(InternalKind::ArrayStorage, size)? as *mut ArrayStorageData;
        unsafe {
            (*ptr).capacity = capacity;
            (*ptr).len = 0;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn value(self) -> Value {
        Value::from_heap(self.0 as *mut Header)
    }

    pub(crate) fn capacity(self) -> usize {
        unsafe { (*self.0).capacity }
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    pub(crate) fn set_len(self, len: usize) {
        debug_assert!(len <= self.capacity());
        unsafe { (*self.0).len = len }
    }

    pub(crate) fn slots(self) -> *mut Value {
        unsafe { self.0.add(1) as *mut Value }
    }

    pub(crate) fn get(self, index: usize) -> Value {
        debug_assert!(index < self.len());
        unsafe { *self.slots().add(index) }
    }

    pub(crate) fn set(self, index: usize, value: Value) {
        debug_assert!(index < self.len());
        unsafe { *self.slots().add(index) = value }
    }

    pub(crate) fn push(self, value: Value) {
        let len = self.len();
        debug_assert!(len < self.capacity());
        unsafe {
            *self.slots().add(len) = value;
            (*self.0).len = len + 1;
        }
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut ArrayStorageData;
        unsafe {
            std::mem::size_of::<ArrayStorageData>()
                + (*data).capacity * std::mem::size_of::<Value>()
        }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let storage = ArrayStorage(ptr as *mut ArrayStorageData);
        for i in 0..storage.len() {
            unsafe { f(*storage.slots().add(i)) }
        }
    }
}

#[repr(C)]
pub(crate) struct ArrayData {
    pub(crate) header: Header,
    /// Backing storage, or null while the array is empty with no capacity.
    storage: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct Array(*mut ArrayData);

impl Array {
    pub(crate) fn try_from(v: Value) -> Option<Array> {
        if v.is(InternalKind::Array) {
            Some(Array(v.heap_ptr().unwrap() as *mut ArrayData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, initial_capacity: usize) -> VmResult<Value> {
        let storage = if initial_capacity > 0 {
            ArrayStorage::new(vm, initial_capacity)?
        } else {
            Value::null()
        };
        // Root: `storage` must survive this allocation.
        let _root = vm.temp_root(storage);
        let ptr = vm.alloc_raw(InternalKind::Array, std::mem::size_of::<ArrayData>())?
            as *mut ArrayData;
        unsafe {
            (*ptr).storage = storage;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn value(self) -> Value {
        Value::from_heap(self.0 as *mut Header)
    }

    fn storage(self) -> Option<ArrayStorage> {
        unsafe { ArrayStorage::try_from((*self.0).storage) }
    }

    pub(crate) fn len(self) -> usize {
        self.storage().map_or(0, |s| s.len())
    }

    pub(crate) fn get(self, index: usize) -> VmResult<Value> {
        match self.storage() {
            Some(storage) if index < storage.len() => Ok(storage.get(index)),
            _ => Err(ERR_ARRAY_BOUNDS),
        }
    }

    pub(crate) fn set(self, index: usize, value: Value) -> VmResult<()> {
        match self.storage() {
            Some(storage) if index < storage.len() => {
                storage.set(index, value);
                Ok(())
            }
            _ => Err(ERR_ARRAY_BOUNDS),
        }
    }

    /// Append, growing the storage by doubling (minimum 8 slots).
    pub(crate) fn push(self, vm: &mut Vm, value: Value) -> VmResult<()> {
        let (len, capacity) = match self.storage() {
            Some(storage) => (storage.len(), storage.capacity()),
            None => (0, 0),
        };
        if len == capacity {
            let new_capacity = (capacity * 2).max(MIN_CAPACITY);
            // Root the pushed value and the array across the allocation.
            let _value_root = vm.temp_root(value);
            let _self_root = vm.temp_root(self.value());
            let new_value = ArrayStorage::new(vm, new_capacity)?;
            let new_storage = ArrayStorage::try_from(new_value).unwrap();
            if let Some(old) = self.storage() {
                unsafe {
                    std::ptr::copy_nonoverlapping(old.slots(), new_storage.slots(), len);
                }
                new_storage.set_len(len);
            }
            unsafe {
                (*self.0).storage = new_value;
            }
        }
        self.storage()
            .expect("array storage exists after growth")
            .push(value);
        Ok(())
    }

    pub(crate) fn pop(self) -> VmResult<Value> {
        match self.storage() {
            Some(storage) if storage.len() > 0 => {
                let value = storage.get(storage.len() - 1);
                storage.set_len(storage.len() - 1);
                Ok(value)
            }
            _ => Err(Error::new(ErrorKind::OutOfBounds, "pop on empty array")),
        }
    }

    pub(crate) fn clear(self) {
        if let Some(storage) = self.storage() {
            storage.set_len(0);
        }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut ArrayData;
        unsafe { f((*data).storage) }
    }
}
