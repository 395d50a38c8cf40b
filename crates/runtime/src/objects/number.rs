//! Boxed numbers
//!
//! Script integers are 64-bit. Values within the 63-bit immediate range
//! live directly in the tagged word; the rest are boxed as heap integers.
//! Both present as the public `Integer` kind. Floats are always boxed.

use crate::error::VmResult;
use crate::heap::Header;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

#[repr(C)]
pub(crate) struct HeapIntData {
    pub(crate) header: Header,
    value: i64,
}

#[derive(Copy, Clone)]
pub(crate) struct HeapInt(*mut HeapIntData);

impl HeapInt {
    pub(crate) fn try_from(v: Value) -> Option<HeapInt> {
        if v.is(InternalKind::HeapInt) {
            Some(HeapInt(v.heap_ptr().unwrap() as *mut HeapIntData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, value: i64) -> VmResult<Value> {
        debug_assert!(Value::try_small_int(value).is_none());
        let ptr =
            vm.alloc_raw(InternalKind::HeapInt, std::mem::size_of::<HeapIntData>())? as *mut HeapIntData;
        unsafe {
            (*ptr).value = value;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn get(self) -> i64 {
        unsafe { (*self.0).value }
    }
}

#[repr(C)]
pub(crate) struct FloatData {
    pub(crate) header: Header,
    value: f64,
}

#[derive(Copy, Clone)]
pub(crate) struct Float(*mut FloatData);

impl Float {
    pub(crate) fn try_from(v: Value) -> Option<Float> {
        if v.is(InternalKind::Float) {
            Some(Float(v.heap_ptr().unwrap() as *mut FloatData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, value: f64) -> VmResult<Value> {
        let ptr =
            vm.alloc_raw(InternalKind::Float, std::mem::size_of::<FloatData>())? as *mut FloatData;
        unsafe {
            (*ptr).value = value;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn get(self) -> f64 {
        unsafe { (*self.0).value }
    }
}

/// Make an integer value, boxing when it exceeds the immediate range.
pub(crate) fn make_integer(vm: &mut Vm, value: i64) -> VmResult<Value> {
    match Value::try_small_int(value) {
        Some(v) => Ok(v),
        None => HeapInt::new(vm, value),
    }
}

/// Extract a 64-bit integer from either integer representation.
pub(crate) fn extract_integer(v: Value) -> Option<i64> {
    if let Some(i) = v.as_small_int() {
        return Some(i);
    }
    HeapInt::try_from(v).map(|h| h.get())
}

pub(crate) fn extract_float(v: Value) -> Option<f64> {
    Float::try_from(v).map(|f| f.get())
}

/// A number in either representation, for promoting arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

pub(crate) fn extract_number(v: Value) -> Option<Number> {
    if let Some(i) = extract_integer(v) {
        Some(Number::Int(i))
    } else {
        extract_float(v).map(Number::Float)
    }
}
