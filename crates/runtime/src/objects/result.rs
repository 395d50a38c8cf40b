//! Results and exceptions
//!
//! `Result` is the total sum type `success(value) | error(value)` exposed
//! to user code; a coroutine always completes with one. `Exception` is the
//! value carried by a panic: a message plus an optional stack trace
//! (captured only when the VM is configured for it).

use crate::error::{Error, ErrorKind, VmResult};
use crate::heap::Header;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

const ERR_NOT_SUCCESS: Error =
    Error::new(ErrorKind::BadState, "result does not hold a success value");
const ERR_NOT_ERROR: Error =
    Error::new(ErrorKind::BadState, "result does not hold an error value");

const SUCCESS: u64 = 0;
const ERROR: u64 = 1;

#[repr(C)]
pub(crate) struct ResultData {
    pub(crate) header: Header,
    discriminant: u64,
    value: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct ResultObject(*mut ResultData);

impl ResultObject {
    pub(crate) fn try_from(v: Value) -> Option<ResultObject> {
        if v.is(InternalKind::Result) {
            Some(ResultObject(v.heap_ptr().unwrap() as *mut ResultData))
        } else {
            None
        }
    }

    pub(crate) fn success(vm: &mut Vm, value: Value) -> VmResult<Value> {
        Self::make(vm, SUCCESS, value)
    }

    pub(crate) fn error(vm: &mut Vm, value: Value) -> VmResult<Value> {
        Self::make(vm, ERROR, value)
    }

    fn make(vm: &mut Vm, discriminant: u64, value: Value) -> VmResult<Value> {
        let _value_root = vm.temp_root(value);
        let ptr = vm.alloc_raw(InternalKind::Result, std::mem::size_of::<ResultData>())?
            as *mut ResultData;
        unsafe {
            (*ptr).discriminant = discriminant;
            (*ptr).value = value;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn is_success(self) -> bool {
        unsafe { (*self.0).discriminant == SUCCESS }
    }

    pub(crate) fn is_error(self) -> bool {
        !self.is_success()
    }

    pub(crate) fn success_value(self) -> VmResult<Value> {
        if self.is_success() {
            unsafe { Ok((*self.0).value) }
        } else {
            Err(ERR_NOT_SUCCESS)
        }
    }

    pub(crate) fn error_value(self) -> VmResult<Value> {
        if self.is_error() {
            unsafe { Ok((*self.0).value) }
        } else {
            Err(ERR_NOT_ERROR)
        }
    }

    /// The wrapped value, whichever side it is on.
    pub(crate) fn raw_value(self) -> Value {
        unsafe { (*self.0).value }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut ResultData;
        unsafe { f((*data).value) }
    }
}

#[repr(C)]
pub(crate) struct ExceptionData {
    pub(crate) header: Header,
    message: Value,
    /// Stack trace string, or null when tracing is disabled.
    trace: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct Exception(*mut ExceptionData);

impl Exception {
    pub(crate) fn try_from(v: Value) -> Option<Exception> {
        if v.is(InternalKind::Exception) {
            Some(Exception(v.heap_ptr().unwrap() as *mut ExceptionData))
        } else {
            None
        }
    }

    /// `message` must be a rooted string.
    pub(crate) fn new(vm: &mut Vm, message: Value) -> VmResult<Value> {
        let _message_root = vm.temp_root(message);
        let ptr = vm.alloc_raw(InternalKind::Exception, std::mem::size_of::<ExceptionData>())?
            as *mut ExceptionData;
        unsafe {
            (*ptr).message = message;
            (*ptr).trace = Value::null();
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn message(self) -> Value {
        unsafe { (*self.0).message }
    }

    pub(crate) fn trace(self) -> Value {
        unsafe { (*self.0).trace }
    }

    pub(crate) fn set_trace(self, trace: Value) {
        unsafe { (*self.0).trace = trace }
    }

    pub(crate) unsafe fn trace_refs(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut ExceptionData;
        unsafe {
            f((*data).message);
            f((*data).trace);
        }
    }
}
