//! Raw byte buffers
//!
//! A buffer is a fixed-size byte array. Buffers are pinned: the collector
//! never relocates anything, so `data()` stays valid between collections.
//! Raw pointers obtained from a buffer are still invalidated by VM
//! teardown and must not outlive a collection that frees the buffer.

use crate::error::{Error, ErrorKind, VmResult};
use crate::heap::Header;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

#[repr(C)]
pub(crate) struct BufferData {
    pub(crate) header: Header,
    len: usize,
    // Bytes follow inline.
}

#[derive(Copy, Clone)]
pub(crate) struct Buffer(*mut BufferData);

impl Buffer {
    pub(crate) fn try_from(v: Value) -> Option<Buffer> {
        if v.is(InternalKind::Buffer) {
            Some(Buffer(v.heap_ptr().unwrap() as *mut BufferData))
        } else {
            None
        }
    }

    /// Allocate a zero-filled buffer of `len` bytes.
    pub(crate) fn new(vm: &mut Vm, len: usize) -> VmResult<Value> {
        let size = std::mem::size_of::<BufferData>() + len;
        let ptr = vm.alloc_raw(InternalKind::Buffer, size)? as *mut BufferData;
        unsafe {
            (*ptr).len = len;
            std::ptr::write_bytes(ptr.add(1) as *mut u8, 0, len);
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    pub(crate) fn data(self) -> *mut u8 {
        unsafe { self.0.add(1) as *mut u8 }
    }

    pub(crate) fn get(self, index: usize) -> VmResult<u8> {
        if index >= self.len() {
            return Err(Error::new(ErrorKind::OutOfBounds, "buffer index out of bounds"));
        }
        unsafe { Ok(*self.data().add(index)) }
    }

    pub(crate) fn set(self, index: usize, byte: u8) -> VmResult<()> {
        if index >= self.len() {
            return Err(Error::new(ErrorKind::OutOfBounds, "buffer index out of bounds"));
        }
        unsafe {
            *self.data().add(index) = byte;
        }
        Ok(())
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut BufferData;
        unsafe { std::mem::size_of::<BufferData>() + (*data).len }
    }
}
