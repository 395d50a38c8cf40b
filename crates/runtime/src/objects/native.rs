//! Native objects and native pointers
//!
//! A `NativeObject` owns an inline payload of host bytes plus an optional
//! finalizer that the collector runs exactly once when the object dies
//! (or at VM teardown). The payload is pinned: the collector never moves
//! it, so the data pointer stays valid between collections.
//!
//! `NativePointer` wraps a raw host pointer without inspecting or owning
//! it in any way.

use crate::error::VmResult;
use crate::heap::Header;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

/// Finalizer signature: payload pointer + payload size.
pub type FinalizerFn = unsafe fn(*mut u8, usize);

#[repr(C)]
pub(crate) struct NativeObjectData {
    pub(crate) header: Header,
    finalizer: Option<FinalizerFn>,
    len: usize,
    // Payload bytes follow inline, 16-byte aligned.
}

#[derive(Copy, Clone)]
pub(crate) struct NativeObject(*mut NativeObjectData);

impl NativeObject {
    pub(crate) fn try_from(v: Value) -> Option<NativeObject> {
        if v.is(InternalKind::NativeObject) {
            Some(NativeObject(v.heap_ptr().unwrap() as *mut NativeObjectData))
        } else {
            None
        }
    }

    /// Allocate a zero-filled payload of `len` bytes.
    pub(crate) fn new(vm: &mut Vm, len: usize, finalizer: Option<FinalizerFn>) -> VmResult<Value> {
        let size = std::mem::size_of::<NativeObjectData>() + len;
        let ptr = vm.alloc_raw(InternalKind::NativeObject, size)? as *mut NativeObjectData;
        unsafe {
            (*ptr).finalizer = finalizer;
            (*ptr).len = len;
            std::ptr::write_bytes(ptr.add(1) as *mut u8, 0, len);
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    /// Store a Rust value inline; the finalizer drops it in place.
    pub(crate) fn new_rust<T: 'static>(vm: &mut Vm, value: T) -> VmResult<Value> {
        unsafe fn drop_payload<T>(data: *mut u8, _len: usize) {
            unsafe { std::ptr::drop_in_place(data as *mut T) }
        }
        const {
            assert!(
                std::mem::align_of::<T>() <= 16,
                "native payloads support alignment up to 16"
            );
        }

        let object = Self::new(vm, std::mem::size_of::<T>(), Some(drop_payload::<T>))?;
        let native = NativeObject::try_from(object).unwrap();
        unsafe {
            (native.data() as *mut T).write(value);
        }
        Ok(object)
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    pub(crate) fn data(self) -> *mut u8 {
        unsafe { self.0.add(1) as *mut u8 }
    }

    /// Typed view of a payload created with [`NativeObject::new_rust`].
    ///
    /// # Safety
    /// The payload must hold a live `T`.
    pub(crate) unsafe fn data_as<T>(self) -> *mut T {
        self.data() as *mut T
    }

    /// Run and clear the finalizer. Called by the collector and by VM
    /// teardown; the option guarantees exactly-once execution.
    pub(crate) unsafe fn finalize(ptr: *mut Header) {
        let data = ptr as *mut NativeObjectData;
        unsafe {
            if let Some(finalizer) = (*data).finalizer.take() {
                let object = NativeObject(data);
                finalizer(object.data(), object.len());
            }
        }
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut NativeObjectData;
        unsafe { std::mem::size_of::<NativeObjectData>() + (*data).len }
    }
}

#[repr(C)]
pub(crate) struct NativePointerData {
    pub(crate) header: Header,
    ptr: *mut (),
}

#[derive(Copy, Clone)]
pub(crate) struct NativePointer(*mut NativePointerData);

impl NativePointer {
    pub(crate) fn try_from(v: Value) -> Option<NativePointer> {
        if v.is(InternalKind::NativePointer) {
            Some(NativePointer(v.heap_ptr().unwrap() as *mut NativePointerData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, raw: *mut ()) -> VmResult<Value> {
        let ptr = vm.alloc_raw(
            InternalKind::NativePointer,
            std::mem::size_of::<NativePointerData>(),
        )? as *mut NativePointerData;
        unsafe {
            (*ptr).ptr = raw;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn get(self) -> *mut () {
        unsafe { (*self.0).ptr }
    }
}
