//! Strings, symbols and string builders
//!
//! Strings are immutable UTF-8 byte buffers with a lazily computed, cached
//! hash. Hashes are 62-bit so they always fit the small-integer immediate
//! range; the hash table stores them inline as tagged values. Interned
//! strings carry a flag so equality can short-circuit to pointer
//! comparison; the VM's intern table guarantees that byte-equal interned
//! strings are the same object. Symbols wrap an interned string and
//! compare by identity.

use crate::error::VmResult;
use crate::heap::Header;
use crate::types::InternalKind;
use crate::value::{Value, SMALL_INT_MAX};
use crate::vm::Vm;

const HASH_PRESENT: u64 = 1 << 63;
/// Hashes are bounded by the small-integer range.
pub(crate) const HASH_MASK: u64 = SMALL_INT_MAX as u64;

const FLAG_INTERNED: u64 = 1 << 0;

#[repr(C)]
pub(crate) struct StringData {
    pub(crate) header: Header,
    /// `0` when not yet computed; otherwise the 62-bit hash with the top
    /// bit set as a presence marker.
    hash: u64,
    flags: u64,
    len: usize,
    // UTF-8 bytes follow inline.
}

/// 62-bit FNV-1a over the string bytes. Never returns zero so that zero
/// can mean "not yet computed".
pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let hash = hash & HASH_MASK;
    if hash == 0 { 1 } else { hash }
}

#[derive(Copy, Clone)]
pub(crate) struct Str(*mut StringData);

impl Str {
    pub(crate) fn try_from(v: Value) -> Option<Str> {
        if v.is(InternalKind::String) {
            Some(Str(v.heap_ptr().unwrap() as *mut StringData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, text: &str) -> VmResult<Value> {
        let size = std::mem::size_of::<StringData>() + text.len();
        let ptr = vm.alloc_raw(InternalKind::String, size)? as *mut StringData;
        unsafe {
            (*ptr).hash = 0;
            (*ptr).flags = 0;
            (*ptr).len = text.len();
            let data = ptr.add(1) as *mut u8;
            std::ptr::copy_nonoverlapping(text.as_ptr(), data, text.len());
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    /// Borrowed view of the bytes. Valid only until the next allocating VM
    /// operation; the public API exposes owned copies instead.
    pub(crate) fn as_str(&self) -> &str {
        unsafe {
            let data = self.0.add(1) as *const u8;
            let bytes = std::slice::from_raw_parts(data, (*self.0).len);
            // Construction only accepts &str, so the bytes are valid UTF-8.
            std::str::from_utf8_unchecked(bytes)
        }
    }

    /// Cached 62-bit hash, computed on first use. Stable once computed.
    pub(crate) fn hash(self) -> u64 {
        unsafe {
            let cached = (*self.0).hash;
            if cached != 0 {
                return cached & HASH_MASK;
            }
            let hash = hash_bytes(self.as_str().as_bytes());
            (*self.0).hash = hash | HASH_PRESENT;
            hash
        }
    }

    pub(crate) fn is_interned(self) -> bool {
        unsafe { (*self.0).flags & FLAG_INTERNED != 0 }
    }

    pub(crate) fn mark_interned(self) {
        unsafe { (*self.0).flags |= FLAG_INTERNED }
    }

    /// Byte equality with the interned fast path.
    pub(crate) fn equals(self, other: Str) -> bool {
        if self.0 == other.0 {
            return true;
        }
        if self.is_interned() && other.is_interned() {
            // Distinct interned objects are never byte-equal.
            return false;
        }
        self.len() == other.len() && self.as_str() == other.as_str()
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut StringData;
        unsafe { std::mem::size_of::<StringData>() + (*data).len }
    }
}

#[repr(C)]
pub(crate) struct SymbolData {
    pub(crate) header: Header,
    /// The interned name string.
    name: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct Symbol(*mut SymbolData);

impl Symbol {
    pub(crate) fn try_from(v: Value) -> Option<Symbol> {
        if v.is(InternalKind::Symbol) {
            Some(Symbol(v.heap_ptr().unwrap() as *mut SymbolData))
        } else {
            None
        }
    }

    /// Create a raw symbol object. Callers go through [`Vm::make_symbol`],
    /// which guarantees one symbol per name via the symbol table.
    pub(crate) fn new(vm: &mut Vm, name: Value) -> VmResult<Value> {
        debug_assert!(Str::try_from(name).is_some_and(|s| s.is_interned()));
        let ptr =
            vm.alloc_raw(InternalKind::Symbol, std::mem::size_of::<SymbolData>())? as *mut SymbolData;
        unsafe {
            (*ptr).name = name;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn name(self) -> Value {
        unsafe { (*self.0).name }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut SymbolData;
        unsafe { f((*data).name) }
    }
}

#[repr(C)]
pub(crate) struct StringBuilderData {
    pub(crate) header: Header,
    /// Backing byte buffer, or null while empty.
    buffer: Value,
    len: usize,
}

#[derive(Copy, Clone)]
pub(crate) struct StringBuilder(*mut StringBuilderData);

impl StringBuilder {
    pub(crate) fn try_from(v: Value) -> Option<StringBuilder> {
        if v.is(InternalKind::StringBuilder) {
            Some(StringBuilder(v.heap_ptr().unwrap() as *mut StringBuilderData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm) -> VmResult<Value> {
        let ptr = vm.alloc_raw(
            InternalKind::StringBuilder,
            std::mem::size_of::<StringBuilderData>(),
        )? as *mut StringBuilderData;
        unsafe {
            (*ptr).buffer = Value::null();
            (*ptr).len = 0;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    pub(crate) fn clear(self) {
        unsafe { (*self.0).len = 0 }
    }

    /// Append raw bytes, growing the backing buffer by doubling.
    pub(crate) fn append(self, vm: &mut Vm, text: &str) -> VmResult<()> {
        use crate::objects::buffer::Buffer;

        let needed = self.len() + text.len();
        let capacity = unsafe {
            Buffer::try_from((*self.0).buffer).map_or(0, |b| b.len())
        };
        if needed > capacity {
            let new_capacity = needed.next_power_of_two().max(64);
            // Rooting: `self` is reachable from the caller; the old buffer
            // stays reachable through it during this allocation.
            let new_buffer = Buffer::new(vm, new_capacity)?;
            unsafe {
                let new = Buffer::try_from(new_buffer).unwrap();
                if let Some(old) = Buffer::try_from((*self.0).buffer) {
                    std::ptr::copy_nonoverlapping(old.data(), new.data(), (*self.0).len);
                }
                (*self.0).buffer = new_buffer;
            }
        }
        unsafe {
            let buffer = Buffer::try_from((*self.0).buffer).unwrap();
            std::ptr::copy_nonoverlapping(
                text.as_ptr(),
                buffer.data().add((*self.0).len),
                text.len(),
            );
            (*self.0).len = needed;
        }
        Ok(())
    }

    /// Snapshot the current contents as a new string.
    pub(crate) fn to_string_value(self, vm: &mut Vm) -> VmResult<Value> {
        let text = self.as_str().to_string();
        Str::new(vm, &text)
    }

    pub(crate) fn as_str(&self) -> &str {
        use crate::objects::buffer::Buffer;
        unsafe {
            match Buffer::try_from((*self.0).buffer) {
                Some(buffer) => {
                    let bytes = std::slice::from_raw_parts(buffer.data(), (*self.0).len);
                    std::str::from_utf8_unchecked(bytes)
                }
                None => "",
            }
        }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut StringBuilderData;
        unsafe { f((*data).buffer) }
    }
}
