//! Module objects
//!
//! A live module is a name, a member tuple, an export table mapping
//! symbols to member indices, an optional initializer function and an
//! `initialized` flag. Import members hold `UnresolvedImport` sentinels
//! until the linker replaces them with the target modules; exports never
//! change once the module is initialized.

use crate::error::{Error, ErrorKind, VmResult};
use crate::heap::Header;
use crate::objects::array::Tuple;
use crate::objects::hash_table::HashTable;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

#[repr(C)]
pub(crate) struct ModuleData {
    pub(crate) header: Header,
    name: Value,
    /// Tuple of member values.
    members: Value,
    /// HashTable: symbol -> member index (small int).
    exports: Value,
    /// Initializer function, or null.
    initializer: Value,
    initialized: u64,
}

#[derive(Copy, Clone)]
pub(crate) struct Module(*mut ModuleData);

impl Module {
    pub(crate) fn try_from(v: Value) -> Option<Module> {
        if v.is(InternalKind::Module) {
            Some(Module(v.heap_ptr().unwrap() as *mut ModuleData))
        } else {
            None
        }
    }

    /// All argument values must be rooted by the caller.
    pub(crate) fn new(vm: &mut Vm, name: Value, members: Value, exports: Value) -> VmResult<Value> {
        debug_assert!(Tuple::try_from(members).is_some());
        debug_assert!(HashTable::try_from(exports).is_some());
        let ptr =
            vm.alloc_raw(InternalKind::Module, std::mem::size_of::<ModuleData>())? as *mut ModuleData;
        unsafe {
            (*ptr).name = name;
            (*ptr).members = members;
            (*ptr).exports = exports;
            (*ptr).initializer = Value::null();
            (*ptr).initialized = 0;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn name(self) -> Value {
        unsafe { (*self.0).name }
    }

    pub(crate) fn members(self) -> Tuple {
        unsafe { Tuple::try_from((*self.0).members).expect("module members are a tuple") }
    }

    pub(crate) fn exports(self) -> HashTable {
        unsafe { HashTable::try_from((*self.0).exports).expect("module exports are a table") }
    }

    pub(crate) fn initializer(self) -> Value {
        unsafe { (*self.0).initializer }
    }

    pub(crate) fn set_initializer(self, function: Value) {
        unsafe { (*self.0).initializer = function }
    }

    pub(crate) fn initialized(self) -> bool {
        unsafe { (*self.0).initialized != 0 }
    }

    pub(crate) fn set_initialized(self) {
        unsafe { (*self.0).initialized = 1 }
    }

    /// Look up an export by symbol, returning the bound member value.
    pub(crate) fn get_export(self, symbol: Value) -> VmResult<Value> {
        let index = self
            .exports()
            .get(symbol)
            .ok_or(Error::new(ErrorKind::ExportNotFound, "module has no such export"))?;
        let index = index
            .as_small_int()
            .ok_or(Error::new(ErrorKind::Internal, "corrupt export table"))?;
        self.members().get(index as usize)
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut ModuleData;
        unsafe {
            f((*data).name);
            f((*data).members);
            f((*data).exports);
            f((*data).initializer);
        }
    }
}

/// Placeholder stored in a member tuple until link time.
#[repr(C)]
pub(crate) struct UnresolvedImportData {
    pub(crate) header: Header,
    module_name: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct UnresolvedImport(*mut UnresolvedImportData);

impl UnresolvedImport {
    pub(crate) fn try_from(v: Value) -> Option<UnresolvedImport> {
        if v.is(InternalKind::UnresolvedImport) {
            Some(UnresolvedImport(v.heap_ptr().unwrap() as *mut UnresolvedImportData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, module_name: Value) -> VmResult<Value> {
        let _name_root = vm.temp_root(module_name);
        let ptr = vm.alloc_raw(
            InternalKind::UnresolvedImport,
            std::mem::size_of::<UnresolvedImportData>(),
        )? as *mut UnresolvedImportData;
        unsafe {
            (*ptr).module_name = module_name;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn module_name(self) -> Value {
        unsafe { (*self.0).module_name }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut UnresolvedImportData;
        unsafe { f((*data).module_name) }
    }
}
