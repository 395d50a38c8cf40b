//! Function objects
//!
//! - `Code`: immutable bytecode buffer.
//! - `CodeFunctionTemplate`: the static, shareable definition of a user
//!   function (name, owning module, code, parameter/local counts).
//! - `Environment`: captured-variable frame for closures, chained via
//!   `parent`.
//! - `Function`: a template paired with an optional environment. Multiple
//!   function values may share one template.
//! - `NativeFunction`: host function with one of the sync/async/resumable
//!   calling conventions (plus runtime-internal magic callables).
//! - `BoundMethod`: `(function, receiver)` pair; calling it prepends the
//!   receiver to the arguments.

use crate::error::{Error, ErrorKind, VmResult};
use crate::heap::Header;
use crate::natives::NativeCallable;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

#[repr(C)]
pub(crate) struct CodeData {
    pub(crate) header: Header,
    len: usize,
    // Bytecode bytes follow inline.
}

#[derive(Copy, Clone)]
pub(crate) struct Code(*mut CodeData);

impl Code {
    pub(crate) fn try_from(v: Value) -> Option<Code> {
        if v.is(InternalKind::Code) {
            Some(Code(v.heap_ptr().unwrap() as *mut CodeData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, code: &[u8]) -> VmResult<Value> {
        let size = std::mem::size_of::<CodeData>() + code.len();
        let ptr = vm.alloc_raw(InternalKind::Code, size)? as *mut CodeData;
        unsafe {
            (*ptr).len = code.len();
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.add(1) as *mut u8, code.len());
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.0.add(1) as *const u8, (*self.0).len) }
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut CodeData;
        unsafe { std::mem::size_of::<CodeData>() + (*data).len }
    }
}

#[repr(C)]
pub(crate) struct CodeFunctionTemplateData {
    pub(crate) header: Header,
    name: Value,
    /// Owning module object.
    module: Value,
    code: Value,
    params: u32,
    locals: u32,
}

#[derive(Copy, Clone)]
pub(crate) struct CodeFunctionTemplate(*mut CodeFunctionTemplateData);

impl CodeFunctionTemplate {
    pub(crate) fn try_from(v: Value) -> Option<CodeFunctionTemplate> {
        if v.is(InternalKind::CodeFunctionTemplate) {
            Some(CodeFunctionTemplate(
                v.heap_ptr().unwrap() as *mut CodeFunctionTemplateData
            ))
        } else {
            None
        }
    }

    /// All argument values must be rooted by the caller.
    pub(crate) fn new(
        vm: &mut Vm,
        name: Value,
        module: Value,
        code: Value,
        params: u32,
        locals: u32,
    ) -> VmResult<Value> {
        let ptr = vm.alloc_raw(
            InternalKind::CodeFunctionTemplate,
            std::mem::size_of::<CodeFunctionTemplateData>(),
        )? as *mut CodeFunctionTemplateData;
        unsafe {
            (*ptr).name = name;
            (*ptr).module = module;
            (*ptr).code = code;
            (*ptr).params = params;
            (*ptr).locals = locals;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn value(self) -> Value {
        Value::from_heap(self.0 as *mut Header)
    }

    pub(crate) fn name(self) -> Value {
        unsafe { (*self.0).name }
    }

    pub(crate) fn module(self) -> Value {
        unsafe { (*self.0).module }
    }

    pub(crate) fn code(self) -> Code {
        unsafe { Code::try_from((*self.0).code).expect("template code is a code object") }
    }

    pub(crate) fn params(self) -> u32 {
        unsafe { (*self.0).params }
    }

    pub(crate) fn locals(self) -> u32 {
        unsafe { (*self.0).locals }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut CodeFunctionTemplateData;
        unsafe {
            f((*data).name);
            f((*data).module);
            f((*data).code);
        }
    }
}

#[repr(C)]
pub(crate) struct EnvironmentData {
    pub(crate) header: Header,
    /// Enclosing environment, or null.
    parent: Value,
    len: usize,
    // `len` captured slots follow inline.
}

#[derive(Copy, Clone)]
pub(crate) struct Environment(*mut EnvironmentData);

impl Environment {
    pub(crate) fn try_from(v: Value) -> Option<Environment> {
        if v.is(InternalKind::Environment) {
            Some(Environment(v.heap_ptr().unwrap() as *mut EnvironmentData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, parent: Value, len: usize) -> VmResult<Value> {
        let _parent_root = vm.temp_root(parent);
        let size = std::mem::size_of::<EnvironmentData>() + len * std::mem::size_of::<Value>();
        let ptr = vm.alloc_raw(InternalKind::Environment, size)? as *mut EnvironmentData;
        unsafe {
            (*ptr).parent = parent;
            (*ptr).len = len;
            let slots = ptr.add(1) as *mut Value;
            for i in 0..len {
                slots.add(i).write(Value::null());
            }
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn parent(self) -> Value {
        unsafe { (*self.0).parent }
    }

    pub(crate) fn len(self) -> usize {
        unsafe { (*self.0).len }
    }

    fn slots(self) -> *mut Value {
        unsafe { self.0.add(1) as *mut Value }
    }

    pub(crate) fn get(self, index: usize) -> VmResult<Value> {
        if index >= self.len() {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                "environment slot out of bounds",
            ));
        }
        unsafe { Ok(*self.slots().add(index)) }
    }

    pub(crate) fn set(self, index: usize, value: Value) -> VmResult<()> {
        if index >= self.len() {
            return Err(Error::new(
                ErrorKind::OutOfBounds,
                "environment slot out of bounds",
            ));
        }
        unsafe {
            *self.slots().add(index) = value;
        }
        Ok(())
    }

    /// Walk `levels` parents up the chain.
    pub(crate) fn ancestor(self, levels: usize) -> VmResult<Environment> {
        let mut env = self;
        for _ in 0..levels {
            env = Environment::try_from(env.parent()).ok_or(Error::new(
                ErrorKind::BadState,
                "environment chain too short",
            ))?;
        }
        Ok(env)
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let data = ptr as *mut EnvironmentData;
        unsafe {
            std::mem::size_of::<EnvironmentData>() + (*data).len * std::mem::size_of::<Value>()
        }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let env = Environment(ptr as *mut EnvironmentData);
        unsafe {
            f((*(ptr as *mut EnvironmentData)).parent);
            for i in 0..env.len() {
                f(*env.slots().add(i));
            }
        }
    }
}

#[repr(C)]
pub(crate) struct FunctionData {
    pub(crate) header: Header,
    tmpl: Value,
    /// Closure environment, or null.
    closure: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct Function(*mut FunctionData);

impl Function {
    pub(crate) fn try_from(v: Value) -> Option<Function> {
        if v.is(InternalKind::Function) {
            Some(Function(v.heap_ptr().unwrap() as *mut FunctionData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, tmpl: Value, closure: Value) -> VmResult<Value> {
        debug_assert!(CodeFunctionTemplate::try_from(tmpl).is_some());
        let _tmpl_root = vm.temp_root(tmpl);
        let _closure_root = vm.temp_root(closure);
        let ptr = vm.alloc_raw(InternalKind::Function, std::mem::size_of::<FunctionData>())?
            as *mut FunctionData;
        unsafe {
            (*ptr).tmpl = tmpl;
            (*ptr).closure = closure;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn template(self) -> CodeFunctionTemplate {
        unsafe {
            CodeFunctionTemplate::try_from((*self.0).tmpl).expect("function template is valid")
        }
    }

    pub(crate) fn closure(self) -> Value {
        unsafe { (*self.0).closure }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut FunctionData;
        unsafe {
            f((*data).tmpl);
            f((*data).closure);
        }
    }
}

#[repr(C)]
pub(crate) struct NativeFunctionData {
    pub(crate) header: Header,
    name: Value,
    /// Optional closure value passed back to the native on every call.
    closure: Value,
    params: u32,
    /// Local slots, used by resumable frames only.
    locals: u32,
    callable: NativeCallable,
}

#[derive(Copy, Clone)]
pub(crate) struct NativeFunction(*mut NativeFunctionData);

impl NativeFunction {
    pub(crate) fn try_from(v: Value) -> Option<NativeFunction> {
        if v.is(InternalKind::NativeFunction) {
            Some(NativeFunction(v.heap_ptr().unwrap() as *mut NativeFunctionData))
        } else {
            None
        }
    }

    /// `name` (a string) and `closure` must be rooted by the caller.
    pub(crate) fn new(
        vm: &mut Vm,
        name: Value,
        closure: Value,
        params: u32,
        locals: u32,
        callable: NativeCallable,
    ) -> VmResult<Value> {
        let ptr = vm.alloc_raw(
            InternalKind::NativeFunction,
            std::mem::size_of::<NativeFunctionData>(),
        )? as *mut NativeFunctionData;
        unsafe {
            (*ptr).name = name;
            (*ptr).closure = closure;
            (*ptr).params = params;
            (*ptr).locals = locals;
            (*ptr).callable = callable;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn value(self) -> Value {
        Value::from_heap(self.0 as *mut Header)
    }

    pub(crate) fn name(self) -> Value {
        unsafe { (*self.0).name }
    }

    pub(crate) fn closure(self) -> Value {
        unsafe { (*self.0).closure }
    }

    pub(crate) fn params(self) -> u32 {
        unsafe { (*self.0).params }
    }

    pub(crate) fn locals(self) -> u32 {
        unsafe { (*self.0).locals }
    }

    pub(crate) fn callable(self) -> NativeCallable {
        unsafe { (*self.0).callable }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut NativeFunctionData;
        unsafe {
            f((*data).name);
            f((*data).closure);
        }
    }
}

#[repr(C)]
pub(crate) struct BoundMethodData {
    pub(crate) header: Header,
    function: Value,
    receiver: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct BoundMethod(*mut BoundMethodData);

impl BoundMethod {
    pub(crate) fn try_from(v: Value) -> Option<BoundMethod> {
        if v.is(InternalKind::BoundMethod) {
            Some(BoundMethod(v.heap_ptr().unwrap() as *mut BoundMethodData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, function: Value, receiver: Value) -> VmResult<Value> {
        let _function_root = vm.temp_root(function);
        let _receiver_root = vm.temp_root(receiver);
        let ptr = vm.alloc_raw(
            InternalKind::BoundMethod,
            std::mem::size_of::<BoundMethodData>(),
        )? as *mut BoundMethodData;
        unsafe {
            (*ptr).function = function;
            (*ptr).receiver = receiver;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn function(self) -> Value {
        unsafe { (*self.0).function }
    }

    pub(crate) fn receiver(self) -> Value {
        unsafe { (*self.0).receiver }
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut BoundMethodData;
        unsafe {
            f((*data).function);
            f((*data).receiver);
        }
    }
}

/// True for every value the interpreter accepts as a call target.
pub(crate) fn is_callable(v: Value) -> bool {
    matches!(
        v.internal_kind(),
        InternalKind::Function | InternalKind::NativeFunction | InternalKind::BoundMethod
    )
}
