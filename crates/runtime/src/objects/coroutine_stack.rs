//! Coroutine call & value stacks
//!
//! One contiguous byte buffer per coroutine holds call frames and plain
//! values in the same address space. The stack grows from bottom to top;
//! a frame is preceded by its arguments (which live in the caller's value
//! region) and followed by its locals and then its expression values.
//!
//! ```text
//!  |---------------|
//!  |  temp value   |   <- top of the stack
//!  |---------------|
//!  |    local N    |
//!  |---------------|
//!  |  CodeFrame 2  |
//!  |---------------|
//!  |  ... args ... |   <- caller's temporary values
//!  |---------------|
//!  |  CodeFrame 1  |   <- offset 0
//!  |---------------|
//! ```
//!
//! Frames link to their caller through raw pointers into the same buffer
//! and never into anything else. Growing therefore copies the raw bytes
//! into a larger stack object and rebases `top`, `top_frame` and every
//! `caller` pointer by the same delta; program counters are byte offsets
//! and need no adjustment.

use crate::error::VmResult;
use crate::heap::Header;
use crate::objects::function::{CodeFunctionTemplate, NativeFunction};
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;
use bitflags::bitflags;

/// Initial data capacity of a fresh stack.
pub(crate) const INITIAL_STACK_SIZE: usize = 1 << 9;
/// Largest data capacity a stack may grow to.
pub(crate) const MAX_STACK_SIZE: usize = 1 << 24;

const VALUE_SIZE: usize = std::mem::size_of::<Value>();

/// Resumable frame states with well-known meanings. User states are any
/// other non-negative integer.
pub const RESUMABLE_STATE_START: i64 = 0;
pub const RESUMABLE_STATE_END: i64 = -1;
pub const RESUMABLE_STATE_CLEANUP: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FrameKind {
    Code = 0,
    Async = 1,
    Sync = 2,
    Resumable = 3,
    Catch = 4,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct FrameFlags: u8 {
        /// One extra value below the arguments must be popped on return
        /// (the null receiver slot of a field call).
        const POP_ONE_MORE = 1 << 0;
        /// An exception is in flight through this frame.
        const UNWINDING = 1 << 1;
        /// The catch frame has already initiated its wrapped call.
        const CATCH_STARTED = 1 << 2;
        /// The async function's initiating call has run.
        const ASYNC_CALLED = 1 << 3;
        /// The async frame has received its result.
        const ASYNC_RESUMED = 1 << 4;
        /// The resumable frame requested a function invocation.
        const RESUMABLE_INVOKE = 1 << 5;
        /// The resumable frame has observed its CLEANUP call.
        const RESUMABLE_CLEANED = 1 << 6;
    }
}

/// Common prefix of every frame. Kind-specific tails follow.
#[repr(C)]
pub(crate) struct FrameHeader {
    kind: FrameKind,
    flags: u8,
    /// Argument values on the stack directly before this frame.
    pub(crate) args: u32,
    /// Local slots directly after this frame.
    pub(crate) locals: u32,
    /// Parent frame, or null for the first frame.
    pub(crate) caller: *mut FrameHeader,
}

impl FrameHeader {
    pub(crate) unsafe fn kind(ptr: *mut FrameHeader) -> FrameKind {
        unsafe { (*ptr).kind }
    }

    pub(crate) unsafe fn set_flag(ptr: *mut FrameHeader, flag: FrameFlags) {
        unsafe { (*ptr).flags |= flag.bits() }
    }

    pub(crate) unsafe fn clear_flag(ptr: *mut FrameHeader, flag: FrameFlags) {
        unsafe { (*ptr).flags &= !flag.bits() }
    }

    pub(crate) unsafe fn has_flag(ptr: *mut FrameHeader, flag: FrameFlags) -> bool {
        unsafe { (*ptr).flags & flag.bits() != 0 }
    }
}

#[repr(C)]
pub(crate) struct CodeFrame {
    pub(crate) base: FrameHeader,
    pub(crate) tmpl: Value,
    /// Closure environment, or null.
    pub(crate) closure: Value,
    /// In-flight exception; meaningful only while UNWINDING is set.
    pub(crate) current_exception: Value,
    /// Byte offset into the template's code.
    pub(crate) pc: usize,
}

#[repr(C)]
pub(crate) struct SyncFrame {
    pub(crate) base: FrameHeader,
    pub(crate) func: Value,
}

#[repr(C)]
pub(crate) struct AsyncFrame {
    pub(crate) base: FrameHeader,
    pub(crate) func: Value,
    /// Return value, or the panic exception when UNWINDING is set.
    pub(crate) result: Value,
}

#[repr(C)]
pub(crate) struct ResumableFrame {
    pub(crate) base: FrameHeader,
    pub(crate) func: Value,
    /// Return value, or the panic exception when UNWINDING is set.
    pub(crate) result: Value,
    /// Function to invoke next, or null.
    pub(crate) invoke_func: Value,
    /// Argument tuple for `invoke_func`, or null.
    pub(crate) invoke_args: Value,
    pub(crate) state: i64,
}

#[repr(C)]
pub(crate) struct CatchFrame {
    pub(crate) base: FrameHeader,
    /// The caught exception; meaningful only while UNWINDING is set.
    pub(crate) exception: Value,
}

fn frame_struct_size(kind: FrameKind) -> usize {
    match kind {
        FrameKind::Code => std::mem::size_of::<CodeFrame>(),
        FrameKind::Sync => std::mem::size_of::<SyncFrame>(),
        FrameKind::Async => std::mem::size_of::<AsyncFrame>(),
        FrameKind::Resumable => std::mem::size_of::<ResumableFrame>(),
        FrameKind::Catch => std::mem::size_of::<CatchFrame>(),
    }
}

#[repr(C)]
pub(crate) struct CoroutineStackData {
    pub(crate) header: Header,
    top_frame: *mut FrameHeader,
    top: *mut u8,
    end: *mut u8,
    // Data area follows inline.
}

/// Stack exhaustion signal; the interpreter grows the stack and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StackFull;

#[derive(Copy, Clone)]
pub(crate) struct CoroutineStack(*mut CoroutineStackData);

impl CoroutineStack {
    pub(crate) fn try_from(v: Value) -> Option<CoroutineStack> {
        if v.is(InternalKind::CoroutineStack) {
            Some(CoroutineStack(v.heap_ptr().unwrap() as *mut CoroutineStackData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, capacity: usize) -> VmResult<Value> {
        debug_assert!(capacity <= MAX_STACK_SIZE);
        let size = std::mem::size_of::<CoroutineStackData>() + capacity;
        let ptr = vm.alloc_raw(InternalKind::CoroutineStack, size)? as *mut CoroutineStackData;
        unsafe {
            let data = ptr.add(1) as *mut u8;
            (*ptr).top_frame = std::ptr::null_mut();
            (*ptr).top = data;
            (*ptr).end = data.add(capacity);
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    /// Copy `old` into a fresh stack of twice the capacity, rebasing all
    /// internal pointers. The old stack is left untouched; the caller
    /// stores the returned stack on the coroutine. Fails with `Alloc`
    /// when the maximum stack size is reached.
    pub(crate) fn grow(vm: &mut Vm, old_value: Value) -> VmResult<Value> {
        use crate::error::{Error, ErrorKind};

        let old = CoroutineStack::try_from(old_value).expect("grow expects a stack");
        let old_capacity = old.capacity();
        let new_capacity = (old_capacity * 2).max(INITIAL_STACK_SIZE);
        if new_capacity > MAX_STACK_SIZE {
            return Err(Error::new(
                ErrorKind::Alloc,
                "coroutine stack exceeds maximum size",
            ));
        }

        let _old_root = vm.temp_root(old_value);
        let new_value = CoroutineStack::new(vm, new_capacity)?;
        let new = CoroutineStack::try_from(new_value).unwrap();

        unsafe {
            let used = old.used();
            std::ptr::copy_nonoverlapping(old.data_start(), new.data_start(), used);
            let delta = new.data_start() as isize - old.data_start() as isize;

            (*new.0).top = new.data_start().add(used);
            (*new.0).top_frame = rebase(old.top_frame(), delta);

            // Frame caller chains point into the copied buffer; walk and
            // rebase each link.
            let mut frame = new.top_frame();
            while !frame.is_null() {
                (*frame).caller = rebase((*frame).caller, delta);
                frame = (*frame).caller;
            }
        }
        Ok(new_value)
    }

    pub(crate) fn value(self) -> Value {
        Value::from_heap(self.0 as *mut Header)
    }

    fn data_start(self) -> *mut u8 {
        unsafe { self.0.add(1) as *mut u8 }
    }

    pub(crate) fn capacity(self) -> usize {
        unsafe { (*self.0).end as usize - self.data_start() as usize }
    }

    pub(crate) fn used(self) -> usize {
        unsafe { (*self.0).top as usize - self.data_start() as usize }
    }

    pub(crate) fn available(self) -> usize {
        unsafe { (*self.0).end as usize - (*self.0).top as usize }
    }

    pub(crate) fn top_frame(self) -> *mut FrameHeader {
        unsafe { (*self.0).top_frame }
    }

    pub(crate) fn size_of(ptr: *mut Header) -> usize {
        let stack = CoroutineStack(ptr as *mut CoroutineStackData);
        std::mem::size_of::<CoroutineStackData>() + stack.capacity()
    }

    // --- value stack -----------------------------------------------------

    pub(crate) fn push_value(self, value: Value) -> Result<(), StackFull> {
        if self.available() < VALUE_SIZE {
            return Err(StackFull);
        }
        unsafe {
            let top = (*self.0).top as *mut Value;
            top.write(value);
            (*self.0).top = (top.add(1)) as *mut u8;
        }
        Ok(())
    }

    pub(crate) fn pop_value(self) -> Value {
        debug_assert!(self.top_value_count() > 0, "value stack underflow");
        unsafe {
            let top = ((*self.0).top as *mut Value).sub(1);
            (*self.0).top = top as *mut u8;
            top.read()
        }
    }

    pub(crate) fn pop_values(self, n: usize) {
        debug_assert!(self.top_value_count() >= n as u32, "value stack underflow");
        unsafe {
            (*self.0).top = ((*self.0).top as *mut Value).sub(n) as *mut u8;
        }
    }

    /// Pointer to the n-th topmost value (0 is the top).
    pub(crate) fn top_value_at(self, n: usize) -> *mut Value {
        debug_assert!(self.top_value_count() > n as u32);
        unsafe { ((*self.0).top as *mut Value).sub(n + 1) }
    }

    pub(crate) fn top_value(self) -> Value {
        unsafe { *self.top_value_at(0) }
    }

    /// Number of values on the current frame's value stack.
    pub(crate) fn top_value_count(self) -> u32 {
        unsafe {
            let begin = self.values_begin(self.top_frame());
            let end = (*self.0).top as *mut Value;
            (end as usize - begin as usize) as u32 / VALUE_SIZE as u32
        }
    }

    /// Shift the top `argc` values up one slot and place `value` below
    /// them. Used to prepend a bound method's receiver.
    pub(crate) fn insert_before_args(self, argc: usize, value: Value) -> Result<(), StackFull> {
        debug_assert!(self.top_value_count() >= argc as u32);
        if self.available() < VALUE_SIZE {
            return Err(StackFull);
        }
        unsafe {
            let top = (*self.0).top as *mut Value;
            let args_begin = top.sub(argc);
            std::ptr::copy(args_begin, args_begin.add(1), argc);
            args_begin.write(value);
            (*self.0).top = top.add(1) as *mut u8;
        }
        Ok(())
    }

    // --- frame stack -----------------------------------------------------

    fn allocate_frame(self, struct_size: usize, locals: u32) -> Option<*mut u8> {
        let total = struct_size + locals as usize * VALUE_SIZE;
        if self.available() < total {
            return None;
        }
        unsafe {
            let frame = (*self.0).top;
            (*self.0).top = frame.add(total);
            // Locals start null so the collector sees valid values.
            let slots = frame.add(struct_size) as *mut Value;
            for i in 0..locals as usize {
                slots.add(i).write(Value::null());
            }
            Some(frame)
        }
    }

    unsafe fn link_frame(self, frame: *mut FrameHeader) {
        unsafe {
            (*frame).caller = self.top_frame();
            (*self.0).top_frame = frame;
        }
    }

    /// Push a call frame for a user function. The top `tmpl.params()`
    /// values are the call arguments.
    pub(crate) fn push_code_frame(
        self,
        tmpl: CodeFunctionTemplate,
        closure: Value,
        flags: FrameFlags,
    ) -> Result<(), StackFull> {
        debug_assert!(self.top_value_count() >= tmpl.params());
        let frame = self
            .allocate_frame(std::mem::size_of::<CodeFrame>(), tmpl.locals())
            .ok_or(StackFull)? as *mut CodeFrame;
        unsafe {
            (*frame).base = FrameHeader {
                kind: FrameKind::Code,
                flags: flags.bits(),
                args: tmpl.params(),
                locals: tmpl.locals(),
                caller: std::ptr::null_mut(),
            };
            (*frame).tmpl = tmpl.value();
            (*frame).closure = closure;
            (*frame).current_exception = Value::null();
            (*frame).pc = 0;
            self.link_frame(frame as *mut FrameHeader);
        }
        Ok(())
    }

    pub(crate) fn push_sync_frame(
        self,
        func: NativeFunction,
        argc: u32,
        flags: FrameFlags,
    ) -> Result<(), StackFull> {
        debug_assert!(self.top_value_count() >= argc);
        let frame = self
            .allocate_frame(std::mem::size_of::<SyncFrame>(), 0)
            .ok_or(StackFull)? as *mut SyncFrame;
        unsafe {
            (*frame).base = FrameHeader {
                kind: FrameKind::Sync,
                flags: flags.bits(),
                args: argc,
                locals: 0,
                caller: std::ptr::null_mut(),
            };
            (*frame).func = func.value();
            self.link_frame(frame as *mut FrameHeader);
        }
        Ok(())
    }

    pub(crate) fn push_async_frame(
        self,
        func: NativeFunction,
        argc: u32,
        flags: FrameFlags,
    ) -> Result<(), StackFull> {
        debug_assert!(self.top_value_count() >= argc);
        let frame = self
            .allocate_frame(std::mem::size_of::<AsyncFrame>(), 0)
            .ok_or(StackFull)? as *mut AsyncFrame;
        unsafe {
            (*frame).base = FrameHeader {
                kind: FrameKind::Async,
                flags: flags.bits(),
                args: argc,
                locals: 0,
                caller: std::ptr::null_mut(),
            };
            (*frame).func = func.value();
            (*frame).result = Value::null();
            self.link_frame(frame as *mut FrameHeader);
        }
        Ok(())
    }

    pub(crate) fn push_resumable_frame(
        self,
        func: NativeFunction,
        argc: u32,
        flags: FrameFlags,
    ) -> Result<(), StackFull> {
        debug_assert!(self.top_value_count() >= argc);
        let frame = self
            .allocate_frame(std::mem::size_of::<ResumableFrame>(), func.locals())
            .ok_or(StackFull)? as *mut ResumableFrame;
        unsafe {
            (*frame).base = FrameHeader {
                kind: FrameKind::Resumable,
                flags: flags.bits(),
                args: argc,
                locals: func.locals(),
                caller: std::ptr::null_mut(),
            };
            (*frame).func = func.value();
            (*frame).result = Value::null();
            (*frame).invoke_func = Value::null();
            (*frame).invoke_args = Value::null();
            (*frame).state = RESUMABLE_STATE_START;
            self.link_frame(frame as *mut FrameHeader);
        }
        Ok(())
    }

    /// Push a catch frame over `argc` already-pushed values (the wrapped
    /// function).
    pub(crate) fn push_catch_frame(self, argc: u32, flags: FrameFlags) -> Result<(), StackFull> {
        debug_assert!(self.top_value_count() >= argc);
        let frame = self
            .allocate_frame(std::mem::size_of::<CatchFrame>(), 0)
            .ok_or(StackFull)? as *mut CatchFrame;
        unsafe {
            (*frame).base = FrameHeader {
                kind: FrameKind::Catch,
                flags: flags.bits(),
                args: argc,
                locals: 0,
                caller: std::ptr::null_mut(),
            };
            (*frame).exception = Value::null();
            self.link_frame(frame as *mut FrameHeader);
        }
        Ok(())
    }

    /// Remove the top frame, collapsing its locals, value stack and
    /// arguments.
    pub(crate) fn pop_frame(self) {
        let frame = self.top_frame();
        debug_assert!(!frame.is_null(), "no frame to pop");
        unsafe {
            (*self.0).top = Self::args_begin(frame) as *mut u8;
            (*self.0).top_frame = (*frame).caller;
        }
    }

    // --- frame regions ---------------------------------------------------

    pub(crate) fn args_begin(frame: *mut FrameHeader) -> *mut Value {
        unsafe { (frame as *mut Value).sub((*frame).args as usize) }
    }

    pub(crate) fn arg(frame: *mut FrameHeader, index: u32) -> *mut Value {
        unsafe {
            debug_assert!(index < (*frame).args);
            Self::args_begin(frame).add(index as usize)
        }
    }

    pub(crate) fn locals_begin(frame: *mut FrameHeader) -> *mut Value {
        unsafe {
            let size = frame_struct_size(FrameHeader::kind(frame));
            (frame as *mut u8).add(size) as *mut Value
        }
    }

    pub(crate) fn local(frame: *mut FrameHeader, index: u32) -> *mut Value {
        unsafe {
            debug_assert!(index < (*frame).locals);
            Self::locals_begin(frame).add(index as usize)
        }
    }

    fn locals_end(frame: *mut FrameHeader) -> *mut Value {
        unsafe { Self::locals_begin(frame).add((*frame).locals as usize) }
    }

    /// First value of the frame's expression stack (after its locals), or
    /// the bottom of the buffer for the region before the first frame.
    fn values_begin(self, frame: *mut FrameHeader) -> *mut Value {
        if frame.is_null() {
            self.data_start() as *mut Value
        } else {
            Self::locals_end(frame)
        }
    }

    // --- tracing ---------------------------------------------------------

    /// Visit every live value slot: per-frame locals plus expression
    /// values, the frame-internal value fields, and the region before the
    /// first frame. Arguments are visited as part of the caller's region.
    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let stack = CoroutineStack(ptr as *mut CoroutineStackData);
        unsafe {
            let mut region_end = (*stack.0).top as *mut Value;
            let mut frame = stack.top_frame();
            while !frame.is_null() {
                // Locals plus expression values; arguments belong to the
                // caller's region and are visited there.
                let mut slot = Self::locals_begin(frame);
                while slot < region_end {
                    f(*slot);
                    slot = slot.add(1);
                }

                match FrameHeader::kind(frame) {
                    FrameKind::Code => {
                        let code = frame as *mut CodeFrame;
                        f((*code).tmpl);
                        f((*code).closure);
                        f((*code).current_exception);
                    }
                    FrameKind::Sync => {
                        let sync = frame as *mut SyncFrame;
                        f((*sync).func);
                    }
                    FrameKind::Async => {
                        let async_ = frame as *mut AsyncFrame;
                        f((*async_).func);
                        f((*async_).result);
                    }
                    FrameKind::Resumable => {
                        let res = frame as *mut ResumableFrame;
                        f((*res).func);
                        f((*res).result);
                        f((*res).invoke_func);
                        f((*res).invoke_args);
                    }
                    FrameKind::Catch => {
                        let catch = frame as *mut CatchFrame;
                        f((*catch).exception);
                    }
                }

                region_end = frame as *mut Value;
                frame = (*frame).caller;
            }

            // Values before the first frame.
            let mut slot = stack.data_start() as *mut Value;
            while slot < region_end {
                f(*slot);
                slot = slot.add(1);
            }
        }
    }
}

unsafe fn rebase(ptr: *mut FrameHeader, delta: isize) -> *mut FrameHeader {
    if ptr.is_null() {
        ptr
    } else {
        (ptr as *mut u8).wrapping_offset(delta) as *mut FrameHeader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Scope;
    use crate::objects::function::{Code, CodeFunctionTemplate};
    use crate::vm::Vm;

    /// Build a template value; the caller roots it.
    fn test_template(vm: &mut Vm, params: u32, locals: u32) -> Value {
        let scope = Scope::new(vm);
        let name = scope.local(vm.make_string("t").unwrap());
        let code = scope.local(Code::new(vm, &[0x01, 0x45]).unwrap());
        CodeFunctionTemplate::new(vm, name.get(), Value::null(), code.get(), params, locals)
            .unwrap()
    }

    #[test]
    fn test_push_and_pop_values() {
        let mut vm = Vm::new().unwrap();
        let scope = Scope::new(&vm);
        let stack_value = scope.local(CoroutineStack::new(&mut vm, INITIAL_STACK_SIZE).unwrap());
        let stack = CoroutineStack::try_from(stack_value.get()).unwrap();

        assert_eq!(stack.top_value_count(), 0);
        stack.push_value(Value::small_int(1)).unwrap();
        stack.push_value(Value::small_int(2)).unwrap();
        assert_eq!(stack.top_value_count(), 2);
        assert_eq!(stack.top_value().as_small_int(), Some(2));
        assert_eq!(stack.pop_value().as_small_int(), Some(2));
        assert_eq!(stack.pop_value().as_small_int(), Some(1));
        assert_eq!(stack.top_value_count(), 0);
    }

    #[test]
    fn test_push_value_reports_exhaustion() {
        let mut vm = Vm::new().unwrap();
        let scope = Scope::new(&vm);
        let stack_value = scope.local(CoroutineStack::new(&mut vm, 64).unwrap());
        let stack = CoroutineStack::try_from(stack_value.get()).unwrap();

        for i in 0..8 {
            stack.push_value(Value::small_int(i)).unwrap();
        }
        assert_eq!(stack.push_value(Value::null()), Err(StackFull));
    }

    #[test]
    fn test_code_frame_layout() {
        let mut vm = Vm::new().unwrap();
        let scope = Scope::new(&vm);
        let tmpl_value = scope.local(test_template(&mut vm, 2, 3));
        let tmpl = CodeFunctionTemplate::try_from(tmpl_value.get()).unwrap();
        let stack_value = scope.local(CoroutineStack::new(&mut vm, INITIAL_STACK_SIZE).unwrap());
        let stack = CoroutineStack::try_from(stack_value.get()).unwrap();

        stack.push_value(Value::small_int(10)).unwrap();
        stack.push_value(Value::small_int(20)).unwrap();
        stack
            .push_code_frame(tmpl, Value::null(), FrameFlags::empty())
            .unwrap();

        let frame = stack.top_frame();
        assert!(!frame.is_null());
        unsafe {
            assert_eq!(FrameHeader::kind(frame), FrameKind::Code);
            assert_eq!((*frame).args, 2);
            assert_eq!((*frame).locals, 3);
            assert_eq!((*CoroutineStack::arg(frame, 0)).as_small_int(), Some(10));
            assert_eq!((*CoroutineStack::arg(frame, 1)).as_small_int(), Some(20));
            // Locals start null.
            for i in 0..3 {
                assert!((*CoroutineStack::local(frame, i)).is_null());
            }
        }

        // A fresh frame has an empty expression stack.
        assert_eq!(stack.top_value_count(), 0);
        stack.push_value(Value::small_int(7)).unwrap();
        assert_eq!(stack.top_value_count(), 1);

        // Popping the frame collapses locals, values and arguments.
        stack.pop_frame();
        assert!(stack.top_frame().is_null());
        assert_eq!(stack.top_value_count(), 0);
    }

    #[test]
    fn test_grow_rebases_frames_and_preserves_contents() {
        let mut vm = Vm::new().unwrap();
        let scope = Scope::new(&vm);
        let tmpl_value = scope.local(test_template(&mut vm, 1, 1));
        let tmpl = CodeFunctionTemplate::try_from(tmpl_value.get()).unwrap();
        let stack_value = scope.local(CoroutineStack::new(&mut vm, INITIAL_STACK_SIZE).unwrap());
        let stack = CoroutineStack::try_from(stack_value.get()).unwrap();

        // Two nested frames with a value in between.
        stack.push_value(Value::small_int(1)).unwrap();
        stack
            .push_code_frame(tmpl, Value::null(), FrameFlags::empty())
            .unwrap();
        stack.push_value(Value::small_int(2)).unwrap();
        stack
            .push_code_frame(tmpl, Value::null(), FrameFlags::empty())
            .unwrap();
        stack.push_value(Value::small_int(3)).unwrap();

        let grown_value = scope.local(CoroutineStack::grow(&mut vm, stack_value.get()).unwrap());
        let grown = CoroutineStack::try_from(grown_value.get()).unwrap();

        assert_eq!(grown.capacity(), 2 * INITIAL_STACK_SIZE);
        assert_eq!(grown.used(), stack.used());

        let inner = grown.top_frame();
        unsafe {
            // Caller chain points into the new buffer.
            let data_range = grown.data_start() as usize
                ..grown.data_start() as usize + grown.capacity();
            assert!(data_range.contains(&(inner as usize)));
            let outer = (*inner).caller;
            assert!(data_range.contains(&(outer as usize)));
            assert!((*outer).caller.is_null());

            assert_eq!((*CoroutineStack::arg(inner, 0)).as_small_int(), Some(2));
            assert_eq!((*CoroutineStack::arg(outer, 0)).as_small_int(), Some(1));
        }
        assert_eq!(grown.top_value().as_small_int(), Some(3));
    }

    #[test]
    fn test_insert_before_args() {
        let mut vm = Vm::new().unwrap();
        let scope = Scope::new(&vm);
        let stack_value = scope.local(CoroutineStack::new(&mut vm, INITIAL_STACK_SIZE).unwrap());
        let stack = CoroutineStack::try_from(stack_value.get()).unwrap();

        stack.push_value(Value::small_int(1)).unwrap();
        stack.push_value(Value::small_int(2)).unwrap();
        stack.insert_before_args(2, Value::small_int(99)).unwrap();

        assert_eq!(stack.pop_value().as_small_int(), Some(2));
        assert_eq!(stack.pop_value().as_small_int(), Some(1));
        assert_eq!(stack.pop_value().as_small_int(), Some(99));
    }
}
