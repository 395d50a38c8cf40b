//! Native function calling conventions
//!
//! Three public conventions share the `NativeFunction` object:
//!
//! - **Sync**: runs to completion inside the interpreter step. Gets a
//!   borrowed [`SyncContext`]; returns a value or a [`Panic`]. Cannot call
//!   back into user code.
//! - **Async**: the initiating call captures an [`AsyncResumer`]; the
//!   coroutine suspends until the host delivers a result (or panic)
//!   through it, at most once. Dropping the resumer without resolving
//!   leaves the coroutine waiting (host-driven cancellation); VM teardown
//!   releases such frames without delivering a result.
//! - **Resumable**: a state machine re-entered with its frame state. It
//!   can transition states, invoke another function (and observe its
//!   return), yield to the host, or finish. `START`/`END`/`CLEANUP` are
//!   well known; the frame always observes one final `CLEANUP` call, in
//!   which returns, panics and further transitions are forbidden.
//!
//! A fourth, crate-internal convention (`Magic`) implements the handful
//! of primitives that must manipulate interpreter state directly
//! (`yield_coroutine`, `dispatch`, `catch_panic`).

use crate::error::{Error, ErrorKind, VmResult};
use crate::handles::Global;
use crate::objects::coroutine::{Coroutine, CoroutineState};
use crate::objects::coroutine_stack::{
    AsyncFrame, CoroutineStack, FrameFlags, FrameHeader, ResumableFrame,
    RESUMABLE_STATE_CLEANUP, RESUMABLE_STATE_END,
};
use crate::objects::function::is_callable;
use crate::objects::result::Exception;
use crate::objects::string::Str;
use crate::value::Value;
use crate::vm::Vm;

/// Parameter count marking a variadic native function: the interpreter
/// skips the arity check and passes whatever was on the stack.
pub const VARIADIC: u32 = u32::MAX;

/// A script-level panic: an exception value in flight.
///
/// A null payload means the exception itself could not be allocated; the
/// unwinder substitutes the VM's preallocated out-of-memory exception.
pub struct Panic(pub(crate) Value);

impl Panic {
    /// Panic with an existing exception (or arbitrary) value.
    pub fn from_value(value: Value) -> Panic {
        Panic(value)
    }

    /// Panic with a fresh exception carrying `message`.
    pub fn msg(vm: &mut Vm, message: &str) -> Panic {
        let exception = Str::new(vm, message)
            .and_then(|text| {
                let _text_root = vm.temp_root(text);
                Exception::new(vm, text)
            })
            .unwrap_or(Value::null());
        Panic(exception)
    }
}

pub type SyncFn = fn(&mut SyncContext<'_>) -> Result<Value, Panic>;
pub type AsyncFn = fn(&mut AsyncContext<'_>);
pub type ResumableFn = fn(&mut ResumableContext<'_>) -> Result<(), Panic>;

/// Interpreter-internal primitives exposed as native functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MagicFn {
    /// Reschedule the running coroutine at the back of the ready queue.
    Yield,
    /// Alias of `Yield` for event-loop style code.
    Dispatch,
    /// Push a catch frame and call the wrapped function; returns a result
    /// value instead of propagating panics.
    CatchPanic,
}

#[derive(Clone, Copy)]
pub(crate) enum NativeCallable {
    Sync(SyncFn),
    Async(AsyncFn),
    Resumable(ResumableFn),
    Magic(MagicFn),
}

fn frame_args(frame: *mut FrameHeader) -> (u32, *mut Value) {
    unsafe { ((*frame).args, CoroutineStack::args_begin(frame)) }
}

/// Read-only call context of a sync native function.
pub struct SyncContext<'a> {
    vm: &'a mut Vm,
    coroutine: Value,
    closure: Value,
    frame: *mut FrameHeader,
}

impl<'a> SyncContext<'a> {
    pub(crate) fn new(
        vm: &'a mut Vm,
        coroutine: Value,
        closure: Value,
        frame: *mut FrameHeader,
    ) -> SyncContext<'a> {
        SyncContext {
            vm,
            coroutine,
            closure,
            frame,
        }
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    /// The running coroutine object.
    pub fn coroutine(&self) -> Value {
        self.coroutine
    }

    pub fn arg_count(&self) -> usize {
        frame_args(self.frame).0 as usize
    }

    /// The i-th argument. Rooted by the coroutine stack for the duration
    /// of the call.
    pub fn arg(&self, index: usize) -> Value {
        let (count, begin) = frame_args(self.frame);
        assert!(index < count as usize, "argument index out of bounds");
        unsafe { *begin.add(index) }
    }

    /// The closure value the function was created with, or null.
    pub fn closure(&self) -> Value {
        self.closure
    }

    /// Build a panic with a message.
    pub fn panic(&mut self, message: &str) -> Panic {
        Panic::msg(self.vm, message)
    }
}

/// Call context of an async native function's initiating call.
pub struct AsyncContext<'a> {
    vm: &'a mut Vm,
    coroutine: Value,
    closure: Value,
    frame: *mut FrameHeader,
}

impl<'a> AsyncContext<'a> {
    pub(crate) fn new(
        vm: &'a mut Vm,
        coroutine: Value,
        closure: Value,
        frame: *mut FrameHeader,
    ) -> AsyncContext<'a> {
        AsyncContext {
            vm,
            coroutine,
            closure,
            frame,
        }
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    pub fn arg_count(&self) -> usize {
        frame_args(self.frame).0 as usize
    }

    pub fn arg(&self, index: usize) -> Value {
        let (count, begin) = frame_args(self.frame);
        assert!(index < count as usize, "argument index out of bounds");
        unsafe { *begin.add(index) }
    }

    pub fn closure(&self) -> Value {
        self.closure
    }

    /// The ticket used to complete this frame later. May be taken at most
    /// once.
    pub fn resumer(&mut self) -> AsyncResumer {
        AsyncResumer {
            coroutine: Global::new(self.vm, self.coroutine),
        }
    }
}

/// Owning completion handle for a suspended async frame.
///
/// The resumer never holds raw frame pointers: it roots the coroutine and
/// re-locates the (topmost) async frame at completion time, so stack
/// growth cannot invalidate it.
pub struct AsyncResumer {
    coroutine: Global,
}

impl AsyncResumer {
    pub fn return_value(self, vm: &mut Vm, value: Value) -> VmResult<()> {
        self.complete(vm, value, false)
    }

    pub fn panic_msg(self, vm: &mut Vm, message: &str) -> VmResult<()> {
        let panic = Panic::msg(vm, message);
        self.complete(vm, panic.0, true)
    }

    pub fn panic(self, vm: &mut Vm, exception: Value) -> VmResult<()> {
        self.complete(vm, exception, true)
    }

    fn complete(self, vm: &mut Vm, value: Value, is_panic: bool) -> VmResult<()> {
        if self.coroutine.vm_id() != vm.id() {
            return Err(Error::bad_handle());
        }
        let coroutine_value = self.coroutine.get();
        let coroutine = Coroutine::try_from(coroutine_value)
            .ok_or(Error::new(ErrorKind::Internal, "resumer lost its coroutine"))?;

        let frame = match coroutine.state() {
            // Completing from inside the initiating call: the coroutine is
            // still running; actual resumption happens on the next
            // scheduler iteration.
            CoroutineState::Running | CoroutineState::Waiting => {
                let stack = CoroutineStack::try_from(coroutine.stack()).ok_or(Error::new(
                    ErrorKind::BadState,
                    "coroutine has no live stack",
                ))?;
                let frame = stack.top_frame();
                let is_async = !frame.is_null()
                    && unsafe { FrameHeader::kind(frame) }
                        == crate::objects::coroutine_stack::FrameKind::Async;
                if !is_async {
                    return Err(Error::new(
                        ErrorKind::BadState,
                        "coroutine is not suspended in an async call",
                    ));
                }
                frame as *mut AsyncFrame
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::BadState,
                    "coroutine is not suspended in an async call",
                ));
            }
        };

        unsafe {
            let header = frame as *mut FrameHeader;
            if FrameHeader::has_flag(header, FrameFlags::ASYNC_RESUMED) {
                return Err(Error::new(
                    ErrorKind::BadState,
                    "async frame was already resumed",
                ));
            }
            (*frame).result = value;
            FrameHeader::set_flag(header, FrameFlags::ASYNC_RESUMED);
            if is_panic {
                FrameHeader::set_flag(header, FrameFlags::UNWINDING);
            }
        }

        if coroutine.state() == CoroutineState::Waiting {
            crate::scheduler::make_ready(vm, coroutine_value);
        }
        Ok(())
    }
}

/// Call context of a resumable native function. Each entry observes the
/// current frame state and may request at most one continuation action.
pub struct ResumableContext<'a> {
    vm: &'a mut Vm,
    coroutine: Value,
    closure: Value,
    frame: *mut ResumableFrame,
}

impl<'a> ResumableContext<'a> {
    pub(crate) fn new(
        vm: &'a mut Vm,
        coroutine: Value,
        closure: Value,
        frame: *mut ResumableFrame,
    ) -> ResumableContext<'a> {
        ResumableContext {
            vm,
            coroutine,
            closure,
            frame,
        }
    }

    fn header(&self) -> *mut FrameHeader {
        self.frame as *mut FrameHeader
    }

    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    pub fn coroutine(&self) -> Value {
        self.coroutine
    }

    pub fn state(&self) -> i64 {
        unsafe { (*self.frame).state }
    }

    fn check_mutable(&self) -> VmResult<()> {
        if self.state() == RESUMABLE_STATE_CLEANUP {
            return Err(Error::new(
                ErrorKind::BadState,
                "resumable frame cannot act during cleanup",
            ));
        }
        Ok(())
    }

    /// Transition to a user state (any non-negative integer).
    pub fn set_state(&mut self, state: i64) -> VmResult<()> {
        self.check_mutable()?;
        if state < 0 {
            return Err(Error::new(
                ErrorKind::BadArg,
                "user states must be non-negative",
            ));
        }
        unsafe {
            (*self.frame).state = state;
        }
        Ok(())
    }

    pub fn arg_count(&self) -> usize {
        frame_args(self.header()).0 as usize
    }

    pub fn arg(&self, index: usize) -> Value {
        let (count, begin) = frame_args(self.header());
        assert!(index < count as usize, "argument index out of bounds");
        unsafe { *begin.add(index) }
    }

    pub fn closure(&self) -> Value {
        self.closure
    }

    pub fn local_count(&self) -> usize {
        unsafe { (*self.header()).locals as usize }
    }

    /// Frame-local slot; rooted with the frame.
    pub fn local(&self, index: usize) -> Value {
        assert!(index < self.local_count(), "local index out of bounds");
        unsafe { *CoroutineStack::local(self.header(), index as u32) }
    }

    pub fn set_local(&mut self, index: usize, value: Value) {
        assert!(index < self.local_count(), "local index out of bounds");
        unsafe {
            *CoroutineStack::local(self.header(), index as u32) = value;
        }
    }

    /// Finish with `value`. The frame transitions to `END` and receives a
    /// final `CLEANUP` call before it is popped.
    pub fn return_value(&mut self, value: Value) -> VmResult<()> {
        self.check_mutable()?;
        unsafe {
            (*self.frame).result = value;
            (*self.frame).state = RESUMABLE_STATE_END;
        }
        Ok(())
    }

    /// Invoke `function` with the values of the `arguments` tuple (null
    /// means no arguments). The interpreter runs the callee; when it
    /// returns, this frame is re-entered in `next_state` and
    /// [`ResumableContext::invoke_return`] yields the result.
    pub fn invoke(&mut self, next_state: i64, function: Value, arguments: Value) -> VmResult<()> {
        self.check_mutable()?;
        if next_state < 0 {
            return Err(Error::new(
                ErrorKind::BadArg,
                "user states must be non-negative",
            ));
        }
        if !is_callable(function) {
            return Err(Error::new(ErrorKind::BadType, "invoke target is not callable"));
        }
        if !arguments.is_null()
            && crate::objects::array::Tuple::try_from(arguments).is_none()
        {
            return Err(Error::new(
                ErrorKind::BadType,
                "invoke arguments must be a tuple or null",
            ));
        }
        unsafe {
            (*self.frame).invoke_func = function;
            (*self.frame).invoke_args = arguments;
            (*self.frame).state = next_state;
            FrameHeader::set_flag(self.header(), FrameFlags::RESUMABLE_INVOKE);
        }
        Ok(())
    }

    /// Result of the most recent completed invocation.
    pub fn invoke_return(&self) -> Value {
        let stack = CoroutineStack::try_from(
            Coroutine::try_from(self.coroutine)
                .expect("context coroutine is valid")
                .stack(),
        )
        .expect("running coroutine has a stack");
        debug_assert!(stack.top_value_count() > 0, "no invocation result available");
        stack.top_value()
    }

    /// A single-use token naming this suspension, for host-driven resume
    /// after a manual yield (returning without any requested action).
    pub fn token(&mut self) -> VmResult<Value> {
        crate::scheduler::coroutine_token(self.vm, self.coroutine)
    }

    pub fn panic(&mut self, message: &str) -> Panic {
        Panic::msg(self.vm, message)
    }
}

