//! Coroutine objects and resume tokens
//!
//! A coroutine is a user-mode fiber: an entry function, an argument tuple,
//! its own stack, a lifecycle state and (once done) a result value. Ready
//! coroutines form an intrusive singly-linked queue through `next_ready`.
//!
//! A token names one suspension of one coroutine. It is single-use: the
//! coroutine clears its current token when it suspends anew or resumes, so
//! stale tokens fail fast instead of resuming the wrong suspension.

use crate::error::VmResult;
use crate::heap::Header;
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;

/// Coroutine lifecycle.
///
/// ```text
/// New --(start)--> Ready --(scheduled)--> Running --(yield)--> Waiting
///                    ^                                            |
///                    +----------------- (resumed) ----------------+
/// Running --(complete)--> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    New,
    Ready,
    Running,
    Waiting,
    Done,
}

impl CoroutineState {
    fn from_u64(raw: u64) -> CoroutineState {
        match raw {
            0 => CoroutineState::New,
            1 => CoroutineState::Ready,
            2 => CoroutineState::Running,
            3 => CoroutineState::Waiting,
            _ => CoroutineState::Done,
        }
    }
}

#[repr(C)]
pub(crate) struct CoroutineData {
    pub(crate) header: Header,
    name: Value,
    function: Value,
    /// Argument tuple, or null.
    arguments: Value,
    /// CoroutineStack, or null once done.
    stack: Value,
    /// Result object, null until done.
    result: Value,
    /// Completion callback payload (native object), or null.
    callback: Value,
    /// Next coroutine in the ready queue.
    next_ready: Value,
    /// Currently valid resume token, or null.
    current_token: Value,
    state: u64,
}

#[derive(Copy, Clone)]
pub(crate) struct Coroutine(*mut CoroutineData);

impl Coroutine {
    pub(crate) fn try_from(v: Value) -> Option<Coroutine> {
        if v.is(InternalKind::Coroutine) {
            Some(Coroutine(v.heap_ptr().unwrap() as *mut CoroutineData))
        } else {
            None
        }
    }

    /// All argument values must be rooted by the caller.
    pub(crate) fn new(
        vm: &mut Vm,
        name: Value,
        function: Value,
        arguments: Value,
        stack: Value,
    ) -> VmResult<Value> {
        let ptr = vm.alloc_raw(InternalKind::Coroutine, std::mem::size_of::<CoroutineData>())?
            as *mut CoroutineData;
        unsafe {
            (*ptr).name = name;
            (*ptr).function = function;
            (*ptr).arguments = arguments;
            (*ptr).stack = stack;
            (*ptr).result = Value::null();
            (*ptr).callback = Value::null();
            (*ptr).next_ready = Value::null();
            (*ptr).current_token = Value::null();
            (*ptr).state = 0;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn name(self) -> Value {
        unsafe { (*self.0).name }
    }

    pub(crate) fn function(self) -> Value {
        unsafe { (*self.0).function }
    }

    pub(crate) fn arguments(self) -> Value {
        unsafe { (*self.0).arguments }
    }

    pub(crate) fn stack(self) -> Value {
        unsafe { (*self.0).stack }
    }

    pub(crate) fn set_stack(self, stack: Value) {
        unsafe { (*self.0).stack = stack }
    }

    pub(crate) fn result(self) -> Value {
        unsafe { (*self.0).result }
    }

    pub(crate) fn set_result(self, result: Value) {
        unsafe { (*self.0).result = result }
    }

    pub(crate) fn callback(self) -> Value {
        unsafe { (*self.0).callback }
    }

    pub(crate) fn set_callback(self, callback: Value) {
        unsafe { (*self.0).callback = callback }
    }

    pub(crate) fn next_ready(self) -> Value {
        unsafe { (*self.0).next_ready }
    }

    pub(crate) fn set_next_ready(self, next: Value) {
        unsafe { (*self.0).next_ready = next }
    }

    pub(crate) fn current_token(self) -> Value {
        unsafe { (*self.0).current_token }
    }

    pub(crate) fn set_current_token(self, token: Value) {
        unsafe { (*self.0).current_token = token }
    }

    pub(crate) fn state(self) -> CoroutineState {
        unsafe { CoroutineState::from_u64((*self.0).state) }
    }

    pub(crate) fn set_state(self, state: CoroutineState) {
        unsafe { (*self.0).state = state as u64 }
    }

    pub(crate) fn started(self) -> bool {
        self.state() != CoroutineState::New
    }

    pub(crate) fn completed(self) -> bool {
        self.state() == CoroutineState::Done
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut CoroutineData;
        unsafe {
            f((*data).name);
            f((*data).function);
            f((*data).arguments);
            f((*data).stack);
            f((*data).result);
            f((*data).callback);
            f((*data).next_ready);
            f((*data).current_token);
        }
    }
}

#[repr(C)]
pub(crate) struct CoroutineTokenData {
    pub(crate) header: Header,
    coroutine: Value,
}

#[derive(Copy, Clone)]
pub(crate) struct CoroutineToken(*mut CoroutineTokenData);

impl CoroutineToken {
    pub(crate) fn try_from(v: Value) -> Option<CoroutineToken> {
        if v.is(InternalKind::CoroutineToken) {
            Some(CoroutineToken(v.heap_ptr().unwrap() as *mut CoroutineTokenData))
        } else {
            None
        }
    }

    pub(crate) fn new(vm: &mut Vm, coroutine: Value) -> VmResult<Value> {
        let _coroutine_root = vm.temp_root(coroutine);
        let ptr = vm.alloc_raw(
            InternalKind::CoroutineToken,
            std::mem::size_of::<CoroutineTokenData>(),
        )? as *mut CoroutineTokenData;
        unsafe {
            (*ptr).coroutine = coroutine;
            Ok(Value::from_heap(ptr as *mut Header))
        }
    }

    pub(crate) fn value(self) -> Value {
        Value::from_heap(self.0 as *mut Header)
    }

    pub(crate) fn coroutine(self) -> Value {
        unsafe { (*self.0).coroutine }
    }

    /// A token is valid while it is the coroutine's current token.
    pub(crate) fn is_current(self) -> bool {
        Coroutine::try_from(self.coroutine())
            .is_some_and(|co| co.current_token().same(self.value()))
    }

    pub(crate) unsafe fn trace(ptr: *mut Header, f: &mut dyn FnMut(Value)) {
        let data = ptr as *mut CoroutineTokenData;
        unsafe { f((*data).coroutine) }
    }
}
