//! Cooperative scheduler
//!
//! The VM keeps an intrusive FIFO queue of ready coroutines threaded
//! through the coroutine's `next_ready` field. [`run_ready`] drains the
//! queue: each coroutine runs until it yields (async native, explicit
//! yield, token pause) or finishes. Completion invokes the coroutine's
//! callback synchronously within the same `run_ready` call.
//!
//! Waiting coroutines are held in the VM's suspend set so they stay alive
//! without any host handle; they leave it when resumed through a token or
//! an async frame completion.

use crate::error::{Error, ErrorKind, VmResult};
use crate::interpreter::{self, RunOutcome};
use crate::objects::array::Tuple;
use crate::objects::coroutine::{Coroutine, CoroutineState, CoroutineToken};
use crate::objects::coroutine_stack::{CoroutineStack, INITIAL_STACK_SIZE};
use crate::objects::function::is_callable;
use crate::objects::native::NativeObject;
use crate::objects::string::Str;
use crate::value::Value;
use crate::vm::Vm;

const ERR_NOT_COROUTINE: Error = Error::new(ErrorKind::BadType, "expected a coroutine");

/// Completion callback payload stored on the coroutine as a native
/// object. The option guarantees at-most-once invocation; the native
/// object finalizer guarantees the closure is dropped at teardown if it
/// never ran.
pub(crate) struct CallbackPayload(Option<Box<dyn FnOnce(&mut Vm, Value)>>);

pub(crate) fn make_coroutine(vm: &mut Vm, function: Value, arguments: Value) -> VmResult<Value> {
    if !is_callable(function) {
        return Err(Error::new(ErrorKind::BadType, "coroutine entry is not callable"));
    }
    if !arguments.is_null() && Tuple::try_from(arguments).is_none() {
        return Err(Error::new(
            ErrorKind::BadType,
            "coroutine arguments must be a tuple or null",
        ));
    }

    let _function_root = vm.temp_root(function);
    let _arguments_root = vm.temp_root(arguments);

    vm.coroutine_counter += 1;
    let name = format!("coroutine-{}", vm.coroutine_counter);
    let name_value = Str::new(vm, &name)?;
    let _name_root = vm.temp_root(name_value);

    let stack = CoroutineStack::new(vm, INITIAL_STACK_SIZE)?;
    let _stack_root = vm.temp_root(stack);

    Coroutine::new(vm, name_value, function, arguments, stack)
}

/// Move a `New` coroutine to `Ready`: push the entry function and its
/// arguments onto the stack and enqueue.
pub(crate) fn start_coroutine(vm: &mut Vm, coroutine_value: Value) -> VmResult<()> {
    let coroutine = Coroutine::try_from(coroutine_value).ok_or(ERR_NOT_COROUTINE)?;
    if coroutine.state() != CoroutineState::New {
        return Err(Error::new(ErrorKind::BadState, "coroutine was already started"));
    }

    let argc = match Tuple::try_from(coroutine.arguments()) {
        Some(tuple) => tuple.len(),
        None => 0,
    };

    // Initial values: the callee, then its arguments. The first scheduler
    // step turns them into the entry call.
    interpreter::ensure_value_capacity(vm, coroutine_value, argc + 1)?;
    let coroutine = Coroutine::try_from(coroutine_value).expect("still a coroutine");
    let stack = CoroutineStack::try_from(coroutine.stack()).expect("fresh coroutine has a stack");
    stack
        .push_value(coroutine.function())
        .expect("capacity was just reserved");
    if let Some(tuple) = Tuple::try_from(coroutine.arguments()) {
        for i in 0..argc {
            stack
                .push_value(tuple.get(i).expect("index within tuple"))
                .expect("capacity was just reserved");
        }
    }

    coroutine.set_state(CoroutineState::Ready);
    enqueue(vm, coroutine_value);
    Ok(())
}

/// Append to the ready queue. No-op if the coroutine is already queued.
pub(crate) fn enqueue(vm: &mut Vm, coroutine_value: Value) {
    let coroutine = Coroutine::try_from(coroutine_value).expect("enqueue expects a coroutine");
    if in_ready_queue(vm, coroutine_value) {
        return;
    }
    coroutine.set_next_ready(Value::null());
    match Coroutine::try_from(vm.ready_tail) {
        Some(tail) => tail.set_next_ready(coroutine_value),
        None => vm.ready_head = coroutine_value,
    }
    vm.ready_tail = coroutine_value;
}

fn in_ready_queue(vm: &Vm, coroutine_value: Value) -> bool {
    let mut cursor = vm.ready_head;
    while let Some(co) = Coroutine::try_from(cursor) {
        if cursor.same(coroutine_value) {
            return true;
        }
        cursor = co.next_ready();
    }
    false
}

fn dequeue(vm: &mut Vm) -> Option<Value> {
    let head_value = vm.ready_head;
    let head = Coroutine::try_from(head_value)?;
    vm.ready_head = head.next_ready();
    if vm.ready_head.is_null() {
        vm.ready_tail = Value::null();
    }
    head.set_next_ready(Value::null());
    Some(head_value)
}

/// Remove a specific coroutine from the ready queue, if present.
fn queue_remove(vm: &mut Vm, coroutine_value: Value) -> bool {
    let mut prev = Value::null();
    let mut cursor = vm.ready_head;
    while let Some(co) = Coroutine::try_from(cursor) {
        if cursor.same(coroutine_value) {
            let next = co.next_ready();
            match Coroutine::try_from(prev) {
                Some(prev_co) => prev_co.set_next_ready(next),
                None => vm.ready_head = next,
            }
            if vm.ready_tail.same(cursor) {
                vm.ready_tail = prev;
            }
            co.set_next_ready(Value::null());
            return true;
        }
        prev = cursor;
        cursor = co.next_ready();
    }
    false
}

/// Transition a waiting coroutine back to ready. Idempotent for
/// coroutines that are already ready or running.
pub(crate) fn make_ready(vm: &mut Vm, coroutine_value: Value) {
    let coroutine = Coroutine::try_from(coroutine_value).expect("make_ready expects a coroutine");
    match coroutine.state() {
        CoroutineState::Waiting => {
            vm.suspended.retain(|v| !v.same(coroutine_value));
            coroutine.set_current_token(Value::null());
            coroutine.set_state(CoroutineState::Ready);
            enqueue(vm, coroutine_value);
        }
        CoroutineState::Ready | CoroutineState::Running => {
            // Idempotent: scheduling something already scheduled (or
            // still running) is a no-op.
        }
        CoroutineState::New | CoroutineState::Done => {
            debug_assert!(false, "make_ready on a new or finished coroutine");
        }
    }
}

/// The coroutine's current resume token, creating one if none is active.
pub(crate) fn coroutine_token(vm: &mut Vm, coroutine_value: Value) -> VmResult<Value> {
    let coroutine = Coroutine::try_from(coroutine_value).ok_or(ERR_NOT_COROUTINE)?;
    let existing = coroutine.current_token();
    if !existing.is_null() {
        return Ok(existing);
    }
    let token = CoroutineToken::new(vm, coroutine_value)?;
    Coroutine::try_from(coroutine_value)
        .expect("still a coroutine")
        .set_current_token(token);
    Ok(token)
}

/// Resume through a token. Only the coroutine's current token is valid,
/// and it is consumed by a successful resume.
pub(crate) fn resume_token(vm: &mut Vm, token_value: Value) -> VmResult<()> {
    let token = CoroutineToken::try_from(token_value)
        .ok_or(Error::new(ErrorKind::BadType, "expected a coroutine token"))?;
    if !token.is_current() {
        return Err(Error::new(
            ErrorKind::BadState,
            "stale coroutine token: a newer suspension owns this coroutine",
        ));
    }
    let coroutine_value = token.coroutine();
    let coroutine = Coroutine::try_from(coroutine_value).expect("token coroutine is valid");
    match coroutine.state() {
        CoroutineState::Waiting => {
            make_ready(vm, coroutine_value);
            Ok(())
        }
        // Resuming before the suspension landed, or a duplicate resume of
        // an already-scheduled coroutine: idempotent.
        CoroutineState::Ready | CoroutineState::Running => Ok(()),
        CoroutineState::New | CoroutineState::Done => Err(Error::new(
            ErrorKind::BadState,
            "token coroutine cannot be resumed in its current state",
        )),
    }
}

pub(crate) fn set_callback(
    vm: &mut Vm,
    coroutine_value: Value,
    callback: Box<dyn FnOnce(&mut Vm, Value)>,
) -> VmResult<()> {
    let coroutine = Coroutine::try_from(coroutine_value).ok_or(ERR_NOT_COROUTINE)?;
    if coroutine.completed() {
        return Err(Error::new(
            ErrorKind::BadState,
            "coroutine has already completed",
        ));
    }
    let _coroutine_root = vm.temp_root(coroutine_value);
    let payload = NativeObject::new_rust(vm, CallbackPayload(Some(callback)))?;
    Coroutine::try_from(coroutine_value)
        .expect("still a coroutine")
        .set_callback(payload);
    Ok(())
}

/// Invoke and clear the completion callback, if any.
fn invoke_callback(vm: &mut Vm, coroutine_value: Value) {
    let coroutine = Coroutine::try_from(coroutine_value).expect("coroutine is valid");
    let payload_value = coroutine.callback();
    let Some(payload_object) = NativeObject::try_from(payload_value) else {
        return;
    };
    coroutine.set_callback(Value::null());
    // Safety: the payload was created by `set_callback`.
    let callback = unsafe { (*payload_object.data_as::<CallbackPayload>()).0.take() };
    if let Some(callback) = callback {
        callback(vm, coroutine_value);
    }
}

/// Handle the outcome of one interpreter step for `coroutine_value`.
fn settle(vm: &mut Vm, coroutine_value: Value, outcome: RunOutcome) {
    let coroutine = Coroutine::try_from(coroutine_value).expect("coroutine is valid");
    match outcome {
        RunOutcome::Done => {
            debug_assert!(coroutine.completed());
            tracing::debug!(
                name = %vm.coroutine_name(coroutine_value).unwrap_or_default(),
                "coroutine completed"
            );
            invoke_callback(vm, coroutine_value);
        }
        RunOutcome::Waiting => {
            coroutine.set_state(CoroutineState::Waiting);
            vm.suspended.push(coroutine_value);
        }
        RunOutcome::Rescheduled => {
            coroutine.set_state(CoroutineState::Ready);
            enqueue(vm, coroutine_value);
        }
    }
}

/// Drain the ready queue in FIFO order.
pub(crate) fn run_ready(vm: &mut Vm) -> VmResult<()> {
    while let Some(coroutine_value) = dequeue(vm) {
        let coroutine = Coroutine::try_from(coroutine_value).expect("queued value is a coroutine");
        debug_assert_eq!(coroutine.state(), CoroutineState::Ready);
        coroutine.set_state(CoroutineState::Running);
        vm.current = coroutine_value;
        let outcome = interpreter::run(vm, coroutine_value);
        vm.current = Value::null();
        let outcome = outcome?;
        settle(vm, coroutine_value, outcome);
    }
    Ok(())
}

/// Run one specific coroutine to completion without draining the rest of
/// the queue. Used for module initializers, which must neither suspend
/// nor yield: anything but straight-line completion is rejected.
pub(crate) fn run_to_completion(vm: &mut Vm, coroutine_value: Value) -> VmResult<Value> {
    let coroutine = Coroutine::try_from(coroutine_value).ok_or(ERR_NOT_COROUTINE)?;
    if coroutine.state() == CoroutineState::New {
        start_coroutine(vm, coroutine_value)?;
    }

    loop {
        let coroutine = Coroutine::try_from(coroutine_value).expect("still a coroutine");
        match coroutine.state() {
            CoroutineState::Ready => {
                queue_remove(vm, coroutine_value);
                coroutine.set_state(CoroutineState::Running);
                vm.current = coroutine_value;
                let outcome = interpreter::run(vm, coroutine_value);
                vm.current = Value::null();
                match outcome? {
                    RunOutcome::Done => settle(vm, coroutine_value, RunOutcome::Done),
                    RunOutcome::Waiting | RunOutcome::Rescheduled => {
                        // Abandon the coroutine without touching the
                        // shared queue; a yielding initializer must fail
                        // loading, not sneak back onto the scheduler.
                        let coroutine = Coroutine::try_from(coroutine_value)
                            .expect("still a coroutine");
                        coroutine.set_state(CoroutineState::Waiting);
                        return Err(Error::new(
                            ErrorKind::BadState,
                            "coroutine suspended or yielded while synchronous completion was required",
                        ));
                    }
                }
            }
            CoroutineState::Done => return Ok(coroutine.result()),
            CoroutineState::New | CoroutineState::Running | CoroutineState::Waiting => {
                return Err(Error::new(ErrorKind::Internal, "unexpected coroutine state"));
            }
        }
    }
}
