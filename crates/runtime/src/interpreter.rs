//! Bytecode interpreter
//!
//! [`run`] drives one coroutine until it completes, reschedules itself or
//! suspends. The outer loop dispatches on the kind of the topmost stack
//! frame: code frames execute bytecode, native frames run their callable
//! according to its convention, catch frames drive protected calls.
//!
//! Panics are values (normally exceptions) carried by unwinding control
//! flow: [`throw`] walks the caller chain, giving resumable frames their
//! `CLEANUP` call, until a catch frame intercepts the exception or the
//! coroutine boundary turns it into an error result.
//!
//! Pointer discipline: frame pointers stay valid across allocations (the
//! collector never moves objects) but are invalidated by explicit stack
//! growth, so every growth point re-fetches the stack and frame from the
//! coroutine.

use crate::error::{Error, ErrorKind, VmResult};
use crate::natives::{
    AsyncContext, MagicFn, NativeCallable, Panic, ResumableContext, SyncContext,
};
use crate::objects::array::{Array, Tuple};
use crate::objects::buffer::Buffer;
use crate::objects::coroutine::{Coroutine, CoroutineState};
use crate::objects::coroutine_stack::{
    AsyncFrame, CatchFrame, CodeFrame, CoroutineStack, FrameFlags, FrameHeader, FrameKind,
    ResumableFrame, SyncFrame, RESUMABLE_STATE_CLEANUP, RESUMABLE_STATE_END,
};
use crate::objects::function::{
    BoundMethod, CodeFunctionTemplate, Environment, Function, NativeFunction,
};
use crate::objects::hash_table::{structural_eq, HashTable};
use crate::objects::module::Module;
use crate::objects::number::{self, Number};
use crate::objects::record::Record;
use crate::objects::result::{Exception, ResultObject};
use crate::objects::string::{Str, StringBuilder, Symbol};
use crate::types::InternalKind;
use crate::value::Value;
use crate::vm::Vm;
use rill_core::{CodeReader, Op};

const VALUE_SIZE: usize = std::mem::size_of::<Value>();

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// The coroutine completed; its result is set.
    Done,
    /// The coroutine suspended (async frame or manual resumable yield).
    Waiting,
    /// The coroutine yielded and should be re-enqueued.
    Rescheduled,
}

enum Step {
    Continue,
    Outcome(RunOutcome),
}

fn coroutine(co_value: Value) -> Coroutine {
    Coroutine::try_from(co_value).expect("interpreter value is a coroutine")
}

fn live_stack(co_value: Value) -> VmResult<CoroutineStack> {
    CoroutineStack::try_from(coroutine(co_value).stack())
        .ok_or(Error::new(ErrorKind::Internal, "coroutine has no live stack"))
}

/// Grow the coroutine's stack until at least `values` more value slots
/// fit. Invalidates previously fetched frame pointers.
pub(crate) fn ensure_value_capacity(vm: &mut Vm, co_value: Value, values: usize) -> VmResult<()> {
    ensure_byte_capacity(vm, co_value, values * VALUE_SIZE)
}

fn ensure_byte_capacity(vm: &mut Vm, co_value: Value, bytes: usize) -> VmResult<()> {
    loop {
        let stack = live_stack(co_value)?;
        if stack.available() >= bytes {
            return Ok(());
        }
        let _co_root = vm.temp_root(co_value);
        let new_stack = CoroutineStack::grow(vm, stack.value())?;
        coroutine(co_value).set_stack(new_stack);
    }
}

/// Run `co_value` (already in `Running` state) until it completes or
/// gives up control.
pub(crate) fn run(vm: &mut Vm, co_value: Value) -> VmResult<RunOutcome> {
    debug_assert_eq!(coroutine(co_value).state(), CoroutineState::Running);
    loop {
        let stack = live_stack(co_value)?;
        let frame = stack.top_frame();
        let step = if frame.is_null() {
            begin(vm, co_value)?
        } else {
            match unsafe { FrameHeader::kind(frame) } {
                FrameKind::Code => step_code(vm, co_value)?,
                FrameKind::Sync => step_sync(vm, co_value)?,
                FrameKind::Async => step_async(vm, co_value)?,
                FrameKind::Resumable => step_resumable(vm, co_value)?,
                FrameKind::Catch => step_catch(vm, co_value)?,
            }
        };
        match step {
            Step::Continue => continue,
            Step::Outcome(outcome) => return Ok(outcome),
        }
    }
}

/// First step of a fresh coroutine: the bottom of the stack holds the
/// entry function followed by its arguments.
fn begin(vm: &mut Vm, co_value: Value) -> VmResult<Step> {
    let stack = live_stack(co_value)?;
    let count = stack.top_value_count() as usize;
    if count == 0 {
        // The entry call consumed itself without leaving a frame (an
        // entry-level yield); there is nothing left to run.
        return complete(vm, co_value, Value::null(), false);
    }
    let callee = unsafe { *stack.top_value_at(count - 1) };
    call_value(vm, co_value, callee, (count - 1) as u32, false)
}

// --- calls ---------------------------------------------------------------

/// Invoke `callee` over the top `argc` values of the current value
/// region. `extra_pop` marks the extra receiver slot of a field call.
fn call_value(
    vm: &mut Vm,
    co_value: Value,
    callee: Value,
    argc: u32,
    extra_pop: bool,
) -> VmResult<Step> {
    let flags = if extra_pop {
        FrameFlags::POP_ONE_MORE
    } else {
        FrameFlags::empty()
    };

    match callee.internal_kind() {
        InternalKind::Function => {
            let function = Function::try_from(callee).unwrap();
            let tmpl = function.template();
            if argc != tmpl.params() {
                return throw_msg(
                    vm,
                    co_value,
                    &format!(
                        "function '{}' requires {} arguments, got {argc}",
                        name_of(tmpl.name()),
                        tmpl.params()
                    ),
                );
            }
            let closure = function.closure();
            let needed = std::mem::size_of::<CodeFrame>()
                + tmpl.locals() as usize * VALUE_SIZE;
            ensure_byte_capacity(vm, co_value, needed)?;
            let stack = live_stack(co_value)?;
            stack
                .push_code_frame(tmpl, closure, flags)
                .expect("capacity was just reserved");
            Ok(Step::Continue)
        }

        InternalKind::BoundMethod => {
            let method = BoundMethod::try_from(callee).unwrap();
            let function = method.function();
            let receiver = method.receiver();
            ensure_value_capacity(vm, co_value, 1)?;
            let stack = live_stack(co_value)?;
            stack
                .insert_before_args(argc as usize, receiver)
                .expect("capacity was just reserved");
            call_value(vm, co_value, function, argc + 1, extra_pop)
        }

        InternalKind::NativeFunction => {
            let function = NativeFunction::try_from(callee).unwrap();
            match function.callable() {
                NativeCallable::Magic(magic) => {
                    return call_magic(vm, co_value, magic, argc, extra_pop);
                }
                _ => {}
            }
            if function.params() != crate::natives::VARIADIC && argc != function.params() {
                return throw_msg(
                    vm,
                    co_value,
                    &format!(
                        "function '{}' requires {} arguments, got {argc}",
                        name_of(function.name()),
                        function.params()
                    ),
                );
            }
            match function.callable() {
                NativeCallable::Sync(_) => {
                    ensure_byte_capacity(vm, co_value, std::mem::size_of::<SyncFrame>())?;
                    let stack = live_stack(co_value)?;
                    let function = NativeFunction::try_from(callee).unwrap();
                    stack
                        .push_sync_frame(function, argc, flags)
                        .expect("capacity was just reserved");
                }
                NativeCallable::Async(_) => {
                    ensure_byte_capacity(vm, co_value, std::mem::size_of::<AsyncFrame>())?;
                    let stack = live_stack(co_value)?;
                    let function = NativeFunction::try_from(callee).unwrap();
                    stack
                        .push_async_frame(function, argc, flags)
                        .expect("capacity was just reserved");
                }
                NativeCallable::Resumable(_) => {
                    let needed = std::mem::size_of::<ResumableFrame>()
                        + function.locals() as usize * VALUE_SIZE;
                    ensure_byte_capacity(vm, co_value, needed)?;
                    let stack = live_stack(co_value)?;
                    let function = NativeFunction::try_from(callee).unwrap();
                    stack
                        .push_resumable_frame(function, argc, flags)
                        .expect("capacity was just reserved");
                }
                NativeCallable::Magic(_) => unreachable!("handled above"),
            }
            Ok(Step::Continue)
        }

        _ => throw_msg(vm, co_value, "value is not callable"),
    }
}

fn call_magic(
    vm: &mut Vm,
    co_value: Value,
    magic: MagicFn,
    argc: u32,
    extra_pop: bool,
) -> VmResult<Step> {
    let extra = 1 + extra_pop as usize;
    match magic {
        MagicFn::Yield | MagicFn::Dispatch => {
            if argc != 0 {
                return throw_msg(vm, co_value, "yield takes no arguments");
            }
            let stack = live_stack(co_value)?;
            // Drop the callee, leave null as the call's result for when
            // the coroutine resumes. An entry-level yield has no caller
            // to resume into; its region stays empty.
            stack.pop_values(extra);
            if !stack.top_frame().is_null() {
                stack.push_value(Value::null()).expect("a slot was just freed");
            }
            Ok(Step::Outcome(RunOutcome::Rescheduled))
        }
        MagicFn::CatchPanic => {
            if argc != 1 {
                return throw_msg(vm, co_value, "catch_panic requires a function argument");
            }
            let flags = if extra_pop {
                FrameFlags::POP_ONE_MORE
            } else {
                FrameFlags::empty()
            };
            ensure_byte_capacity(vm, co_value, std::mem::size_of::<CatchFrame>())?;
            let stack = live_stack(co_value)?;
            stack
                .push_catch_frame(1, flags)
                .expect("capacity was just reserved");
            Ok(Step::Continue)
        }
    }
}

// --- returns and unwinding ------------------------------------------------

/// Pop the finished top frame and deliver `ret` to its caller (or finish
/// the coroutine with a success result).
fn return_from_frame(vm: &mut Vm, co_value: Value, ret: Value) -> VmResult<Step> {
    let stack = live_stack(co_value)?;
    let frame = stack.top_frame();
    debug_assert!(!frame.is_null());
    let extra = unsafe { FrameHeader::has_flag(frame, FrameFlags::POP_ONE_MORE) };
    stack.pop_frame();
    // The callee value (and the unused receiver slot, if any) still sits
    // below the popped arguments.
    stack.pop_values(1 + extra as usize);

    if stack.top_frame().is_null() && stack.top_value_count() == 0 {
        return complete(vm, co_value, ret, false);
    }
    stack.push_value(ret).expect("popping the callee freed a slot");
    Ok(Step::Continue)
}

/// Finish the coroutine with `success(value)` or `error(value)`.
fn complete(vm: &mut Vm, co_value: Value, value: Value, is_error: bool) -> VmResult<Step> {
    let _value_root = vm.temp_root(value);
    let result = if is_error {
        ResultObject::error(vm, value)?
    } else {
        ResultObject::success(vm, value)?
    };
    let co = coroutine(co_value);
    co.set_result(result);
    co.set_state(CoroutineState::Done);
    co.set_current_token(Value::null());
    co.set_stack(Value::null());
    Ok(Step::Outcome(RunOutcome::Done))
}

fn throw_msg(vm: &mut Vm, co_value: Value, message: &str) -> VmResult<Step> {
    let panic = Panic::msg(vm, message);
    throw(vm, co_value, panic)
}

/// Unwind the stack with the panic payload until a catch frame intercepts
/// it or the coroutine terminates with an error result.
fn throw(vm: &mut Vm, co_value: Value, panic: Panic) -> VmResult<Step> {
    let mut exception = panic.0;
    if exception.is_null() {
        // The exception itself could not be allocated.
        exception = vm.oom_exception;
    }

    if vm.settings().enable_panic_stack_trace {
        attach_stack_trace(vm, co_value, exception);
    }

    loop {
        let stack = live_stack(co_value)?;
        let frame = stack.top_frame();
        if frame.is_null() {
            // Values before the first frame (the entry call) are
            // discarded with the coroutine.
            return complete(vm, co_value, exception, true);
        }

        match unsafe { FrameHeader::kind(frame) } {
            FrameKind::Catch => {
                unsafe {
                    let catch = frame as *mut CatchFrame;
                    (*catch).exception = exception;
                    FrameHeader::set_flag(frame, FrameFlags::UNWINDING);
                }
                return Ok(Step::Continue);
            }
            FrameKind::Resumable => {
                let cleaned =
                    unsafe { FrameHeader::has_flag(frame, FrameFlags::RESUMABLE_CLEANED) };
                if !cleaned {
                    let _exception_root = vm.temp_root(exception);
                    run_resumable_cleanup(vm, co_value, frame as *mut ResumableFrame);
                }
                discard_top_frame(co_value)?;
            }
            FrameKind::Code | FrameKind::Sync | FrameKind::Async => {
                discard_top_frame(co_value)?;
            }
        }
    }
}

/// Pop the top frame plus the callee slot(s) below its arguments.
fn discard_top_frame(co_value: Value) -> VmResult<()> {
    let stack = live_stack(co_value)?;
    let frame = stack.top_frame();
    let extra = unsafe { FrameHeader::has_flag(frame, FrameFlags::POP_ONE_MORE) };
    stack.pop_frame();
    if stack.top_value_count() as usize >= 1 + extra as usize {
        stack.pop_values(1 + extra as usize);
    }
    Ok(())
}

/// Capture a stack trace onto `exception` if it does not have one yet.
fn attach_stack_trace(vm: &mut Vm, co_value: Value, exception_value: Value) {
    let Some(exception) = Exception::try_from(exception_value) else {
        return;
    };
    if !exception.trace().is_null() {
        return;
    }

    let Ok(stack) = live_stack(co_value) else { return };
    let mut text = String::new();
    let mut frame = stack.top_frame();
    while !frame.is_null() {
        let name = unsafe {
            match FrameHeader::kind(frame) {
                FrameKind::Code => {
                    let code = frame as *mut CodeFrame;
                    let tmpl = CodeFunctionTemplate::try_from((*code).tmpl)
                        .expect("code frame template is valid");
                    name_of(tmpl.name())
                }
                FrameKind::Sync | FrameKind::Async | FrameKind::Resumable => {
                    let func = frame_function(frame);
                    NativeFunction::try_from(func).map_or_else(
                        || "<native>".to_string(),
                        |f| name_of(f.name()),
                    )
                }
                FrameKind::Catch => "<catch>".to_string(),
            }
        };
        text.push_str("  at ");
        text.push_str(&name);
        text.push('\n');
        frame = unsafe { (*frame).caller };
    }

    let _exception_root = vm.temp_root(exception_value);
    if let Ok(trace) = Str::new(vm, &text) {
        Exception::try_from(exception_value)
            .expect("still an exception")
            .set_trace(trace);
    }
}

unsafe fn frame_function(frame: *mut FrameHeader) -> Value {
    unsafe {
        match FrameHeader::kind(frame) {
            FrameKind::Sync => (*(frame as *mut SyncFrame)).func,
            FrameKind::Async => (*(frame as *mut AsyncFrame)).func,
            FrameKind::Resumable => (*(frame as *mut ResumableFrame)).func,
            _ => Value::null(),
        }
    }
}

fn name_of(name: Value) -> String {
    Str::try_from(name).map_or_else(|| "<anonymous>".to_string(), |s| s.as_str().to_string())
}

// --- native frame steps ---------------------------------------------------

fn step_sync(vm: &mut Vm, co_value: Value) -> VmResult<Step> {
    let stack = live_stack(co_value)?;
    let frame = stack.top_frame();
    let func_value = unsafe { frame_function(frame) };
    let function = NativeFunction::try_from(func_value).expect("sync frame function");
    let NativeCallable::Sync(entry) = function.callable() else {
        return Err(Error::new(ErrorKind::Internal, "sync frame without sync callable"));
    };
    let closure = function.closure();

    let result = {
        let mut ctx = SyncContext::new(vm, co_value, closure, frame);
        entry(&mut ctx)
    };
    match result {
        Ok(value) => return_from_frame(vm, co_value, value),
        Err(panic) => throw(vm, co_value, panic),
    }
}

fn step_async(vm: &mut Vm, co_value: Value) -> VmResult<Step> {
    let stack = live_stack(co_value)?;
    let frame = stack.top_frame();
    let called = unsafe { FrameHeader::has_flag(frame, FrameFlags::ASYNC_CALLED) };

    if !called {
        let func_value = unsafe { frame_function(frame) };
        let function = NativeFunction::try_from(func_value).expect("async frame function");
        let NativeCallable::Async(entry) = function.callable() else {
            return Err(Error::new(ErrorKind::Internal, "async frame without async callable"));
        };
        let closure = function.closure();
        unsafe { FrameHeader::set_flag(frame, FrameFlags::ASYNC_CALLED) };

        {
            let mut ctx = AsyncContext::new(vm, co_value, closure, frame);
            entry(&mut ctx);
        }

        // If the host completed the frame inside the initiating call, the
        // resumption is still postponed to the next scheduler iteration.
        let resumed = unsafe { FrameHeader::has_flag(frame, FrameFlags::ASYNC_RESUMED) };
        if resumed {
            Ok(Step::Outcome(RunOutcome::Rescheduled))
        } else {
            Ok(Step::Outcome(RunOutcome::Waiting))
        }
    } else {
        let resumed = unsafe { FrameHeader::has_flag(frame, FrameFlags::ASYNC_RESUMED) };
        if !resumed {
            // Token-resumed without a result: the frame contract was
            // violated; surface it as a panic.
            return throw_msg(vm, co_value, "async frame was resumed without a result");
        }
        let unwinding = unsafe { FrameHeader::has_flag(frame, FrameFlags::UNWINDING) };
        let result = unsafe { (*(frame as *mut AsyncFrame)).result };
        if unwinding {
            throw(vm, co_value, Panic::from_value(result))
        } else {
            return_from_frame(vm, co_value, result)
        }
    }
}

/// Give the resumable frame its final `CLEANUP` call. Panics and control
/// requests from cleanup are forbidden; violations are logged and
/// ignored.
fn run_resumable_cleanup(vm: &mut Vm, co_value: Value, frame: *mut ResumableFrame) {
    unsafe {
        (*frame).state = RESUMABLE_STATE_CLEANUP;
        FrameHeader::set_flag(frame as *mut FrameHeader, FrameFlags::RESUMABLE_CLEANED);
    }
    let function = NativeFunction::try_from(unsafe { (*frame).func }).expect("resumable function");
    let NativeCallable::Resumable(entry) = function.callable() else {
        return;
    };
    let closure = function.closure();
    let outcome = {
        let mut ctx = ResumableContext::new(vm, co_value, closure, frame);
        entry(&mut ctx)
    };
    if outcome.is_err() {
        tracing::warn!(
            function = %name_of(function.name()),
            "resumable function panicked during cleanup; ignored"
        );
    }
}

fn step_resumable(vm: &mut Vm, co_value: Value) -> VmResult<Step> {
    let stack = live_stack(co_value)?;
    let frame = stack.top_frame() as *mut ResumableFrame;
    let header = frame as *mut FrameHeader;

    // A completed invocation left its result on our value stack.
    unsafe {
        if FrameHeader::has_flag(header, FrameFlags::RESUMABLE_INVOKE) {
            FrameHeader::clear_flag(header, FrameFlags::RESUMABLE_INVOKE);
            (*frame).invoke_func = Value::null();
            (*frame).invoke_args = Value::null();
        }
    }

    let function = NativeFunction::try_from(unsafe { (*frame).func }).expect("resumable function");
    let NativeCallable::Resumable(entry) = function.callable() else {
        return Err(Error::new(
            ErrorKind::Internal,
            "resumable frame without resumable callable",
        ));
    };
    let closure = function.closure();
    let state_before = unsafe { (*frame).state };

    let result = {
        let mut ctx = ResumableContext::new(vm, co_value, closure, frame);
        entry(&mut ctx)
    };

    if let Err(panic) = result {
        // The exception must survive any allocation the cleanup performs.
        let _exception_root = vm.temp_root(panic.0);
        run_resumable_cleanup(vm, co_value, frame);
        return throw(vm, co_value, panic);
    }

    let state_after = unsafe { (*frame).state };
    let invoke_requested =
        unsafe { FrameHeader::has_flag(header, FrameFlags::RESUMABLE_INVOKE) };

    if invoke_requested {
        let invoke_func = unsafe { (*frame).invoke_func };
        let invoke_args = unsafe { (*frame).invoke_args };
        let argc = Tuple::try_from(invoke_args).map_or(0, |t| t.len());
        ensure_value_capacity(vm, co_value, argc + 1)?;
        let stack = live_stack(co_value)?;
        stack
            .push_value(invoke_func)
            .expect("capacity was just reserved");
        if let Some(tuple) = Tuple::try_from(invoke_args) {
            for i in 0..argc {
                stack
                    .push_value(tuple.get(i).expect("index within tuple"))
                    .expect("capacity was just reserved");
            }
        }
        return call_value(vm, co_value, invoke_func, argc as u32, false);
    }

    if state_after == RESUMABLE_STATE_END {
        let result_value = unsafe { (*frame).result };
        let _result_root = vm.temp_root(result_value);
        run_resumable_cleanup(vm, co_value, frame);
        let unwinding = unsafe { FrameHeader::has_flag(header, FrameFlags::UNWINDING) };
        if unwinding {
            return throw(vm, co_value, Panic::from_value(result_value));
        }
        return return_from_frame(vm, co_value, result_value);
    }

    if state_after != state_before {
        // Plain state transition: re-enter immediately.
        return Ok(Step::Continue);
    }

    // No action requested: a manual yield. The host resumes through a
    // coroutine token.
    Ok(Step::Outcome(RunOutcome::Waiting))
}

fn step_catch(vm: &mut Vm, co_value: Value) -> VmResult<Step> {
    let stack = live_stack(co_value)?;
    let frame = stack.top_frame();
    let started = unsafe { FrameHeader::has_flag(frame, FrameFlags::CATCH_STARTED) };
    let unwinding = unsafe { FrameHeader::has_flag(frame, FrameFlags::UNWINDING) };

    if unwinding {
        let exception = unsafe { (*(frame as *mut CatchFrame)).exception };
        let _exception_root = vm.temp_root(exception);
        let result = ResultObject::error(vm, exception)?;
        return return_from_frame(vm, co_value, result);
    }

    if !started {
        unsafe { FrameHeader::set_flag(frame, FrameFlags::CATCH_STARTED) };
        let callee = unsafe { *CoroutineStack::arg(frame, 0) };
        ensure_value_capacity(vm, co_value, 1)?;
        let stack = live_stack(co_value)?;
        stack.push_value(callee).expect("capacity was just reserved");
        return call_value(vm, co_value, callee, 0, false);
    }

    // The wrapped call returned normally; its value is our top value.
    let stack = live_stack(co_value)?;
    debug_assert!(stack.top_value_count() > 0);
    let value = stack.pop_value();
    let _value_root = vm.temp_root(value);
    let result = ResultObject::success(vm, value)?;
    return_from_frame(vm, co_value, result)
}

// --- code frames ----------------------------------------------------------

macro_rules! throw_code {
    ($vm:ident, $co:ident, $($arg:tt)*) => {
        return throw_msg($vm, $co, &format!($($arg)*))
    };
}

fn step_code(vm: &mut Vm, co_value: Value) -> VmResult<Step> {
    loop {
        // Re-fetch everything each iteration of the outer safe point; the
        // stack may have grown below.
        let stack = live_stack(co_value)?;
        let frame = stack.top_frame() as *mut CodeFrame;
        debug_assert_eq!(
            unsafe { FrameHeader::kind(frame as *mut FrameHeader) },
            FrameKind::Code
        );

        // Worst case pushes per simple instruction is two (load_method).
        if stack.available() < 2 * VALUE_SIZE {
            ensure_value_capacity(vm, co_value, 2)?;
            continue;
        }

        let tmpl = CodeFunctionTemplate::try_from(unsafe { (*frame).tmpl })
            .expect("code frame template is valid");
        let module = Module::try_from(tmpl.module()).expect("template module is valid");
        let code = tmpl.code();
        let bytes = code.bytes();
        let mut reader = CodeReader::at(bytes, unsafe { (*frame).pc });

        if reader.at_end() {
            // Falling off the end returns null.
            return return_from_frame(vm, co_value, Value::null());
        }

        let op = match reader.read_op() {
            Ok(op) => op,
            Err(e) => {
                return Err(Error::detailed(ErrorKind::Internal, format!("bad bytecode: {e}")));
            }
        };

        macro_rules! operand_u32 {
            () => {
                reader.read_u32().map_err(|e| {
                    Error::detailed(ErrorKind::Internal, format!("bad bytecode: {e}"))
                })?
            };
        }

        match op {
            // --- constants --------------------------------------------
            Op::LoadNull => {
                stack.push_value(Value::null()).expect("capacity checked");
            }
            Op::LoadTrue => {
                stack.push_value(Value::from_bool(true)).expect("capacity checked");
            }
            Op::LoadFalse => {
                stack.push_value(Value::from_bool(false)).expect("capacity checked");
            }
            Op::LoadInt => {
                let value = reader.read_i64().map_err(|e| {
                    Error::detailed(ErrorKind::Internal, format!("bad bytecode: {e}"))
                })?;
                unsafe { (*frame).pc = reader.pos() };
                let value = number::make_integer(vm, value)?;
                live_stack(co_value)?.push_value(value).expect("capacity checked");
            }
            Op::LoadFloat => {
                let value = reader.read_f64().map_err(|e| {
                    Error::detailed(ErrorKind::Internal, format!("bad bytecode: {e}"))
                })?;
                unsafe { (*frame).pc = reader.pos() };
                let value = number::Float::new(vm, value)?;
                live_stack(co_value)?.push_value(value).expect("capacity checked");
            }

            // --- module members ---------------------------------------
            Op::LoadModule => {
                let index = operand_u32!();
                let value = module.members().get(index as usize).map_err(|_| {
                    Error::new(ErrorKind::Internal, "member index out of range")
                })?;
                stack.push_value(value).expect("capacity checked");
            }
            Op::StoreModule => {
                let index = operand_u32!();
                let value = stack.pop_value();
                module.members().set(index as usize, value).map_err(|_| {
                    Error::new(ErrorKind::Internal, "member index out of range")
                })?;
            }

            // --- params and locals ------------------------------------
            Op::LoadParam => {
                let index = operand_u32!();
                let value = unsafe { *CoroutineStack::arg(frame as *mut FrameHeader, index) };
                stack.push_value(value).expect("capacity checked");
            }
            Op::StoreParam => {
                let index = operand_u32!();
                let value = stack.pop_value();
                unsafe { *CoroutineStack::arg(frame as *mut FrameHeader, index) = value };
            }
            Op::LoadLocal => {
                let index = operand_u32!();
                let value = unsafe { *CoroutineStack::local(frame as *mut FrameHeader, index) };
                stack.push_value(value).expect("capacity checked");
            }
            Op::StoreLocal => {
                let index = operand_u32!();
                let value = stack.pop_value();
                unsafe { *CoroutineStack::local(frame as *mut FrameHeader, index) = value };
            }
            Op::PopTo => {
                let index = operand_u32!();
                let value = stack.pop_value();
                unsafe { *CoroutineStack::local(frame as *mut FrameHeader, index) = value };
            }

            // --- closures ---------------------------------------------
            Op::LoadClosure => {
                let closure = unsafe { (*frame).closure };
                stack.push_value(closure).expect("capacity checked");
            }
            Op::LoadEnv => {
                let levels = operand_u32!();
                let index = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                let closure = unsafe { (*frame).closure };
                match env_slot(closure, levels, index) {
                    Ok(value) => {
                        stack.push_value(value).expect("capacity checked");
                    }
                    Err(message) => return throw_msg(vm, co_value, message),
                }
            }
            Op::StoreEnv => {
                let levels = operand_u32!();
                let index = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                let value = stack.pop_value();
                let closure = unsafe { (*frame).closure };
                if let Err(message) = env_store(closure, levels, index, value) {
                    return throw_msg(vm, co_value, message);
                }
            }
            Op::MakeEnv => {
                let size = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                let parent = stack.pop_value();
                if !parent.is_null() && Environment::try_from(parent).is_none() {
                    return throw_msg(vm, co_value, "environment parent must be an environment");
                }
                let env = Environment::new(vm, parent, size as usize)?;
                live_stack(co_value)?.push_value(env).expect("capacity checked");
            }
            Op::MakeClosure => {
                unsafe { (*frame).pc = reader.pos() };
                let env = stack.pop_value();
                let function = stack.pop_value();
                if !env.is_null() && Environment::try_from(env).is_none() {
                    return throw_msg(vm, co_value, "closure environment must be an environment");
                }
                let Some(function) = Function::try_from(function) else {
                    return throw_msg(vm, co_value, "closure target must be a function");
                };
                let closure = Function::new(vm, function.template().value(), env)?;
                live_stack(co_value)?.push_value(closure).expect("capacity checked");
            }

            // --- member and index access ------------------------------
            Op::LoadMember => {
                let index = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                let symbol = member_symbol(&module, index)?;
                let object = stack.pop_value();
                match load_member(vm, object, symbol) {
                    Ok(value) => {
                        live_stack(co_value)?.push_value(value).expect("capacity checked");
                    }
                    Err(panic) => return throw(vm, co_value, panic),
                }
            }
            Op::StoreMember => {
                let index = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                let symbol = member_symbol(&module, index)?;
                let value = stack.pop_value();
                let object = stack.pop_value();
                if let Err(panic) = store_member(vm, object, symbol, value) {
                    return throw(vm, co_value, panic);
                }
            }
            Op::LoadIndex => {
                unsafe { (*frame).pc = reader.pos() };
                let index = stack.pop_value();
                let object = stack.pop_value();
                match load_index(vm, object, index) {
                    Ok(value) => {
                        live_stack(co_value)?.push_value(value).expect("capacity checked");
                    }
                    Err(panic) => return throw(vm, co_value, panic),
                }
            }
            Op::StoreIndex => {
                unsafe { (*frame).pc = reader.pos() };
                let value = stack.pop_value();
                let index = stack.pop_value();
                let object = stack.pop_value();
                if let Err(panic) = store_index(vm, object, index, value) {
                    return throw(vm, co_value, panic);
                }
            }

            // --- arithmetic -------------------------------------------
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod | Op::Pow => {
                unsafe { (*frame).pc = reader.pos() };
                let rhs = stack.pop_value();
                let lhs = stack.pop_value();
                match numeric_binary(vm, op, lhs, rhs) {
                    Ok(value) => {
                        live_stack(co_value)?.push_value(value).expect("capacity checked");
                    }
                    Err(panic) => return throw(vm, co_value, panic),
                }
            }
            Op::LShift | Op::RShift | Op::BitAnd | Op::BitOr | Op::BitXor => {
                unsafe { (*frame).pc = reader.pos() };
                let rhs = stack.pop_value();
                let lhs = stack.pop_value();
                match bitwise_binary(vm, op, lhs, rhs) {
                    Ok(value) => {
                        live_stack(co_value)?.push_value(value).expect("capacity checked");
                    }
                    Err(panic) => return throw(vm, co_value, panic),
                }
            }
            Op::BitNot => {
                unsafe { (*frame).pc = reader.pos() };
                let value = stack.pop_value();
                match number::extract_integer(value) {
                    Some(i) => {
                        let result = number::make_integer(vm, !i)?;
                        live_stack(co_value)?.push_value(result).expect("capacity checked");
                    }
                    None => throw_code!(vm, co_value, "bitwise not requires an integer"),
                }
            }
            Op::UAdd => {
                unsafe { (*frame).pc = reader.pos() };
                let value = stack.pop_value();
                if number::extract_number(value).is_none() {
                    throw_code!(vm, co_value, "unary plus requires a number");
                }
                stack.push_value(value).expect("capacity checked");
            }
            Op::UNeg => {
                unsafe { (*frame).pc = reader.pos() };
                let value = stack.pop_value();
                match number::extract_number(value) {
                    Some(Number::Int(i)) => match i.checked_neg() {
                        Some(negated) => {
                            let result = number::make_integer(vm, negated)?;
                            live_stack(co_value)?
                                .push_value(result)
                                .expect("capacity checked");
                        }
                        None => throw_code!(vm, co_value, "integer overflow in negation"),
                    },
                    Some(Number::Float(f)) => {
                        let result = number::Float::new(vm, -f)?;
                        live_stack(co_value)?.push_value(result).expect("capacity checked");
                    }
                    None => throw_code!(vm, co_value, "unary minus requires a number"),
                }
            }
            Op::LNot => {
                let value = stack.pop_value();
                stack
                    .push_value(Value::from_bool(!truthy(value)))
                    .expect("capacity checked");
            }

            // --- comparison -------------------------------------------
            Op::Eq => {
                let rhs = stack.pop_value();
                let lhs = stack.pop_value();
                stack
                    .push_value(Value::from_bool(structural_eq(lhs, rhs)))
                    .expect("capacity checked");
            }
            Op::NEq => {
                let rhs = stack.pop_value();
                let lhs = stack.pop_value();
                stack
                    .push_value(Value::from_bool(!structural_eq(lhs, rhs)))
                    .expect("capacity checked");
            }
            Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
                unsafe { (*frame).pc = reader.pos() };
                let rhs = stack.pop_value();
                let lhs = stack.pop_value();
                match numeric_compare(op, lhs, rhs) {
                    Ok(result) => {
                        stack.push_value(Value::from_bool(result)).expect("capacity checked");
                    }
                    Err(message) => return throw_msg(vm, co_value, message),
                }
            }

            // --- control flow -----------------------------------------
            Op::Jmp => {
                let target = operand_u32!();
                reader.jump(target as usize);
            }
            Op::JmpTrue => {
                let target = operand_u32!();
                if truthy(stack.pop_value()) {
                    reader.jump(target as usize);
                }
            }
            Op::JmpFalse => {
                let target = operand_u32!();
                if !truthy(stack.pop_value()) {
                    reader.jump(target as usize);
                }
            }
            Op::JmpNull => {
                let target = operand_u32!();
                if stack.pop_value().is_null() {
                    reader.jump(target as usize);
                }
            }
            Op::JmpNotNull => {
                let target = operand_u32!();
                if !stack.pop_value().is_null() {
                    reader.jump(target as usize);
                }
            }
            Op::Return => {
                let value = stack.pop_value();
                return return_from_frame(vm, co_value, value);
            }
            Op::AssertFail => {
                unsafe { (*frame).pc = reader.pos() };
                let message = stack.pop_value();
                let text = vm
                    .to_display_string(message)
                    .unwrap_or_else(|_| "<message>".to_string());
                throw_code!(vm, co_value, "assertion failed: {text}");
            }

            // --- calls -------------------------------------------------
            Op::Call => {
                let argc = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                if stack.top_value_count() < argc + 1 {
                    return Err(Error::new(ErrorKind::Internal, "call underflows value stack"));
                }
                let callee = unsafe { *stack.top_value_at(argc as usize) };
                return call_value(vm, co_value, callee, argc, false);
            }
            Op::LoadMethod => {
                let index = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                let symbol = member_symbol(&module, index)?;
                let object = stack.pop_value();
                match load_method(vm, object, symbol) {
                    Ok((method, receiver)) => {
                        let stack = live_stack(co_value)?;
                        stack.push_value(method).expect("capacity checked");
                        stack.push_value(receiver).expect("capacity checked");
                    }
                    Err(panic) => return throw(vm, co_value, panic),
                }
            }
            Op::CallMethod => {
                let argc = operand_u32!();
                unsafe { (*frame).pc = reader.pos() };
                if stack.top_value_count() < argc + 2 {
                    return Err(Error::new(ErrorKind::Internal, "call underflows value stack"));
                }
                let receiver = unsafe { *stack.top_value_at(argc as usize) };
                let callee = unsafe { *stack.top_value_at(argc as usize + 1) };
                if receiver.is_null() {
                    // Field call: the receiver slot is dead weight popped
                    // together with the callee.
                    return call_value(vm, co_value, callee, argc, true);
                }
                return call_value(vm, co_value, callee, argc + 1, false);
            }
            Op::Pop => {
                stack.pop_value();
            }
            Op::Dup => {
                let value = stack.top_value();
                stack.push_value(value).expect("capacity checked");
            }

            // --- containers -------------------------------------------
            Op::Array => {
                let count = operand_u32!() as usize;
                unsafe { (*frame).pc = reader.pos() };
                let array = Array::new(vm, count.max(1))?;
                {
                    let _array_root = vm.temp_root(array);
                    let stack = live_stack(co_value)?;
                    let array_ref = Array::try_from(array).unwrap();
                    for i in (0..count).rev() {
                        let item = unsafe { *stack.top_value_at(i) };
                        array_ref.push(vm, item)?;
                    }
                }
                let stack = live_stack(co_value)?;
                stack.pop_values(count);
                stack.push_value(array).expect("popped at least as many");
            }
            Op::Tuple => {
                let count = operand_u32!() as usize;
                unsafe { (*frame).pc = reader.pos() };
                let tuple = Tuple::new(vm, count)?;
                let stack = live_stack(co_value)?;
                let tuple_ref = Tuple::try_from(tuple).unwrap();
                for i in 0..count {
                    let item = unsafe { *stack.top_value_at(count - 1 - i) };
                    tuple_ref.set(i, item).expect("index within tuple");
                }
                stack.pop_values(count);
                stack.push_value(tuple).expect("popped at least as many");
            }
            Op::Set => {
                let count = operand_u32!() as usize;
                unsafe { (*frame).pc = reader.pos() };
                let table = HashTable::new(vm)?;
                {
                    let _table_root = vm.temp_root(table);
                    let table_ref = HashTable::try_from(table).unwrap();
                    for i in (0..count).rev() {
                        let key = unsafe { *live_stack(co_value)?.top_value_at(i) };
                        table_ref.set(vm, key, Value::null())?;
                    }
                }
                let stack = live_stack(co_value)?;
                stack.pop_values(count);
                stack.push_value(table).expect("popped at least as many");
            }
            Op::Map => {
                let count = operand_u32!() as usize;
                unsafe { (*frame).pc = reader.pos() };
                let table = HashTable::new(vm)?;
                {
                    let _table_root = vm.temp_root(table);
                    let table_ref = HashTable::try_from(table).unwrap();
                    for i in 0..count {
                        let stack = live_stack(co_value)?;
                        let key = unsafe { *stack.top_value_at(2 * (count - i) - 1) };
                        let value = unsafe { *stack.top_value_at(2 * (count - i) - 2) };
                        table_ref.set(vm, key, value)?;
                    }
                }
                let stack = live_stack(co_value)?;
                stack.pop_values(2 * count);
                stack.push_value(table).expect("popped at least as many");
            }

            // --- string formatting ------------------------------------
            Op::Formatter => {
                unsafe { (*frame).pc = reader.pos() };
                let builder = StringBuilder::new(vm)?;
                live_stack(co_value)?.push_value(builder).expect("capacity checked");
            }
            Op::AppendFormat => {
                unsafe { (*frame).pc = reader.pos() };
                let value = stack.pop_value();
                let builder_value = stack.top_value();
                let Some(builder) = StringBuilder::try_from(builder_value) else {
                    return throw_msg(vm, co_value, "formatter target is not a string builder");
                };
                let text = vm.to_display_string(value)?;
                builder.append(vm, &text)?;
            }
            Op::FormatResult => {
                unsafe { (*frame).pc = reader.pos() };
                let builder_value = stack.pop_value();
                let Some(builder) = StringBuilder::try_from(builder_value) else {
                    return throw_msg(vm, co_value, "formatter target is not a string builder");
                };
                let _builder_root = vm.temp_root(builder_value);
                let string = builder.to_string_value(vm)?;
                live_stack(co_value)?.push_value(string).expect("capacity checked");
            }
        }

        // Write back the cursor for the next iteration's safe point.
        unsafe { (*frame).pc = reader.pos() };
    }
}

// --- operator helpers -----------------------------------------------------

/// Truthiness: null and false are falsy, everything else truthy.
fn truthy(value: Value) -> bool {
    !(value.is_null() || value.same(Value::from_bool(false)))
}

fn env_slot(closure: Value, levels: u32, index: u32) -> Result<Value, &'static str> {
    let env = Environment::try_from(closure).ok_or("function has no closure environment")?;
    let env = env
        .ancestor(levels as usize)
        .map_err(|_| "environment chain too short")?;
    env.get(index as usize)
        .map_err(|_| "environment slot out of bounds")
}

fn env_store(closure: Value, levels: u32, index: u32, value: Value) -> Result<(), &'static str> {
    let env = Environment::try_from(closure).ok_or("function has no closure environment")?;
    let env = env
        .ancestor(levels as usize)
        .map_err(|_| "environment chain too short")?;
    env.set(index as usize, value)
        .map_err(|_| "environment slot out of bounds")
}

fn member_symbol(module: &Module, index: u32) -> VmResult<Value> {
    let member = module
        .members()
        .get(index as usize)
        .map_err(|_| Error::new(ErrorKind::Internal, "member index out of range"))?;
    if Symbol::try_from(member).is_none() {
        return Err(Error::new(ErrorKind::Internal, "member is not a symbol"));
    }
    Ok(member)
}

/// Own member of a value: module export or record field.
fn own_member(object: Value, symbol: Value) -> Option<Value> {
    match object.internal_kind() {
        InternalKind::Module => Module::try_from(object).unwrap().get_export(symbol).ok(),
        InternalKind::Record => Record::try_from(object).unwrap().get(symbol).ok(),
        _ => None,
    }
}

/// Method of a value's public type, if any.
fn type_method(vm: &Vm, object: Value, symbol: Value) -> Option<Value> {
    let type_value = vm.types.public_type(object.internal_kind()).ok()?;
    crate::types::TypeObject::try_from(type_value)
        .expect("public types are types")
        .find_method(symbol)
}

/// `v.name` member access: own members first, then type methods reified
/// as bound methods (`f = array.append; f(x)`).
fn load_member(vm: &mut Vm, object: Value, symbol: Value) -> Result<Value, Panic> {
    if let Some(value) = own_member(object, symbol) {
        return Ok(value);
    }
    match type_method(vm, object, symbol) {
        Some(method) => BoundMethod::new(vm, method, object).map_err(|_| Panic(Value::null())),
        None => Err(no_member_panic(vm, object, symbol)),
    }
}

fn no_member_panic(vm: &mut Vm, object: Value, symbol: Value) -> Panic {
    let name = Symbol::try_from(symbol)
        .and_then(|s| Str::try_from(s.name()))
        .map_or_else(|| "<symbol>".to_string(), |s| s.as_str().to_string());
    Panic::msg(
        vm,
        &format!("{} has no member '{name}'", object.internal_kind().name()),
    )
}

fn store_member(vm: &mut Vm, object: Value, symbol: Value, value: Value) -> Result<(), Panic> {
    match object.internal_kind() {
        InternalKind::Record => {
            let record = Record::try_from(object).unwrap();
            record
                .set(symbol, value)
                .map_err(|_| Panic::msg(vm, "record has no such field"))
        }
        InternalKind::Module => Err(Panic::msg(vm, "module members cannot be assigned")),
        other => Err(Panic::msg(
            vm,
            &format!("member assignment is not supported on {}", other.name()),
        )),
    }
}

/// Method resolution for `v.name(...)`:
/// 1. own member (module export, record field) -> plain value, no receiver
/// 2. method table of the value's public type -> method plus receiver
/// 3. otherwise panic.
fn load_method(vm: &mut Vm, object: Value, symbol: Value) -> Result<(Value, Value), Panic> {
    if let Some(value) = own_member(object, symbol) {
        return Ok((value, Value::null()));
    }
    match type_method(vm, object, symbol) {
        Some(method) => Ok((method, object)),
        None => Err(no_member_panic(vm, object, symbol)),
    }
}

/// Dynamic `object[index]` access over arrays, tuples, buffers and hash
/// tables.
fn load_index(vm: &mut Vm, object: Value, index: Value) -> Result<Value, Panic> {
    match object.internal_kind() {
        InternalKind::Array => {
            let array = Array::try_from(object).unwrap();
            let i = index_number(vm, index, array.len())?;
            Ok(array.get(i).expect("index checked"))
        }
        InternalKind::Tuple => {
            let tuple = Tuple::try_from(object).unwrap();
            let i = index_number(vm, index, tuple.len())?;
            Ok(tuple.get(i).expect("index checked"))
        }
        InternalKind::Buffer => {
            let buffer = Buffer::try_from(object).unwrap();
            let i = index_number(vm, index, buffer.len())?;
            let byte = buffer.get(i).expect("index checked");
            number::make_integer(vm, byte as i64).map_err(|_| Panic(Value::null()))
        }
        InternalKind::HashTable => {
            let table = HashTable::try_from(object).unwrap();
            Ok(table.get(index).unwrap_or(Value::null()))
        }
        // Environments are only reachable from compiler-generated code,
        // which uses indexed access to seed freshly created captures.
        InternalKind::Environment => {
            let env = Environment::try_from(object).unwrap();
            let i = index_number(vm, index, env.len())?;
            Ok(env.get(i).expect("index checked"))
        }
        other => Err(Panic::msg(
            vm,
            &format!("indexed access is not supported on {}", other.name()),
        )),
    }
}

fn store_index(vm: &mut Vm, object: Value, index: Value, value: Value) -> Result<(), Panic> {
    match object.internal_kind() {
        InternalKind::Array => {
            let array = Array::try_from(object).unwrap();
            let i = index_number(vm, index, array.len())?;
            array.set(i, value).expect("index checked");
            Ok(())
        }
        InternalKind::Tuple => {
            let tuple = Tuple::try_from(object).unwrap();
            let i = index_number(vm, index, tuple.len())?;
            tuple.set(i, value).expect("index checked");
            Ok(())
        }
        InternalKind::Buffer => {
            let buffer = Buffer::try_from(object).unwrap();
            let i = index_number(vm, index, buffer.len())?;
            let byte = number::extract_integer(value)
                .filter(|&b| (0..=255).contains(&b))
                .ok_or_else(|| Panic::msg(vm, "buffer values must be bytes (0 through 255)"))?;
            buffer.set(i, byte as u8).expect("index checked");
            Ok(())
        }
        InternalKind::HashTable => {
            let table = HashTable::try_from(object).unwrap();
            table.set(vm, index, value).map_err(|_| Panic(Value::null()))
        }
        InternalKind::Environment => {
            let env = Environment::try_from(object).unwrap();
            let i = index_number(vm, index, env.len())?;
            env.set(i, value).expect("index checked");
            Ok(())
        }
        other => Err(Panic::msg(
            vm,
            &format!("indexed assignment is not supported on {}", other.name()),
        )),
    }
}

fn index_number(vm: &mut Vm, index: Value, len: usize) -> Result<usize, Panic> {
    let i = number::extract_integer(index)
        .ok_or_else(|| Panic::msg(vm, "container index must be an integer"))?;
    if i < 0 || i as usize >= len {
        return Err(Panic::msg(
            vm,
            &format!("index {i} out of bounds for size {len}"),
        ));
    }
    Ok(i as usize)
}

fn numeric_binary(vm: &mut Vm, op: Op, lhs: Value, rhs: Value) -> Result<Value, Panic> {
    let (Some(a), Some(b)) = (number::extract_number(lhs), number::extract_number(rhs)) else {
        return Err(Panic::msg(vm, "arithmetic requires numbers"));
    };

    // Mixed operands promote to float.
    if let (Number::Int(x), Number::Int(y)) = (a, b) {
        let result = match op {
            Op::Add => x.checked_add(y),
            Op::Sub => x.checked_sub(y),
            Op::Mul => x.checked_mul(y),
            Op::Div => {
                if y == 0 {
                    return Err(Panic::msg(vm, "integer division by zero"));
                }
                x.checked_div(y)
            }
            Op::Mod => {
                if y == 0 {
                    return Err(Panic::msg(vm, "integer modulo by zero"));
                }
                x.checked_rem(y)
            }
            Op::Pow => {
                if y < 0 {
                    // Negative exponents leave the integers.
                    let f = (x as f64).powf(y as f64);
                    return number::Float::new(vm, f).map_err(|_| Panic(Value::null()));
                }
                u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp))
            }
            _ => unreachable!("not a numeric op"),
        };
        return match result {
            Some(value) => number::make_integer(vm, value).map_err(|_| Panic(Value::null())),
            None => Err(Panic::msg(vm, "integer overflow")),
        };
    }

    let x = match a {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    };
    let y = match b {
        Number::Int(i) => i as f64,
        Number::Float(f) => f,
    };
    let result = match op {
        Op::Add => x + y,
        Op::Sub => x - y,
        Op::Mul => x * y,
        Op::Div => x / y,
        Op::Mod => x % y,
        Op::Pow => x.powf(y),
        _ => unreachable!("not a numeric op"),
    };
    number::Float::new(vm, result).map_err(|_| Panic(Value::null()))
}

fn bitwise_binary(vm: &mut Vm, op: Op, lhs: Value, rhs: Value) -> Result<Value, Panic> {
    let (Some(x), Some(y)) = (
        number::extract_integer(lhs),
        number::extract_integer(rhs),
    ) else {
        return Err(Panic::msg(vm, "bitwise operations require integers"));
    };
    let result = match op {
        // Shift counts are taken modulo the 64-bit width.
        Op::LShift => x.wrapping_shl(y as u32),
        Op::RShift => x.wrapping_shr(y as u32),
        Op::BitAnd => x & y,
        Op::BitOr => x | y,
        Op::BitXor => x ^ y,
        _ => unreachable!("not a bitwise op"),
    };
    number::make_integer(vm, result).map_err(|_| Panic(Value::null()))
}

fn numeric_compare(op: Op, lhs: Value, rhs: Value) -> Result<bool, &'static str> {
    let (Some(a), Some(b)) = (number::extract_number(lhs), number::extract_number(rhs)) else {
        return Err("ordering comparisons require numbers");
    };
    let ordering = match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.partial_cmp(&y),
        (Number::Float(x), Number::Float(y)) => x.partial_cmp(&y),
        (Number::Int(x), Number::Float(y)) => (x as f64).partial_cmp(&y),
        (Number::Float(x), Number::Int(y)) => x.partial_cmp(&(y as f64)),
    };
    Ok(match (op, ordering) {
        (_, None) => false, // NaN compares false.
        (Op::Lt, Some(o)) => o.is_lt(),
        (Op::Lte, Some(o)) => o.is_le(),
        (Op::Gt, Some(o)) => o.is_gt(),
        (Op::Gte, Some(o)) => o.is_ge(),
        _ => unreachable!("not a comparison op"),
    })
}
