//! Rill virtual machine runtime
//!
//! A managed runtime for the Rill scripting language: a page-based heap
//! with precise mark-sweep collection, a tagged value representation with
//! a per-VM type system, rooted handles for embedders, coroutines with
//! typed stack frames, a bytecode interpreter and a cooperative scheduler.
//!
//! Each [`Vm`] instance is isolated and single-threaded; embedders hold
//! values through [`handles`] and call native functions through the
//! conventions in [`natives`]. Bytecode modules come from `rill-core`.

mod builtins;
mod error;
mod gc;
pub mod handles;
mod heap;
mod interpreter;
mod modules;
pub mod natives;
mod objects;
mod scheduler;
mod types;
mod value;
mod vm;

pub use error::{Error, ErrorKind, VmResult};
pub use handles::{Global, Local, Scope, Span};
pub use natives::{
    AsyncContext, AsyncFn, AsyncResumer, Panic, ResumableContext, ResumableFn, SyncContext,
    SyncFn, VARIADIC,
};
pub use objects::coroutine::CoroutineState;
pub use objects::coroutine_stack::{
    RESUMABLE_STATE_CLEANUP, RESUMABLE_STATE_END, RESUMABLE_STATE_START,
};
pub use objects::native::FinalizerFn;
pub use value::{Kind, Value, SMALL_INT_MAX, SMALL_INT_MIN};
pub use vm::{PrintSink, Vm, VmSettings};
