//! Heap object kinds
//!
//! Every object is a `#[repr(C)]` struct starting with the common
//! [`crate::heap::Header`], reached through lightweight `Copy` wrapper
//! types around raw pointers. Wrappers are ephemeral views: they are valid
//! only while the object is provably rooted (running coroutine, handle,
//! intrinsic table) and no collection can intervene.

pub(crate) mod array;
pub(crate) mod buffer;
pub(crate) mod coroutine;
pub(crate) mod coroutine_stack;
pub(crate) mod function;
pub(crate) mod hash_table;
pub(crate) mod module;
pub(crate) mod native;
pub(crate) mod number;
pub(crate) mod record;
pub(crate) mod result;
pub(crate) mod string;
