//! Precise mark-and-sweep collector
//!
//! Marking starts from the VM's roots: the intrinsic tables (types,
//! interned strings, symbols, module registry, well-known values), every
//! live handle slot, the ready queue and the suspend set. Reached objects
//! are traced through their internal type's layout. Nothing is relocated,
//! so raw payload pointers (buffers, native objects) survive collections.
//!
//! Sweeping reclaims unmarked cells page by page, runs finalizers of dead
//! objects that declare one, rebuilds the free lists and prunes the
//! large-object list. The next collection threshold floats at twice the
//! surviving byte count.

use crate::types;
use crate::value::Value;
use crate::vm::Vm;
use std::time::Instant;

/// Run a full collection cycle.
pub(crate) fn collect(vm: &mut Vm, reason: &str) {
    let started = Instant::now();
    let before = vm.heap.live_estimate();

    // Mark phase: flood fill from the roots.
    let worklist: std::cell::RefCell<Vec<*mut crate::heap::Header>> =
        std::cell::RefCell::new(Vec::with_capacity(256));
    {
        let heap = &vm.heap;
        let mut visit = |value: Value| {
            if let Some(ptr) = value.heap_ptr() {
                // Safety: roots and traced slots only contain live values.
                if unsafe { heap.mark(ptr) } {
                    worklist.borrow_mut().push(ptr);
                }
            }
        };
        vm.trace_roots(&mut visit);
        while let Some(ptr) = worklist.borrow_mut().pop() {
            // Safety: marked objects are live and initialized.
            unsafe { types::trace_object(ptr, &mut visit) };
        }
    }

    // Sweep phase: reclaim, finalize, rebuild free lists.
    let stats = vm.heap.sweep(
        |ptr| unsafe { types::object_size(ptr) },
        |ptr| unsafe { types::finalize_object(ptr) },
    );

    vm.update_gc_threshold(stats.live_bytes);

    tracing::trace!(
        reason,
        before_bytes = before,
        live_bytes = stats.live_bytes,
        swept_objects = stats.swept_objects,
        swept_bytes = stats.swept_bytes,
        duration_us = started.elapsed().as_micros() as u64,
        "gc cycle"
    );
}
