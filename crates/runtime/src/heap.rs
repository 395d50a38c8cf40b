//! Page-based managed heap
//!
//! The heap hands out 16-byte-granular cells from fixed-size, page-aligned
//! pages. Each page starts with a header holding a first-fit free list and
//! two bitmaps (block-start and mark, one bit per cell). Objects larger
//! than half a page live in individual system allocations tracked in a
//! side list and flagged in their GC word; they are never relocated, and
//! neither is anything else.
//!
//! The heap is a dumb byte allocator: object headers are written by the
//! VM, and the sweep phase is driven by the collector, which supplies the
//! size/finalize callbacks (object sizes depend on the type system, which
//! the heap knows nothing about).

use crate::types::InternalKind;
use crate::types::InternalTypeData;
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// Allocation granularity. One bitmap bit covers one cell.
pub(crate) const CELL_SIZE: usize = 16;

/// Smallest / largest supported page size (powers of two).
pub(crate) const MIN_PAGE_SIZE: usize = 1 << 16;
pub(crate) const MAX_PAGE_SIZE: usize = 1 << 24;

const GC_LARGE: u64 = 1 << 0;
const GC_MARK: u64 = 1 << 1;

/// Common header of every heap object: the internal type descriptor that
/// drives tracing and sizing, plus one word of GC state.
#[repr(C)]
pub(crate) struct Header {
    pub(crate) type_desc: *mut InternalTypeData,
    pub(crate) gc_word: u64,
}

impl Header {
    /// # Safety
    /// `ptr` must point to a live, initialized heap object.
    pub(crate) unsafe fn kind(ptr: *mut Header) -> InternalKind {
        unsafe { (*(*ptr).type_desc).kind }
    }

    pub(crate) unsafe fn is_large(ptr: *mut Header) -> bool {
        unsafe { (*ptr).gc_word & GC_LARGE != 0 }
    }
}

/// Free-list node threaded through unused cells. Fits exactly one cell.
#[repr(C)]
struct FreeCell {
    /// Length of this free run, in cells.
    cells: usize,
    next: *mut FreeCell,
}

/// Fixed page header, followed by the block-start bitmap, the mark bitmap
/// and then the object cells.
#[repr(C)]
struct PageHeader {
    free: *mut FreeCell,
}

struct LargeObject {
    ptr: NonNull<Header>,
    size: usize,
}

/// Geometry of a page: bitmap placement and the first usable cell.
#[derive(Clone, Copy)]
struct PageLayout {
    page_size: usize,
    bitmap_words: usize,
    first_cell: usize,
    total_cells: usize,
}

impl PageLayout {
    fn new(page_size: usize) -> PageLayout {
        let total_cells = page_size / CELL_SIZE;
        let bitmap_words = total_cells.div_ceil(64);
        let header_bytes = std::mem::size_of::<PageHeader>() + 2 * bitmap_words * 8;
        let first_cell = header_bytes.div_ceil(CELL_SIZE);
        PageLayout {
            page_size,
            bitmap_words,
            first_cell,
            total_cells,
        }
    }

    unsafe fn block_bitmap(self, base: *mut u8) -> *mut u64 {
        unsafe { base.add(std::mem::size_of::<PageHeader>()) as *mut u64 }
    }

    unsafe fn mark_bitmap(self, base: *mut u8) -> *mut u64 {
        unsafe { self.block_bitmap(base).add(self.bitmap_words) }
    }
}

unsafe fn bit_get(bitmap: *mut u64, index: usize) -> bool {
    unsafe { *bitmap.add(index / 64) & (1 << (index % 64)) != 0 }
}

unsafe fn bit_set(bitmap: *mut u64, index: usize) {
    unsafe { *bitmap.add(index / 64) |= 1 << (index % 64) }
}

unsafe fn bit_clear(bitmap: *mut u64, index: usize) {
    unsafe { *bitmap.add(index / 64) &= !(1 << (index % 64)) }
}

/// The page allocator plus the large-object side list.
pub(crate) struct Heap {
    layout: PageLayout,
    page_mask: usize,
    max_heap: usize,
    /// Bytes reserved from the system (pages plus large objects); this is
    /// what `max_heap` caps.
    reserved: usize,
    /// Live object byte estimate, maintained by allocation and sweeping.
    /// Drives the floating collection threshold.
    live_estimate: usize,
    pages: Vec<NonNull<u8>>,
    large: Vec<LargeObject>,
}

pub(crate) struct SweepStats {
    pub swept_objects: usize,
    pub swept_bytes: usize,
    pub live_bytes: usize,
}

impl Heap {
    pub(crate) fn new(page_size: usize, max_heap: usize) -> Heap {
        assert!(
            page_size.is_power_of_two()
                && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size),
            "page size must be a power of two in [2^16, 2^24]"
        );
        Heap {
            layout: PageLayout::new(page_size),
            page_mask: !(page_size - 1),
            max_heap,
            reserved: 0,
            live_estimate: 0,
            pages: Vec::new(),
            large: Vec::new(),
        }
    }

    pub(crate) fn live_estimate(&self) -> usize {
        self.live_estimate
    }

    pub(crate) fn reserved(&self) -> usize {
        self.reserved
    }

    /// Objects above this size get individual allocations.
    pub(crate) fn large_threshold(&self) -> usize {
        self.layout.page_size / 2
    }

    fn round_size(size: usize) -> usize {
        size.max(CELL_SIZE).div_ceil(CELL_SIZE) * CELL_SIZE
    }

    /// Allocate `size` bytes of object storage. Returns an uninitialized
    /// header pointer with the GC word set (large bit only); the caller
    /// writes the type descriptor and payload before the next allocation.
    ///
    /// Returns `None` when no free run fits and reserving more memory
    /// would exceed `max_heap` (the VM collects and retries).
    pub(crate) fn allocate(&mut self, size: usize) -> Option<NonNull<Header>> {
        let size = Self::round_size(size);
        if size > self.large_threshold() {
            return self.allocate_large(size);
        }

        let cells = size / CELL_SIZE;
        for i in 0..self.pages.len() {
            let page = self.pages[i];
            if let Some(ptr) = unsafe { self.allocate_in_page(page.as_ptr(), cells) } {
                self.live_estimate += size;
                return Some(ptr);
            }
        }

        // No fit: reserve a fresh page if the cap allows it.
        if self.reserved + self.layout.page_size > self.max_heap {
            return None;
        }
        let page = self.new_page()?;
        let ptr = unsafe { self.allocate_in_page(page.as_ptr(), cells) };
        debug_assert!(ptr.is_some(), "fresh page must satisfy a small allocation");
        self.live_estimate += size;
        ptr
    }

    fn allocate_large(&mut self, size: usize) -> Option<NonNull<Header>> {
        if self.reserved + size > self.max_heap {
            return None;
        }
        let layout = Layout::from_size_align(size, CELL_SIZE).ok()?;
        let raw = unsafe { alloc(layout) } as *mut Header;
        let ptr = NonNull::new(raw)?;
        unsafe {
            (*ptr.as_ptr()).gc_word = GC_LARGE;
        }
        self.reserved += size;
        self.live_estimate += size;
        self.large.push(LargeObject { ptr, size });
        Some(ptr)
    }

    fn new_page(&mut self) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(self.layout.page_size, self.layout.page_size).ok()?;
        let base = NonNull::new(unsafe { alloc(layout) })?;
        self.reserved += self.layout.page_size;

        unsafe {
            let header = base.as_ptr() as *mut PageHeader;
            let block = self.layout.block_bitmap(base.as_ptr());
            let mark = self.layout.mark_bitmap(base.as_ptr());
            std::ptr::write_bytes(block, 0, self.layout.bitmap_words);
            std::ptr::write_bytes(mark, 0, self.layout.bitmap_words);

            // The whole data area starts as one free run.
            let first = base
                .as_ptr()
                .add(self.layout.first_cell * CELL_SIZE) as *mut FreeCell;
            (*first).cells = self.layout.total_cells - self.layout.first_cell;
            (*first).next = std::ptr::null_mut();
            (*header).free = first;
        }

        self.pages.push(base);
        Some(base)
    }

    /// First-fit scan of one page's free list.
    unsafe fn allocate_in_page(&self, base: *mut u8, cells: usize) -> Option<NonNull<Header>> {
        unsafe {
            let header = base as *mut PageHeader;
            let mut link: *mut *mut FreeCell = &mut (*header).free;
            while !(*link).is_null() {
                let cell = *link;
                if (*cell).cells >= cells {
                    let remaining = (*cell).cells - cells;
                    let obj = cell as *mut u8;
                    if remaining == 0 {
                        *link = (*cell).next;
                    } else {
                        let rest = obj.add(cells * CELL_SIZE) as *mut FreeCell;
                        (*rest).cells = remaining;
                        (*rest).next = (*cell).next;
                        *link = rest;
                    }

                    let index = (obj as usize - base as usize) / CELL_SIZE;
                    bit_set(self.layout.block_bitmap(base), index);
                    let out = obj as *mut Header;
                    (*out).gc_word = 0;
                    return Some(NonNull::new_unchecked(out));
                }
                link = &mut (*cell).next;
            }
            None
        }
    }

    fn page_base(&self, ptr: *mut Header) -> *mut u8 {
        (ptr as usize & self.page_mask) as *mut u8
    }

    /// Set the mark bit for a reachable object. Returns true if the object
    /// was not marked before (i.e. its children still need visiting).
    ///
    /// # Safety
    /// `ptr` must point to a live heap object owned by this heap.
    pub(crate) unsafe fn mark(&self, ptr: *mut Header) -> bool {
        unsafe {
            if Header::is_large(ptr) {
                if (*ptr).gc_word & GC_MARK != 0 {
                    return false;
                }
                (*ptr).gc_word |= GC_MARK;
                true
            } else {
                let base = self.page_base(ptr);
                let index = (ptr as usize - base as usize) / CELL_SIZE;
                let mark = self.layout.mark_bitmap(base);
                if bit_get(mark, index) {
                    return false;
                }
                bit_set(mark, index);
                true
            }
        }
    }

    /// Reclaim every unmarked object, clear mark state and rebuild the
    /// free lists. `object_size` must report the byte size of a live
    /// object; `finalize` is called once for each dead object before its
    /// memory is reused.
    pub(crate) fn sweep(
        &mut self,
        object_size: impl Fn(*mut Header) -> usize,
        mut finalize: impl FnMut(*mut Header),
    ) -> SweepStats {
        let mut stats = SweepStats {
            swept_objects: 0,
            swept_bytes: 0,
            live_bytes: 0,
        };

        for &page in &self.pages {
            unsafe {
                self.sweep_page(page.as_ptr(), &object_size, &mut finalize, &mut stats);
            }
        }

        // Large objects: retain marked, release the rest.
        let mut kept = Vec::with_capacity(self.large.len());
        for large in self.large.drain(..) {
            let ptr = large.ptr.as_ptr();
            unsafe {
                if (*ptr).gc_word & GC_MARK != 0 {
                    (*ptr).gc_word &= !GC_MARK;
                    stats.live_bytes += large.size;
                    kept.push(large);
                } else {
                    finalize(ptr);
                    stats.swept_objects += 1;
                    stats.swept_bytes += large.size;
                    self.reserved -= large.size;
                    let layout = Layout::from_size_align(large.size, CELL_SIZE)
                        .expect("large layout was valid at allocation");
                    dealloc(ptr as *mut u8, layout);
                }
            }
        }
        self.large = kept;

        self.live_estimate = stats.live_bytes;
        stats
    }

    unsafe fn sweep_page(
        &self,
        base: *mut u8,
        object_size: &impl Fn(*mut Header) -> usize,
        finalize: &mut impl FnMut(*mut Header),
        stats: &mut SweepStats,
    ) {
        unsafe {
            let block = self.layout.block_bitmap(base);
            let mark = self.layout.mark_bitmap(base);
            let header = base as *mut PageHeader;

            (*header).free = std::ptr::null_mut();
            // Tail pointer so the rebuilt free list stays address ordered.
            let mut tail: *mut *mut FreeCell = &mut (*header).free;

            let mut run_start: Option<usize> = None;
            let mut pos = self.layout.first_cell;
            while pos < self.layout.total_cells {
                if bit_get(block, pos) {
                    let obj = base.add(pos * CELL_SIZE) as *mut Header;
                    let cells = Heap::round_size(object_size(obj)) / CELL_SIZE;
                    if bit_get(mark, pos) {
                        // Live object: flush any pending free run before it.
                        bit_clear(mark, pos);
                        if let Some(start) = run_start.take() {
                            tail = self.flush_free_run(base, start, pos, tail);
                        }
                        stats.live_bytes += cells * CELL_SIZE;
                    } else {
                        finalize(obj);
                        bit_clear(block, pos);
                        stats.swept_objects += 1;
                        stats.swept_bytes += cells * CELL_SIZE;
                        if run_start.is_none() {
                            run_start = Some(pos);
                        }
                    }
                    pos += cells;
                } else {
                    // A free run left over from before this collection.
                    let free = base.add(pos * CELL_SIZE) as *mut FreeCell;
                    let cells = (*free).cells;
                    if run_start.is_none() {
                        run_start = Some(pos);
                    }
                    pos += cells;
                }
            }
            if let Some(start) = run_start {
                self.flush_free_run(base, start, self.layout.total_cells, tail);
            }
        }
    }

    unsafe fn flush_free_run(
        &self,
        base: *mut u8,
        start: usize,
        end: usize,
        tail: *mut *mut FreeCell,
    ) -> *mut *mut FreeCell {
        unsafe {
            let cell = base.add(start * CELL_SIZE) as *mut FreeCell;
            (*cell).cells = end - start;
            (*cell).next = std::ptr::null_mut();
            *tail = cell;
            &mut (*cell).next
        }
    }

    /// Iterate over every live object. Used by VM teardown to run pending
    /// finalizers; must not be called while a collection is in progress.
    pub(crate) fn each_object(&self, mut f: impl FnMut(*mut Header), object_size: impl Fn(*mut Header) -> usize) {
        for &page in &self.pages {
            unsafe {
                let base = page.as_ptr();
                let block = self.layout.block_bitmap(base);
                let mut pos = self.layout.first_cell;
                while pos < self.layout.total_cells {
                    if bit_get(block, pos) {
                        let obj = base.add(pos * CELL_SIZE) as *mut Header;
                        let cells = Heap::round_size(object_size(obj)) / CELL_SIZE;
                        f(obj);
                        pos += cells;
                    } else {
                        let free = base.add(pos * CELL_SIZE) as *mut FreeCell;
                        pos += (*free).cells;
                    }
                }
            }
        }
        for large in &self.large {
            f(large.ptr.as_ptr());
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let page_layout = Layout::from_size_align(self.layout.page_size, self.layout.page_size)
            .expect("page layout was valid at allocation");
        for page in self.pages.drain(..) {
            unsafe { dealloc(page.as_ptr(), page_layout) };
        }
        for large in self.large.drain(..) {
            let layout = Layout::from_size_align(large.size, CELL_SIZE)
                .expect("large layout was valid at allocation");
            unsafe { dealloc(large.ptr.as_ptr() as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> Heap {
        Heap::new(MIN_PAGE_SIZE, 8 * MIN_PAGE_SIZE)
    }

    #[test]
    fn test_allocate_returns_aligned_cells() {
        let mut heap = test_heap();
        let a = heap.allocate(24).unwrap();
        let b = heap.allocate(24).unwrap();
        assert_eq!(a.as_ptr() as usize % CELL_SIZE, 0);
        assert_eq!(b.as_ptr() as usize % CELL_SIZE, 0);
        // 24 bytes round up to two cells.
        assert_eq!(
            b.as_ptr() as usize - a.as_ptr() as usize,
            2 * CELL_SIZE
        );
    }

    #[test]
    fn test_large_objects_use_side_list() {
        let mut heap = test_heap();
        let size = heap.large_threshold() + CELL_SIZE;
        let ptr = heap.allocate(size).unwrap();
        unsafe {
            assert!(Header::is_large(ptr.as_ptr()));
        }
        assert_eq!(heap.large.len(), 1);
    }

    #[test]
    fn test_max_heap_is_enforced() {
        let mut heap = Heap::new(MIN_PAGE_SIZE, MIN_PAGE_SIZE);
        assert!(heap.allocate(32).is_some());
        // Second page would exceed the cap; exhaust the first page first.
        let huge = heap.large_threshold();
        while heap.allocate(huge).is_some() {}
        assert!(heap.allocate(MIN_PAGE_SIZE / 2).is_none());
    }

    #[test]
    fn test_mark_reports_first_visit_only() {
        let mut heap = test_heap();
        let ptr = heap.allocate(32).unwrap().as_ptr();
        unsafe {
            assert!(heap.mark(ptr));
            assert!(!heap.mark(ptr));
        }
    }

    #[test]
    fn test_sweep_reclaims_unmarked_and_reuses_memory() {
        let mut heap = test_heap();
        let a = heap.allocate(32).unwrap().as_ptr();
        let b = heap.allocate(32).unwrap().as_ptr();
        let c = heap.allocate(32).unwrap().as_ptr();

        unsafe {
            heap.mark(b);
        }
        let mut finalized = Vec::new();
        let stats = heap.sweep(|_| 32, |ptr| finalized.push(ptr as usize));
        assert_eq!(stats.swept_objects, 2);
        assert_eq!(stats.live_bytes, 32);
        assert!(finalized.contains(&(a as usize)));
        assert!(finalized.contains(&(c as usize)));

        // The freed run before the survivor is reused first (first fit,
        // address ordered).
        let d = heap.allocate(32).unwrap().as_ptr();
        assert_eq!(d as usize, a as usize);
    }

    #[test]
    fn test_sweep_unmarked_large_object() {
        let mut heap = test_heap();
        let size = heap.large_threshold() + CELL_SIZE;
        heap.allocate(size).unwrap();
        let reserved_before = heap.reserved();
        let stats = heap.sweep(|_| size, |_| {});
        assert_eq!(stats.swept_objects, 1);
        assert!(heap.reserved() < reserved_before);
        assert!(heap.large.is_empty());
    }

    #[test]
    fn test_sweep_twice_is_stable() {
        let mut heap = test_heap();
        let keep = heap.allocate(48).unwrap().as_ptr();
        heap.allocate(48).unwrap();
        unsafe {
            heap.mark(keep);
        }
        heap.sweep(|_| 48, |_| {});
        unsafe {
            heap.mark(keep);
        }
        let stats = heap.sweep(|_| 48, |_| {});
        assert_eq!(stats.swept_objects, 0);
        assert_eq!(stats.live_bytes, 48);
    }
}
