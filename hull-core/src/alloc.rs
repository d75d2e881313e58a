//! Tracked allocator: byte-accounted allocation with an optional hard ceiling.
//!
//! This is the component a C embedder would hand to the interpreter and to
//! the HTTP library as an allocator vtable. `mlua`'s own heap is bounded
//! separately via `Lua::set_memory_limit` — but `hull-cli` installs a
//! [`TrackedAllocator`] as the process's `#[global_allocator]`, seeded from
//! `-M`/`max_process_memory_bytes` once the config is parsed, so every
//! host-side allocation Hull makes on a script's behalf (route metadata,
//! response body copies, statement-cache scratch buffers) is accounted
//! through the same counter without any call site needing to know about it.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sentinel `ceiling` value meaning "no ceiling configured".
const UNBOUNDED: usize = usize::MAX;

/// Raised when an allocation would exceed the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("allocation of {requested} bytes exceeds budget ({used}/{ceiling} used)")]
pub struct OutOfBudget {
    pub requested: usize,
    pub used: usize,
    pub ceiling: usize,
}

/// Byte-accounted allocator with an optional hard ceiling.
///
/// `used` always equals the sum of live allocations made through this
/// instance; `peak` is monotonic non-decreasing. Failures to allocate
/// surface as `None`, never as a panic.
pub struct TrackedAllocator {
    used: AtomicUsize,
    peak: AtomicUsize,
    ceiling: AtomicUsize,
}

impl TrackedAllocator {
    /// `const` so a `TrackedAllocator` can be named directly in a
    /// `#[global_allocator] static`, before any config is available — the
    /// ceiling defaults unbounded and is tightened later via
    /// [`TrackedAllocator::set_ceiling`].
    pub const fn new(ceiling: Option<usize>) -> Self {
        let ceiling = match ceiling {
            Some(c) => c,
            None => UNBOUNDED,
        };
        Self {
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            ceiling: AtomicUsize::new(ceiling),
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn ceiling(&self) -> Option<usize> {
        match self.ceiling.load(Ordering::Relaxed) {
            UNBOUNDED => None,
            c => Some(c),
        }
    }

    /// Tighten or relax the ceiling after construction — used once at
    /// startup, when `HullConfig.max_process_memory_bytes` becomes known,
    /// since a `#[global_allocator]` static must exist before `main` runs.
    pub fn set_ceiling(&self, ceiling: Option<usize>) {
        self.ceiling
            .store(ceiling.unwrap_or(UNBOUNDED), Ordering::Relaxed);
    }

    fn headroom_ok(&self, additional: usize) -> bool {
        let ceiling = self.ceiling.load(Ordering::Relaxed);
        if ceiling == UNBOUNDED {
            return true;
        }
        self.used.load(Ordering::Relaxed).saturating_add(additional) <= ceiling
    }

    fn bump_peak(&self, new_used: usize) {
        let mut peak = self.peak.load(Ordering::Relaxed);
        while new_used > peak {
            match self
                .peak
                .compare_exchange_weak(peak, new_used, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => peak = observed,
            }
        }
    }

    /// Allocate `size` bytes, or return `Err(OutOfBudget)` without touching
    /// the underlying allocator if the ceiling would be exceeded.
    ///
    /// # Safety
    /// `layout` must have nonzero size; the caller is responsible for
    /// eventually passing the returned pointer (and the same layout) to
    /// [`TrackedAllocator::free`].
    pub unsafe fn alloc(&self, layout: Layout) -> Result<ptr::NonNull<u8>, OutOfBudget> {
        if !self.headroom_ok(layout.size()) {
            return Err(OutOfBudget {
                requested: layout.size(),
                used: self.used(),
                ceiling: self.ceiling.load(Ordering::Relaxed),
            });
        }
        let raw = System.alloc(layout);
        let ptr = match ptr::NonNull::new(raw) {
            Some(p) => p,
            None => {
                return Err(OutOfBudget {
                    requested: layout.size(),
                    used: self.used(),
                    ceiling: self.ceiling.load(Ordering::Relaxed),
                });
            }
        };
        let new_used = self.used.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
        self.bump_peak(new_used);
        Ok(ptr)
    }

    /// Reallocate, adjusting the counter by the delta. Shrinking never fails
    /// for accounting reasons — only growth can be denied by the ceiling.
    ///
    /// # Safety
    /// `ptr` must have been allocated by this instance with `old_layout`.
    pub unsafe fn realloc(
        &self,
        ptr: ptr::NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<ptr::NonNull<u8>, OutOfBudget> {
        if new_size > old_layout.size() {
            let delta = new_size - old_layout.size();
            if !self.headroom_ok(delta) {
                return Err(OutOfBudget {
                    requested: new_size,
                    used: self.used(),
                    ceiling: self.ceiling.load(Ordering::Relaxed),
                });
            }
        }
        let raw = System.realloc(ptr.as_ptr(), old_layout, new_size);
        let new_ptr = match ptr::NonNull::new(raw) {
            Some(p) => p,
            None => {
                return Err(OutOfBudget {
                    requested: new_size,
                    used: self.used(),
                    ceiling: self.ceiling.load(Ordering::Relaxed),
                });
            }
        };
        if new_size >= old_layout.size() {
            let new_used = self.used.fetch_add(new_size - old_layout.size(), Ordering::Relaxed)
                + (new_size - old_layout.size());
            self.bump_peak(new_used);
        } else {
            let shrink = old_layout.size() - new_size;
            self.used.fetch_sub(shrink.min(self.used()), Ordering::Relaxed);
        }
        Ok(new_ptr)
    }

    /// Free a previously allocated block, decrementing the counter.
    /// Saturates at zero; never panics even on a double-account mismatch.
    ///
    /// # Safety
    /// `ptr` must have been allocated by this instance with `layout`.
    pub unsafe fn free(&self, ptr: ptr::NonNull<u8>, layout: Layout) {
        System.dealloc(ptr.as_ptr(), layout);
        let size = layout.size();
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(size))
            })
            .ok();
    }
}

/// Lets a `TrackedAllocator` be named in a `#[global_allocator] static`.
/// Mirrors the fallible `alloc`/`realloc`/`free` methods above but follows
/// `GlobalAlloc`'s contract instead: a denied or failed allocation returns
/// null rather than `Err`, and there is no separate zeroing variant to
/// reuse, so `alloc_zeroed` re-checks headroom itself rather than calling
/// `alloc` and zeroing after (`System.alloc_zeroed` is already zeroed, and
/// zeroing twice would cost a needless pass over the buffer).
unsafe impl GlobalAlloc for TrackedAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !self.headroom_ok(layout.size()) {
            return ptr::null_mut();
        }
        let raw = System.alloc(layout);
        if raw.is_null() {
            return raw;
        }
        let new_used = self.used.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
        self.bump_peak(new_used);
        raw
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if !self.headroom_ok(layout.size()) {
            return ptr::null_mut();
        }
        let raw = System.alloc_zeroed(layout);
        if raw.is_null() {
            return raw;
        }
        let new_used = self.used.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
        self.bump_peak(new_used);
        raw
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        let size = layout.size();
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(size))
            })
            .ok();
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if new_size > layout.size() {
            let delta = new_size - layout.size();
            if !self.headroom_ok(delta) {
                return ptr::null_mut();
            }
        }
        let raw = System.realloc(ptr, layout, new_size);
        if raw.is_null() {
            return raw;
        }
        if new_size >= layout.size() {
            let new_used =
                self.used.fetch_add(new_size - layout.size(), Ordering::Relaxed) + (new_size - layout.size());
            self.bump_peak(new_used);
        } else {
            let shrink = layout.size() - new_size;
            self.used.fetch_sub(shrink.min(self.used()), Ordering::Relaxed);
        }
        raw
    }
}

/// A bump allocator rooted in a [`TrackedAllocator`], freed as one unit.
///
/// Used to own route-registration metadata so route objects never leak:
/// nothing inside the arena is individually freed, the whole region is
/// dropped at shutdown.
pub struct Arena<'a> {
    parent: &'a TrackedAllocator,
    chunks: std::cell::RefCell<Vec<(ptr::NonNull<u8>, Layout)>>,
}

impl<'a> Arena<'a> {
    pub fn new(parent: &'a TrackedAllocator) -> Self {
        Self {
            parent,
            chunks: std::cell::RefCell::new(Vec::new()),
        }
    }

    /// Allocate `layout` bytes from the arena; owned until the arena drops.
    pub fn alloc(&self, layout: Layout) -> Result<ptr::NonNull<u8>, OutOfBudget> {
        let ptr = unsafe { self.parent.alloc(layout)? };
        self.chunks.borrow_mut().push((ptr, layout));
        Ok(ptr)
    }

    pub fn bytes_in_use(&self) -> usize {
        self.chunks
            .borrow()
            .iter()
            .map(|(_, layout)| layout.size())
            .sum()
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        for (ptr, layout) in self.chunks.borrow_mut().drain(..) {
            unsafe { self.parent.free(ptr, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(n: usize) -> Layout {
        Layout::array::<u8>(n).unwrap()
    }

    #[test]
    fn accounting_matches_live_allocations() {
        let alloc = TrackedAllocator::new(None);
        let a = unsafe { alloc.alloc(layout(100)).unwrap() };
        let b = unsafe { alloc.alloc(layout(50)).unwrap() };
        assert_eq!(alloc.used(), 150);
        unsafe { alloc.free(a, layout(100)) };
        assert_eq!(alloc.used(), 50);
        unsafe { alloc.free(b, layout(50)) };
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn peak_is_monotonic() {
        let alloc = TrackedAllocator::new(None);
        let a = unsafe { alloc.alloc(layout(200)).unwrap() };
        assert_eq!(alloc.peak(), 200);
        unsafe { alloc.free(a, layout(200)) };
        assert_eq!(alloc.used(), 0);
        assert_eq!(alloc.peak(), 200);
        let b = unsafe { alloc.alloc(layout(10)).unwrap() };
        assert_eq!(alloc.peak(), 200);
        unsafe { alloc.free(b, layout(10)) };
    }

    #[test]
    fn ceiling_denies_without_changing_used() {
        let alloc = TrackedAllocator::new(Some(100));
        let before = alloc.used();
        let result = unsafe { alloc.alloc(layout(200)) };
        assert!(result.is_err());
        assert_eq!(alloc.used(), before);
    }

    #[test]
    fn set_ceiling_tightens_after_construction() {
        let alloc = TrackedAllocator::new(None);
        assert_eq!(alloc.ceiling(), None);
        alloc.set_ceiling(Some(64));
        assert_eq!(alloc.ceiling(), Some(64));
        let result = unsafe { alloc.alloc(layout(128)) };
        assert!(result.is_err());
    }

    #[test]
    fn global_alloc_contract_returns_null_over_ceiling() {
        let alloc = TrackedAllocator::new(Some(16));
        let ptr = unsafe { GlobalAlloc::alloc(&alloc, layout(32)) };
        assert!(ptr.is_null());
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn global_alloc_contract_accounts_live_bytes() {
        let alloc = TrackedAllocator::new(None);
        let layout = layout(48);
        let ptr = unsafe { GlobalAlloc::alloc(&alloc, layout) };
        assert!(!ptr.is_null());
        assert_eq!(alloc.used(), 48);
        unsafe { GlobalAlloc::dealloc(&alloc, ptr, layout) };
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn shrink_never_fails_for_accounting_reasons() {
        let alloc = TrackedAllocator::new(Some(64));
        let ptr = unsafe { alloc.alloc(layout(64)).unwrap() };
        let shrunk = unsafe { alloc.realloc(ptr, layout(64), 8) };
        assert!(shrunk.is_ok());
        assert_eq!(alloc.used(), 8);
        unsafe { alloc.free(shrunk.unwrap(), layout(8)) };
    }

    #[test]
    fn free_saturates_at_zero() {
        let alloc = TrackedAllocator::new(None);
        let ptr = unsafe { alloc.alloc(layout(10)).unwrap() };
        unsafe { alloc.free(ptr, layout(10)) };
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn arena_frees_all_chunks_on_drop() {
        let parent = TrackedAllocator::new(None);
        {
            let arena = Arena::new(&parent);
            arena.alloc(layout(32)).unwrap();
            arena.alloc(layout(64)).unwrap();
            assert_eq!(arena.bytes_in_use(), 96);
            assert_eq!(parent.used(), 96);
        }
        assert_eq!(parent.used(), 0);
    }
}
