//! Allocator redirection: one active store and the selector that routes
//! allocations to it.
//!
//! Host runtimes that expect a process-wide allocator go through a
//! [`Redirector`]. Rust callers can use [`Heap`] directly, where the target
//! is simply the value the method is called on.

use std::ptr::NonNull;

use fmalloc_core::{HeapError, HeapHandle};
use fmalloc_store::StoreConfig;

use crate::heap::{Heap, HeapStats};

#[derive(Debug)]
struct Active {
    handle: HeapHandle,
    heap: Heap,
}

/// Routes allocations to the single active store.
///
/// At most one store is active. [`init`](Self::init) opens it and selects
/// it; [`cleanup`](Self::cleanup) unmaps it. Allocation requests go to the
/// store named by the current target, which must be the active store.
#[derive(Debug, Default)]
pub struct Redirector {
    active: Option<Active>,
    target: Option<HeapHandle>,
}

/// Whether `ptr` is the empty sentinel handed out for zero-size requests.
pub fn is_empty_sentinel(ptr: *const u8) -> bool {
    ptr == NonNull::<u8>::dangling().as_ptr()
}

impl Redirector {
    /// A redirector with no active store.
    pub const fn new() -> Self {
        Self {
            active: None,
            target: None,
        }
    }

    /// Open the store described by `config` and make it the target.
    ///
    /// Returns the store's handle and whether its header was freshly
    /// written. If a store is already active this is a no-op: a warning is
    /// logged and the existing handle is returned with `false`.
    pub fn init(&mut self, config: &StoreConfig) -> Result<(HeapHandle, bool), HeapError> {
        if let Some(active) = &self.active {
            tracing::warn!(
                active = %active.heap.path().display(),
                requested = %config.path().display(),
                "store already initialized; ignoring init"
            );
            return Ok((active.handle, false));
        }
        let heap = Heap::open(config)?;
        let fresh = heap.freshly_initialized();
        let handle = HeapHandle::next();
        tracing::info!(%handle, path = %heap.path().display(), fresh, "store active");
        self.active = Some(Active { handle, heap });
        self.target = Some(handle);
        Ok((handle, fresh))
    }

    /// Handle of the active store, if any.
    pub fn active_handle(&self) -> Option<HeapHandle> {
        self.active.as_ref().map(|a| a.handle)
    }

    /// Currently selected target.
    pub fn target(&self) -> Option<HeapHandle> {
        self.target
    }

    /// Whether a store is active.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Select `handle` as the allocation target.
    ///
    /// Fails with [`HeapError::NotInitialized`] when no store is active or
    /// `handle` does not name it.
    pub fn set_target(&mut self, handle: HeapHandle) -> Result<(), HeapError> {
        match &self.active {
            Some(active) if active.handle == handle => {
                self.target = Some(handle);
                Ok(())
            }
            _ => Err(HeapError::NotInitialized),
        }
    }

    /// Allocate `size` bytes from the target store.
    ///
    /// Zero-size requests return the empty sentinel without touching the
    /// heap.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let heap = self.selected()?;
        if size == 0 {
            return Ok(NonNull::dangling());
        }
        heap.allocate(size)
    }

    /// Resize a block from the target store.
    ///
    /// A null pointer or the empty sentinel behaves like
    /// [`allocate`](Self::allocate); a zero size frees the block and returns
    /// the empty sentinel.
    pub fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Result<NonNull<u8>, HeapError> {
        let Some(old) = NonNull::new(ptr).filter(|p| !is_empty_sentinel(p.as_ptr())) else {
            return self.allocate(size);
        };
        let heap = self.selected()?;
        if size == 0 {
            heap.deallocate(old)?;
            return Ok(NonNull::dangling());
        }
        heap.reallocate(old, size)
    }

    /// Return a block to the target store.
    ///
    /// Never fails: null, the empty sentinel and calls with no active store
    /// are ignored, and anything the heap rejects is logged as a warning.
    pub fn free(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr).filter(|p| !is_empty_sentinel(p.as_ptr())) else {
            return;
        };
        let Ok(heap) = self.selected() else {
            tracing::warn!(addr = ptr.as_ptr() as usize, "free with no active store; ignored");
            return;
        };
        if let Err(e) = heap.deallocate(ptr) {
            tracing::warn!(addr = ptr.as_ptr() as usize, error = %e, "free rejected");
        }
    }

    /// Occupancy of the target store.
    pub fn stats(&mut self) -> Result<HeapStats, HeapError> {
        Ok(self.selected()?.stats())
    }

    /// Unmap the active store and clear the target.
    ///
    /// Returns whether a store was active. Pointers into the store are
    /// invalid afterwards.
    pub fn cleanup(&mut self) -> bool {
        self.target = None;
        match self.active.take() {
            Some(active) => {
                tracing::info!(handle = %active.handle, path = %active.heap.path().display(), "store released");
                active.heap.close();
                true
            }
            None => false,
        }
    }

    /// The active heap.
    pub fn heap(&self) -> Option<&Heap> {
        self.active.as_ref().map(|a| &a.heap)
    }

    /// The active heap, mutably.
    pub fn heap_mut(&mut self) -> Option<&mut Heap> {
        self.active.as_mut().map(|a| &mut a.heap)
    }

    fn selected(&mut self) -> Result<&mut Heap, HeapError> {
        match (&mut self.active, self.target) {
            (Some(active), Some(target)) if active.handle == target => Ok(&mut active.heap),
            _ => Err(HeapError::NotInitialized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmalloc_test_utils::ScratchDir;

    #[test]
    fn nothing_works_before_init() {
        let mut r = Redirector::new();
        assert_eq!(r.allocate(8), Err(HeapError::NotInitialized));
        assert_eq!(r.set_target(HeapHandle(1)), Err(HeapError::NotInitialized));
        assert!(!r.cleanup());
        // Silent.
        r.free(std::ptr::null_mut());
    }

    #[test]
    fn second_init_is_soft_noop() {
        let dir = ScratchDir::new();
        let mut r = Redirector::new();
        let (h1, fresh) = r.init(&StoreConfig::new(dir.file("a.bin"))).unwrap();
        assert!(fresh);
        let (h2, fresh2) = r.init(&StoreConfig::new(dir.file("b.bin"))).unwrap();
        assert_eq!(h1, h2);
        assert!(!fresh2);
        assert!(!dir.file("b.bin").exists());
    }

    #[test]
    fn zero_size_gets_sentinel() {
        let dir = ScratchDir::new();
        let mut r = Redirector::new();
        r.init(&StoreConfig::new(dir.file("a.bin"))).unwrap();
        let p = r.allocate(0).unwrap();
        assert!(is_empty_sentinel(p.as_ptr()));
        assert_eq!(r.stats().unwrap().live_blocks, 0);
        r.free(p.as_ptr());
    }

    #[test]
    fn stale_handle_rejected() {
        let dir = ScratchDir::new();
        let mut r = Redirector::new();
        let (h, _) = r.init(&StoreConfig::new(dir.file("a.bin"))).unwrap();
        assert!(r.cleanup());
        let (h2, fresh) = r.init(&StoreConfig::new(dir.file("a.bin"))).unwrap();
        assert!(!fresh);
        assert_ne!(h, h2);
        assert_eq!(r.set_target(h), Err(HeapError::NotInitialized));
        assert!(r.set_target(h2).is_ok());
    }
}
