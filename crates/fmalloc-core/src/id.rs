//! Strongly-typed identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique [`HeapHandle`] allocation. Starts at 1 so that a
/// zeroed handle never names a live store.
static HEAP_HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Names one attached backing store.
///
/// Handles are never reused within a process: attaching the same file
/// again after a cleanup yields a new handle, so a stale handle held by a
/// host callback is detected instead of silently targeting the new store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapHandle(pub u64);

impl HeapHandle {
    /// The handle value that never names a store.
    pub const NONE: HeapHandle = HeapHandle(0);

    /// Allocate a fresh, unique handle.
    pub fn next() -> Self {
        Self(HEAP_HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value, as carried across the C boundary.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap#{}", self.0)
    }
}

impl From<u64> for HeapHandle {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_nonzero() {
        let a = HeapHandle::next();
        let b = HeapHandle::next();
        assert_ne!(a, b);
        assert_ne!(a, HeapHandle::NONE);
        assert_ne!(b, HeapHandle::NONE);
    }

    #[test]
    fn display() {
        assert_eq!(HeapHandle(7).to_string(), "heap#7");
    }
}
