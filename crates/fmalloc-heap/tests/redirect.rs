//! Allocator redirection end to end: init, allocate, free, reallocate,
//! cleanup and re-init against real store files.

use fmalloc_core::HeapError;
use fmalloc_heap::{is_empty_sentinel, Redirector};
use fmalloc_store::StoreConfig;
use fmalloc_test_utils::{ScratchDir, MIB};

#[test]
fn fresh_store_allocate_free_reallocate() {
    let dir = ScratchDir::new();
    let path = dir.file("heap.bin");
    let mut r = Redirector::new();

    let (_, fresh) = r.init(&StoreConfig::new(&path)).unwrap();
    assert!(fresh);
    assert_eq!(ScratchDir::file_len(&path), 32 * MIB);

    let p = r.allocate(120).unwrap();
    let off = r.heap().unwrap().offset_of(p.as_ptr()).unwrap();
    assert!(off >= 16 * MIB && off < 32 * MIB);
    r.free(p.as_ptr());
    assert_eq!(r.stats().unwrap().live_blocks, 0);

    let q = r.reallocate(std::ptr::null_mut(), 64).unwrap();
    let heap = r.heap_mut().unwrap();
    let qoff = heap.offset_of(q.as_ptr()).unwrap();
    heap.bytes_mut(qoff, 64).unwrap().fill(0xAB);

    let q2 = r.reallocate(q.as_ptr(), 5000).unwrap();
    let heap = r.heap().unwrap();
    let q2off = heap.offset_of(q2.as_ptr()).unwrap();
    assert!(heap.bytes(q2off, 64).unwrap().iter().all(|&b| b == 0xAB));
    assert_eq!(r.stats().unwrap().live_blocks, 1);

    let gone = r.reallocate(q2.as_ptr(), 0).unwrap();
    assert!(is_empty_sentinel(gone.as_ptr()));
    assert_eq!(r.stats().unwrap().live_blocks, 0);
}

#[test]
fn cleanup_then_allocate_fails_until_reinit() {
    let dir = ScratchDir::new();
    let path = dir.file("heap.bin");
    let mut r = Redirector::new();
    r.init(&StoreConfig::new(&path)).unwrap();
    let p = r.allocate(256).unwrap();
    let off = r.heap().unwrap().offset_of(p.as_ptr()).unwrap();
    r.heap_mut().unwrap().set_root(off).unwrap();

    assert!(r.cleanup());
    assert!(!r.is_active());
    assert_eq!(r.allocate(8), Err(HeapError::NotInitialized));
    r.free(p.as_ptr());

    let (_, fresh) = r.init(&StoreConfig::new(&path)).unwrap();
    assert!(!fresh);
    assert_eq!(r.heap().unwrap().root(), off);
    assert!(r.allocate(8).is_ok());
}

#[test]
fn exhausted_store_reports_failure_and_keeps_working() {
    let dir = ScratchDir::new();
    let mut r = Redirector::new();
    r.init(&StoreConfig::new(dir.file("heap.bin"))).unwrap();
    let err = r.allocate(64 * MIB as usize).unwrap_err();
    assert!(matches!(err, HeapError::AllocationFailed { .. }));
    assert!(r.allocate(1024).is_ok());
}

#[test]
fn bad_free_only_warns() {
    let dir = ScratchDir::new();
    let mut r = Redirector::new();
    r.init(&StoreConfig::new(dir.file("heap.bin"))).unwrap();
    let p = r.allocate(100).unwrap();
    r.free(p.as_ptr());
    r.free(p.as_ptr());
    let mut local = [0u8; 4];
    r.free(local.as_mut_ptr());
    assert_eq!(r.stats().unwrap().live_blocks, 0);
}

#[test]
fn undersized_file_fails_init_and_stays_inactive() {
    let dir = ScratchDir::new();
    let path = dir.sized_file("small.bin", 4 * MIB);
    let mut r = Redirector::new();
    assert!(matches!(
        r.init(&StoreConfig::new(&path)),
        Err(HeapError::Store(fmalloc_core::StoreError::FileTooSmall { .. }))
    ));
    assert!(!r.is_active());
    assert_eq!(r.allocate(1), Err(HeapError::NotInitialized));
}
