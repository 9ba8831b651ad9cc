//! Mapped vectors round-trip through the file system and across threads.

use std::thread;

use fmalloc_core::{Element, Logical, StoreError};
use fmalloc_heap::Redirector;
use fmalloc_store::StoreConfig;
use fmalloc_test_utils::{int_ramp, real_ramp, ScratchDir};
use fmalloc_vec::{AnyVector, MappedVector};
use proptest::prelude::*;

#[test]
fn contents_survive_release_and_reopen() {
    let dir = ScratchDir::new();
    let path = dir.file("ints.bin");
    {
        let v = MappedVector::<i32>::create_or_open(&path, 100).unwrap();
        assert_eq!(v.write_region(0, &int_ramp(100)), 100);
    }
    let v = MappedVector::<i32>::create_or_open(&path, 100).unwrap();
    assert_eq!(v.to_vec(), int_ramp(100));
    assert!(v.element_at(100).is_na());
}

#[test]
fn guard_writes_reach_the_file() {
    let dir = ScratchDir::new();
    let path = dir.file("reals.bin");
    {
        let v = MappedVector::<f64>::create_or_open(&path, 8).unwrap();
        let mut guard = v.write();
        guard.copy_from_slice(&real_ramp(8));
    }
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 64);
    assert_eq!(f64::from_le_bytes(bytes[8..16].try_into().unwrap()), 0.5);
}

#[test]
fn growing_the_count_keeps_the_prefix() {
    let dir = ScratchDir::new();
    let path = dir.file("grow.bin");
    MappedVector::<Logical>::create_or_open(&path, 3)
        .unwrap()
        .write_region(0, &[Logical::TRUE, Logical::FALSE, Logical::NA]);
    let v = MappedVector::<Logical>::create_or_open(&path, 5).unwrap();
    assert_eq!(ScratchDir::file_len(&path), 20);
    assert_eq!(v.element_at(0).to_bool(), Some(true));
    assert_eq!(v.element_at(1).to_bool(), Some(false));
    assert!(v.element_at(2).is_na());
    assert_eq!(v.element_at(4).to_bool(), Some(false));
}

#[test]
fn reopening_a_mapped_file_never_shrinks_it() {
    let dir = ScratchDir::new();
    let path = dir.file("big.bin");
    let a = MappedVector::<f64>::create_or_open(&path, 1 << 20).unwrap();
    a.set(900_000, 2.5).unwrap();

    match MappedVector::<f64>::create_or_open(&path, 1) {
        Err(StoreError::StillMapped {
            mapped_len,
            requested,
            ..
        }) => {
            assert_eq!(mapped_len, 8 << 20);
            assert_eq!(requested, 8);
        }
        other => panic!("expected StillMapped, got {other:?}"),
    }
    assert_eq!(ScratchDir::file_len(&path), 8 << 20);
    assert_eq!(a.element_at(900_000), 2.5);

    // Same length: a second mapping of the same file, same bytes.
    let b = MappedVector::<f64>::create_or_open(&path, 1 << 20).unwrap();
    assert!(!b.same_mapping(&a));
    assert_eq!(b.element_at(900_000), 2.5);
    b.set(0, -1.0).unwrap();
    assert_eq!(a.element_at(0), -1.0);

    drop(a);
    drop(b);
    let small = MappedVector::<f64>::create_or_open(&path, 1).unwrap();
    assert_eq!(ScratchDir::file_len(&path), 8);
    assert_eq!(small.element_at(0), -1.0);
}

#[test]
fn active_store_file_is_not_resized_by_a_vector() {
    let dir = ScratchDir::new();
    let path = dir.file("store.bin");
    let mut heap = Redirector::new();
    heap.init(&StoreConfig::new(path.clone())).unwrap();
    let before = ScratchDir::file_len(&path);

    let err = MappedVector::<i32>::create_or_open(&path, 16).unwrap_err();
    assert!(matches!(err, StoreError::StillMapped { .. }), "{err}");
    assert!(AnyVector::create_or_open(&path, 3, fmalloc_core::ElementType::Double).is_err());
    assert_eq!(ScratchDir::file_len(&path), before);

    // The store is intact and still hands out its far chunks.
    let p = heap.allocate(4 << 20).unwrap();
    heap.free(p.as_ptr());
    assert!(heap.stats().is_ok());
    assert!(heap.cleanup());

    let v = MappedVector::<i32>::create_or_open(&path, 16).unwrap();
    assert_eq!(v.len(), 16);
}

#[test]
fn handles_are_shared_across_threads() {
    let dir = ScratchDir::new();
    let v = MappedVector::<i32>::create_or_open(dir.file("mt.bin"), 1024).unwrap();
    let workers: Vec<_> = (0..4)
        .map(|t| {
            let v = v.duplicate();
            thread::spawn(move || {
                for i in (t..1024).step_by(4) {
                    v.set(i, i as i32).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(v.ref_count(), 1);
    assert_eq!(v.to_vec(), int_ramp(1024));
}

#[test]
fn any_vector_release_unmaps_last() {
    let dir = ScratchDir::new();
    let a = AnyVector::create_or_open(dir.file("a.bin"), 4, fmalloc_core::ElementType::Integer)
        .unwrap();
    let b = a.duplicate();
    drop(a);
    b.as_integer().unwrap().set(3, 7).unwrap();
    assert_eq!(b.ref_count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn copy_region_matches_slice_semantics(
        len in 1usize..200,
        start in 0usize..250,
        count in 0usize..250,
        out_len in 0usize..250,
    ) {
        let dir = ScratchDir::new();
        let v = MappedVector::<i32>::create_or_open(dir.file("p.bin"), len).unwrap();
        v.write_region(0, &int_ramp(len));
        let mut out = vec![-1i32; out_len];
        let n = v.copy_region(start, count, &mut out);
        let expected = if start >= len { 0 } else { count.min(out_len).min(len - start) };
        prop_assert_eq!(n, expected);
        for (k, &x) in out[..n].iter().enumerate() {
            prop_assert_eq!(x, (start + k) as i32);
        }
        prop_assert!(out[n..].iter().all(|&x| x == -1));
    }
}
