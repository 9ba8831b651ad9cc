//! Randomized allocate/free/reallocate churn against a ledger of live
//! blocks.

use fmalloc_heap::{Heap, ALIGNMENT};
use fmalloc_store::StoreConfig;
use fmalloc_test_utils::ScratchDir;
use indexmap::IndexMap;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Offset -> (size, fill byte).
type Ledger = IndexMap<u64, (usize, u8)>;

fn check(heap: &Heap, ledger: &Ledger) {
    for (&off, &(size, fill)) in ledger {
        let bytes = heap.bytes(off, size).unwrap();
        assert!(bytes.iter().all(|&b| b == fill), "block at {off:#x} clobbered");
    }
    assert_eq!(heap.stats().live_blocks, ledger.len() as u64);
    let total: usize = ledger.values().map(|&(s, _)| s).sum();
    assert_eq!(heap.stats().allocated_bytes, total as u64);
}

fn churn(seed: u64, steps: usize) {
    let dir = ScratchDir::new();
    let mut heap = Heap::open(&StoreConfig::new(dir.file("churn.bin"))).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ledger = Ledger::new();

    for step in 0..steps {
        let roll = rng.random_range(0..10);
        if roll < 5 || ledger.is_empty() {
            let size = if rng.random_bool(0.9) {
                rng.random_range(1..=4080)
            } else {
                rng.random_range(4081..=200_000)
            };
            let Ok(p) = heap.allocate(size) else {
                continue;
            };
            assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
            let off = heap.offset_of(p.as_ptr()).unwrap();
            let fill = (step % 251) as u8;
            heap.bytes_mut(off, size).unwrap().fill(fill);
            assert!(ledger.insert(off, (size, fill)).is_none(), "offset reused while live");
        } else if roll < 8 {
            let idx = rng.random_range(0..ledger.len());
            let (off, _) = ledger.swap_remove_index(idx).unwrap();
            let p = heap.ptr_at(off).unwrap();
            heap.deallocate(p).unwrap();
        } else {
            let idx = rng.random_range(0..ledger.len());
            let (off, (size, fill)) = ledger.swap_remove_index(idx).unwrap();
            let new_size = rng.random_range(1..=3 * size.max(16));
            let p = heap.ptr_at(off).unwrap();
            match heap.reallocate(p, new_size) {
                Ok(q) => {
                    let qoff = heap.offset_of(q.as_ptr()).unwrap();
                    let kept = size.min(new_size);
                    assert!(heap.bytes(qoff, kept).unwrap().iter().all(|&b| b == fill));
                    heap.bytes_mut(qoff, new_size).unwrap().fill(fill);
                    ledger.insert(qoff, (new_size, fill));
                }
                Err(_) => {
                    ledger.insert(off, (size, fill));
                }
            }
        }
        if step % 64 == 0 {
            check(&heap, &ledger);
        }
    }
    check(&heap, &ledger);
}

#[test]
fn seeded_churn() {
    for seed in [1, 7, 42] {
        churn(seed, 2_000);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn allocations_never_overlap(sizes in proptest::collection::vec(1usize..20_000, 1..60)) {
        let dir = ScratchDir::new();
        let mut heap = Heap::open(&StoreConfig::new(dir.file("p.bin"))).unwrap();
        let mut ranges = Vec::new();
        for size in sizes {
            let p = heap.allocate(size).unwrap();
            let off = heap.offset_of(p.as_ptr()).unwrap();
            ranges.push((off, off + size as u64));
        }
        ranges.sort_unstable();
        for w in ranges.windows(2) {
            prop_assert!(w[0].1 <= w[1].0, "{:?} overlaps {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn free_all_restores_chunk_usage_for_large_blocks(
        sizes in proptest::collection::vec(4081usize..100_000, 1..20),
    ) {
        let dir = ScratchDir::new();
        let mut heap = Heap::open(&StoreConfig::new(dir.file("p.bin"))).unwrap();
        let before = heap.stats().used_chunks;
        let ptrs: Vec<_> = sizes.iter().map(|&s| heap.allocate(s).unwrap()).collect();
        for p in ptrs {
            heap.deallocate(p).unwrap();
        }
        prop_assert_eq!(heap.stats().used_chunks, before);
    }
}
