//! Benchmark profiles for fmalloc.
//!
//! - [`bench_heap`]: a fresh store of a given size in a given directory
//! - [`mixed_sizes`]: deterministic request sizes spanning every size class
//!   and the large-block path

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use fmalloc_core::HeapError;
use fmalloc_heap::Heap;
use fmalloc_store::StoreConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Store size used by the heap benchmarks: 256 MiB.
pub const BENCH_STORE_SIZE: u64 = 256 * 1024 * 1024;

/// Open a fresh store named `heap.bin` inside `dir`.
pub fn bench_heap(dir: &Path, size: u64) -> Result<Heap, HeapError> {
    Heap::open(&StoreConfig::new(dir.join("heap.bin")).with_size(size))
}

/// `n` request sizes drawn from `seed`.
///
/// Nine in ten are small (1..=4080 bytes, every size class); the rest are
/// large (4 KiB..=256 KiB).
pub fn mixed_sizes(seed: u64, n: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            if rng.random_bool(0.9) {
                rng.random_range(1..=4080)
            } else {
                rng.random_range(4096..=256 * 1024)
            }
        })
        .collect()
}
