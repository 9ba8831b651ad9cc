//! fmalloc: heap allocation and vectors backed by memory-mapped files.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all fmalloc sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use fmalloc::prelude::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//!
//! // A file-backed heap: blocks live in the file and survive a reopen.
//! let mut heap = Heap::open(&StoreConfig::new(dir.path().join("heap.bin"))).unwrap();
//! let block = heap.allocate(120).unwrap();
//! let offset = heap.offset_of(block.as_ptr()).unwrap();
//! heap.bytes_mut(offset, 5).unwrap().copy_from_slice(b"hello");
//! heap.set_root(offset).unwrap();
//! heap.close();
//!
//! let heap = Heap::open(&StoreConfig::new(dir.path().join("heap.bin"))).unwrap();
//! assert_eq!(heap.bytes(heap.root(), 5).unwrap(), b"hello");
//!
//! // A whole file mapped as a vector.
//! let v = MappedVector::<f64>::create_or_open(dir.path().join("v.bin"), 4).unwrap();
//! v.write_region(0, &[1.0, 2.0, 3.0]);
//! assert_eq!(v.element_at(2), 3.0);
//! assert!(v.element_at(99).is_na());
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `fmalloc-core` | Element types, NA sentinels, errors, handles |
//! | [`store`] | `fmalloc-store` | Backing files, superblock, chunk bitmap |
//! | [`heap`] | `fmalloc-heap` | Relocatable heap and allocator redirection |
//! | [`vec`] | `fmalloc-vec` | Memory-mapped vectors |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Element types, missing-value sentinels, errors and handles
/// (`fmalloc-core`).
pub use fmalloc_core as types;

/// Backing store files and their on-disk layout (`fmalloc-store`).
///
/// Most users only need [`store::StoreConfig`].
pub use fmalloc_store as store;

/// The relocatable heap and the allocator redirector (`fmalloc-heap`).
///
/// [`heap::Heap`] for direct use from Rust, [`heap::Redirector`] for hosts
/// that route a process-wide allocator to one active store.
pub use fmalloc_heap as heap;

/// Memory-mapped vectors (`fmalloc-vec`).
pub use fmalloc_vec as vec;

/// Common imports for typical fmalloc usage.
///
/// ```rust
/// use fmalloc::prelude::*;
/// ```
pub mod prelude {
    pub use fmalloc_core::{
        Element, ElementType, HeapError, HeapHandle, Logical, StoreError, NA_INTEGER,
    };
    pub use fmalloc_heap::{Heap, HeapStats, Redirector};
    pub use fmalloc_store::StoreConfig;
    pub use fmalloc_vec::{AnyVector, MappedVector};
}
