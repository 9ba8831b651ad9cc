//! Relocatable file-backed heap and allocator redirection.
//!
//! [`Heap`] is a chunk and size-class allocator whose bookkeeping lives
//! entirely inside a backing store, as offsets from the mapping base.
//! [`Redirector`] holds the single active store and routes allocation
//! requests from host runtimes to it.
//!
//! ```text
//! host callback ──► Redirector ──(target)──► Heap ──► BackingStore (mmap)
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod heap;
pub mod redirect;
pub mod size_class;

pub use heap::{Heap, HeapStats, ALIGNMENT};
pub use redirect::{is_empty_sentinel, Redirector};
