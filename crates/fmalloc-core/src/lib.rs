//! Core types for the fmalloc workspace.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! error taxonomy shared by the store, heap and vector crates, the element
//! types that may live in mapped memory together with their missing-value
//! sentinels, and the heap handle identifier.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod element;
pub mod error;
pub mod id;

pub use element::{Element, ElementType, Logical, NA_INTEGER, NA_REAL_BITS};
pub use error::{HeapError, StoreError};
pub use id::HeapHandle;
