//! Memory-mapped vectors.
//!
//! A [`MappedVector`] exposes the bytes of a file as a typed vector without
//! copying: element reads and writes go straight to the shared mapping, so
//! the file is the vector. Handles are shared; the mapping is released when
//! the last handle drops. [`AnyVector`] erases the element type for hosts
//! that pick it at runtime.
//!
//! Out-of-range reads return the element type's NA sentinel instead of
//! failing, and region copies are clamped to the vector bounds.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod any;
mod raw;
pub mod vector;

pub use any::AnyVector;
pub use vector::MappedVector;
