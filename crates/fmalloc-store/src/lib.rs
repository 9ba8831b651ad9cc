//! File-backed, memory-mapped backing stores.
//!
//! A backing store is a file mapped read/write and shared, optionally
//! carrying a heap header (the superblock) at offset 0. The superblock
//! records the store geometry and the heap's persistent bookkeeping; the
//! chunk occupancy bitmap follows it at a fixed offset.
//!
//! # File layout
//!
//! ```text
//! 0            superblock (magic "FMALLOC1", geometry, counters, class heads)
//! 4096         chunk occupancy bitmap, one bit per 8 KiB chunk
//! 16 MiB       data chunks
//! ```
//!
//! All integers are little-endian. Offsets stored in the file are relative
//! to the start of the mapping, so a store can be re-attached at any
//! address.
//!
//! This crate and `fmalloc-vec` are the only places the mapping itself is
//! created; [`MappedRegion`] is that shared capability.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod bitmap;
pub mod config;
pub mod region;
pub mod store;
pub mod superblock;

pub use bitmap::ChunkBitmap;
pub use config::StoreConfig;
pub use region::MappedRegion;
pub use store::BackingStore;
pub use superblock::{SuperField, Superblock};
