//! Error types for fmalloc.
//!
//! Organized by subsystem: [`StoreError`] covers everything that touches a
//! file or its mapping (backing stores and mapped vectors), [`HeapError`]
//! covers the allocator redirection layer.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from opening, creating, sizing or mapping a file.
///
/// Shared by the backing store and the mapped vector facade, since both
/// go through the same mapped-region capability.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Stat, open, create or truncate failed.
    #[error("I/O error on {}: {cause} (os error code {})", path.display(), fmt_code(*code))]
    Io {
        /// The file the operation was applied to.
        path: PathBuf,
        /// Raw OS error code, when the platform reported one.
        code: Option<i32>,
        /// Human-readable description of the failure.
        cause: String,
    },
    /// An existing file is smaller than the minimum viable store size.
    #[error(
        "{} is too small to hold a store: {size} bytes, need at least {minimum}",
        path.display()
    )]
    FileTooSmall {
        /// The undersized file.
        path: PathBuf,
        /// Its current size in bytes.
        size: u64,
        /// The minimum viable size in bytes.
        minimum: u64,
    },
    /// The operating system refused to map the file.
    #[error("failed to map {}: {cause}", path.display())]
    MappingFailed {
        /// The file that could not be mapped.
        path: PathBuf,
        /// Reason reported by the mapping call.
        cause: String,
    },
    /// The file carries the store magic but its header disagrees with the
    /// mapping (wrong version, chunk size or recorded length).
    #[error("corrupt store header in {}: {reason}", path.display())]
    CorruptHeader {
        /// The file with the inconsistent header.
        path: PathBuf,
        /// Which check failed.
        reason: String,
    },
    /// An argument is empty, zero, out of range, or otherwise unusable.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },
    /// A byte-length computation does not fit the addressable range.
    #[error("{count} elements of {element_size} bytes exceed the addressable range")]
    Overflow {
        /// Requested element count.
        count: u64,
        /// Size of one element in bytes.
        element_size: usize,
    },
    /// A file this process still has mapped was asked for a different
    /// length. Resizing it would invalidate the live mapping.
    #[error(
        "{} is still mapped at {mapped_len} bytes; cannot resize it to {requested}",
        path.display()
    )]
    StillMapped {
        /// The mapped file.
        path: PathBuf,
        /// Length of the live mapping in bytes.
        mapped_len: u64,
        /// Length that was asked for.
        requested: u64,
    },
    /// A write addressed an element past the end of a vector.
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds {
        /// The offending index.
        index: usize,
        /// The vector length.
        len: usize,
    },
}

fn fmt_code(code: Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "n/a".to_string(),
    }
}

impl StoreError {
    /// Wrap an [`io::Error`] with the path it was raised for.
    pub fn io(path: &Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            code: err.raw_os_error(),
            cause: err.to_string(),
        }
    }

    /// Wrap a mapping failure with the path it was raised for.
    pub fn mapping(path: &Path, err: &io::Error) -> Self {
        Self::MappingFailed {
            path: path.to_path_buf(),
            cause: err.to_string(),
        }
    }

    /// Shorthand for [`StoreError::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Errors from the allocator redirection layer and the relocatable heap.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The backing store could not be opened or attached.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An allocation was attempted with no active store, or with a target
    /// handle that does not name the active store.
    #[error("no store is active; call init first")]
    NotInitialized,
    /// The store has no contiguous space left for the request. Stores are
    /// pre-sized and never grow.
    #[error("allocation of {requested} bytes failed: {free_chunks} chunks free")]
    AllocationFailed {
        /// Requested size in bytes.
        requested: usize,
        /// Free chunks remaining in the store at the time of the request.
        free_chunks: u64,
    },
    /// A pointer handed back to the heap does not point into its data region.
    #[error("pointer {addr:#x} does not belong to this heap")]
    ForeignPointer {
        /// The rejected address.
        addr: usize,
    },
    /// The block header in front of a pointer is not a live block. Raised
    /// for double frees and for pointers into the middle of a block.
    #[error("no live block at offset {offset:#x}")]
    CorruptBlock {
        /// Offset of the block header that failed validation.
        offset: u64,
    },
    /// An argument is out of range.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_keeps_path_and_code() {
        let err = io::Error::from_raw_os_error(13);
        let e = StoreError::io(Path::new("/nope/store.bin"), &err);
        match &e {
            StoreError::Io { path, code, .. } => {
                assert_eq!(path, Path::new("/nope/store.bin"));
                assert_eq!(*code, Some(13));
            }
            other => panic!("expected Io, got {other:?}"),
        }
        let msg = e.to_string();
        assert!(msg.contains("/nope/store.bin"));
        assert!(msg.contains("13"));
    }

    #[test]
    fn io_error_without_code_says_so() {
        let err = io::Error::other("synthetic");
        let msg = StoreError::io(Path::new("x.bin"), &err).to_string();
        assert!(msg.contains("n/a"), "{msg}");
    }

    #[test]
    fn file_too_small_mentions_sizes() {
        let e = StoreError::FileTooSmall {
            path: PathBuf::from("small.bin"),
            size: 1024,
            minimum: 4096,
        };
        let msg = e.to_string();
        assert!(msg.contains("small.bin"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn still_mapped_names_both_lengths() {
        let e = StoreError::StillMapped {
            path: PathBuf::from("v.bin"),
            mapped_len: 8_388_608,
            requested: 8,
        };
        let msg = e.to_string();
        assert!(msg.contains("v.bin"));
        assert!(msg.contains("8388608"));
        assert!(msg.ends_with("resize it to 8"), "{msg}");
    }

    #[test]
    fn store_error_converts_into_heap_error() {
        let e: HeapError = StoreError::invalid("empty path").into();
        assert_eq!(
            e,
            HeapError::Store(StoreError::InvalidArgument {
                reason: "empty path".into()
            })
        );
        // Transparent: the heap error reads like the store error.
        assert_eq!(e.to_string(), "invalid argument: empty path");
    }

    #[test]
    fn allocation_failed_display() {
        let e = HeapError::AllocationFailed {
            requested: 120,
            free_chunks: 0,
        };
        assert_eq!(e.to_string(), "allocation of 120 bytes failed: 0 chunks free");
    }
}
