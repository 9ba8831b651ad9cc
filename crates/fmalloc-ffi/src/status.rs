//! C-compatible status codes.
//!
//! [`FmStatus`] is a `repr(i32)` enum covering every outcome reported across
//! the C boundary. Conversions from [`StoreError`] and [`HeapError`] are
//! provided.

use fmalloc_core::{ElementType, HeapError, StoreError};

/// Status code returned by fallible FFI functions.
///
/// `Ok` = 0, the soft `AlreadyInitialized` = 1, errors are negative.
/// Values are ABI-stable.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FmStatus {
    /// Success.
    Ok = 0,
    /// `fmalloc_init` found a store already active and left it in place.
    AlreadyInitialized = 1,
    /// Handle is invalid, stale, or was already released.
    InvalidHandle = -1,
    /// Stat, open, create or truncate failed.
    IoError = -2,
    /// Existing file is smaller than the minimum store size.
    FileTooSmall = -3,
    /// The file could not be mapped.
    MappingFailed = -4,
    /// No store is active, or the handle does not name it.
    NotInitialized = -5,
    /// The store has no space left for the request.
    AllocationFailed = -6,
    /// An argument is null, empty, out of range, or otherwise invalid.
    InvalidArgument = -7,
    /// A byte length does not fit the address space.
    Overflow = -8,
    /// The store header is inconsistent with the file.
    CorruptHeader = -9,
    /// An element index is past the end of the vector.
    OutOfBounds = -10,
    /// A pointer does not name a live block of the store.
    BadPointer = -11,
    /// The file is mapped elsewhere in this process at a different length.
    StillMapped = -12,
    /// Internal error (e.g. poisoned mutex after a prior panic).
    InternalError = -20,
    /// A Rust panic was caught at the FFI boundary.
    Panicked = -128,
}

impl From<&StoreError> for FmStatus {
    fn from(e: &StoreError) -> Self {
        match e {
            StoreError::Io { .. } => FmStatus::IoError,
            StoreError::FileTooSmall { .. } => FmStatus::FileTooSmall,
            StoreError::MappingFailed { .. } => FmStatus::MappingFailed,
            StoreError::CorruptHeader { .. } => FmStatus::CorruptHeader,
            StoreError::InvalidArgument { .. } => FmStatus::InvalidArgument,
            StoreError::Overflow { .. } => FmStatus::Overflow,
            StoreError::OutOfBounds { .. } => FmStatus::OutOfBounds,
            StoreError::StillMapped { .. } => FmStatus::StillMapped,
        }
    }
}

impl From<&HeapError> for FmStatus {
    fn from(e: &HeapError) -> Self {
        match e {
            HeapError::Store(inner) => FmStatus::from(inner),
            HeapError::NotInitialized => FmStatus::NotInitialized,
            HeapError::AllocationFailed { .. } => FmStatus::AllocationFailed,
            HeapError::ForeignPointer { .. } | HeapError::CorruptBlock { .. } => {
                FmStatus::BadPointer
            }
            HeapError::InvalidArgument { .. } => FmStatus::InvalidArgument,
        }
    }
}

/// Element type tag as seen from C. Mirrors [`ElementType`].
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FmElementType {
    /// 32-bit signed integer.
    Integer = 0,
    /// 64-bit float.
    Double = 1,
    /// Three-valued logical stored as a 32-bit integer.
    Logical = 2,
}

impl From<ElementType> for FmElementType {
    fn from(ty: ElementType) -> Self {
        match ty {
            ElementType::Integer => FmElementType::Integer,
            ElementType::Double => FmElementType::Double,
            ElementType::Logical => FmElementType::Logical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn status_code_values_are_stable() {
        assert_eq!(FmStatus::Ok as i32, 0);
        assert_eq!(FmStatus::AlreadyInitialized as i32, 1);
        assert_eq!(FmStatus::InvalidHandle as i32, -1);
        assert_eq!(FmStatus::IoError as i32, -2);
        assert_eq!(FmStatus::FileTooSmall as i32, -3);
        assert_eq!(FmStatus::MappingFailed as i32, -4);
        assert_eq!(FmStatus::NotInitialized as i32, -5);
        assert_eq!(FmStatus::AllocationFailed as i32, -6);
        assert_eq!(FmStatus::InvalidArgument as i32, -7);
        assert_eq!(FmStatus::Overflow as i32, -8);
        assert_eq!(FmStatus::CorruptHeader as i32, -9);
        assert_eq!(FmStatus::OutOfBounds as i32, -10);
        assert_eq!(FmStatus::BadPointer as i32, -11);
        assert_eq!(FmStatus::StillMapped as i32, -12);
        assert_eq!(FmStatus::InternalError as i32, -20);
        assert_eq!(FmStatus::Panicked as i32, -128);
    }

    #[test]
    fn element_tags_match_core() {
        for ty in [ElementType::Integer, ElementType::Double, ElementType::Logical] {
            assert_eq!(FmElementType::from(ty) as i32, ty as i32);
        }
    }

    #[test]
    fn store_errors_map() {
        let too_small = StoreError::FileTooSmall {
            path: PathBuf::from("x"),
            size: 1,
            minimum: 2,
        };
        assert_eq!(FmStatus::from(&too_small), FmStatus::FileTooSmall);
        let overflow = StoreError::Overflow {
            count: 1,
            element_size: 8,
        };
        assert_eq!(FmStatus::from(&overflow), FmStatus::Overflow);
        let busy = StoreError::StillMapped {
            path: PathBuf::from("x"),
            mapped_len: 16,
            requested: 8,
        };
        assert_eq!(FmStatus::from(&busy), FmStatus::StillMapped);
    }

    #[test]
    fn heap_errors_map_through_store() {
        let e = HeapError::Store(StoreError::invalid("x"));
        assert_eq!(FmStatus::from(&e), FmStatus::InvalidArgument);
        assert_eq!(
            FmStatus::from(&HeapError::NotInitialized),
            FmStatus::NotInitialized
        );
        assert_eq!(
            FmStatus::from(&HeapError::CorruptBlock { offset: 0 }),
            FmStatus::BadPointer
        );
    }
}
