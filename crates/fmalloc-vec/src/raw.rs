//! Byte-to-element reinterpretation for mapped memory.
//!
//! The two functions here are the only `unsafe` in this crate. They rely on
//! [`Element`] being sealed over plain-old-data types (`i32`, `f64` and the
//! `i32`-backed `Logical`), for which every bit pattern is a valid value.

#![allow(unsafe_code)]

use std::mem::{align_of, size_of};

use fmalloc_core::Element;

fn check<T: Element>(ptr: *const u8, len: usize) -> usize {
    assert_eq!(
        ptr as usize % align_of::<T>(),
        0,
        "mapping is not aligned for {}",
        T::TYPE
    );
    assert_eq!(len % size_of::<T>(), 0, "byte length is not a whole number of elements");
    len / size_of::<T>()
}

/// View mapped bytes as elements.
pub(crate) fn as_elements<T: Element>(bytes: &[u8]) -> &[T] {
    let n = check::<T>(bytes.as_ptr(), bytes.len());
    // SAFETY: alignment and length are checked above; T is plain old data
    // (sealed trait), so any initialized bytes form valid values; the
    // returned slice borrows `bytes` and cannot outlive it.
    unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<T>(), n) }
}

/// View mapped bytes as mutable elements.
pub(crate) fn as_elements_mut<T: Element>(bytes: &mut [u8]) -> &mut [T] {
    let n = check::<T>(bytes.as_ptr(), bytes.len());
    // SAFETY: as for `as_elements`; the exclusive borrow of `bytes` is
    // carried over to the returned slice.
    unsafe { std::slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<T>(), n) }
}
