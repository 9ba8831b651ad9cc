//! Lazy vector hooks: a handle-based C surface over [`AnyVector`].
//!
//! A host runtime opens a vector once, keeps the returned handle in its own
//! lazy-vector object, and answers length, element, region and data-pointer
//! queries through these functions. The mapping stays alive until the
//! handle is released.

use std::ffi::{c_char, c_void};
use std::ptr;
use std::sync::Mutex;

use fmalloc_core::{Element, Logical, NA_INTEGER};
use fmalloc_vec::{AnyVector, MappedVector};

use crate::handle::HandleTable;
use crate::heap::write_out;
use crate::path::path_arg;
use crate::status::FmStatus;

static VECTORS: Mutex<HandleTable<AnyVector>> = Mutex::new(HandleTable::new());

/// Clone the vector out of the table so the table lock is not held while
/// touching the mapping.
fn get_vector(handle: u64) -> Option<AnyVector> {
    VECTORS.lock().ok()?.get(handle).cloned()
}

fn to_usize(v: u64) -> Option<usize> {
    usize::try_from(v).ok()
}

/// Map `length` elements of type `elt_type` (see [`crate::FmElementType`])
/// from `path`, creating or resizing the file as needed, and write the new
/// handle to `out`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmalloc_vector_open(
    path: *const c_char,
    length: u64,
    elt_type: i32,
    out: *mut u64,
) -> i32 {
    ffi_guard!({
        if out.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        // SAFETY: path is null or a valid C string per caller contract.
        let path = match unsafe { path_arg(path) } {
            Ok(p) => p,
            Err(status) => return status as i32,
        };
        let Some(length) = to_usize(length) else {
            return FmStatus::Overflow as i32;
        };
        let vector = match AnyVector::create_or_open_tagged(&path, length, elt_type) {
            Ok(v) => v,
            Err(e) => return FmStatus::from(&e) as i32,
        };
        let handle = ffi_lock!(VECTORS).insert(vector);
        write_out(out, handle);
        FmStatus::Ok as i32
    })
}

/// Element count, or -1 for an invalid handle.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_length(handle: u64) -> i64 {
    ffi_guard_or!(-1, {
        get_vector(handle).map_or(-1, |v| v.len() as i64)
    })
}

/// Element type tag, or -1 for an invalid handle.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_elt_type(handle: u64) -> i32 {
    ffi_guard_or!(-1, {
        get_vector(handle).map_or(-1, |v| v.element_type() as i32)
    })
}

fn element<T: Element>(
    handle: u64,
    index: u64,
    pick: fn(&AnyVector) -> Option<&MappedVector<T>>,
) -> T {
    let Some(vector) = get_vector(handle) else {
        return T::NA;
    };
    match (pick(&vector), to_usize(index)) {
        (Some(v), Some(i)) => v.element_at(i),
        _ => T::NA,
    }
}

/// Integer element `index`. NA for an invalid handle, a non-integer vector,
/// or an out-of-range index.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_elt_int(handle: u64, index: u64) -> i32 {
    ffi_guard_or!(NA_INTEGER, {
        element(handle, index, AnyVector::as_integer)
    })
}

/// Double element `index`. NA for an invalid handle, a non-double vector,
/// or an out-of-range index.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_elt_real(handle: u64, index: u64) -> f64 {
    ffi_guard_or!(<f64 as Element>::NA, {
        element(handle, index, AnyVector::as_double)
    })
}

/// Logical element `index` as 0, 1 or NA.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_elt_logical(handle: u64, index: u64) -> i32 {
    ffi_guard_or!(NA_INTEGER, {
        element(handle, index, AnyVector::as_logical).0
    })
}

#[allow(unsafe_code)]
fn get_region<T: Element>(
    handle: u64,
    start: u64,
    count: u64,
    buf: *mut T,
    pick: fn(&AnyVector) -> Option<&MappedVector<T>>,
) -> i64 {
    if buf.is_null() {
        return FmStatus::InvalidArgument as i64;
    }
    let Some(vector) = get_vector(handle) else {
        return FmStatus::InvalidHandle as i64;
    };
    let Some(v) = pick(&vector) else {
        return FmStatus::InvalidArgument as i64;
    };
    let (Some(start), Some(count)) = (to_usize(start), to_usize(count)) else {
        return 0;
    };
    let count = count.min(v.len().saturating_sub(start));
    if count == 0 {
        return 0;
    }
    // SAFETY: the caller guarantees buf holds at least `count` elements;
    // count was only ever lowered above.
    let out = unsafe { std::slice::from_raw_parts_mut(buf, count) };
    v.copy_region(start, count, out) as i64
}

#[allow(unsafe_code)]
fn set_region<T: Element>(
    handle: u64,
    start: u64,
    buf: *const T,
    count: u64,
    pick: fn(&AnyVector) -> Option<&MappedVector<T>>,
) -> i64 {
    if buf.is_null() {
        return FmStatus::InvalidArgument as i64;
    }
    let Some(vector) = get_vector(handle) else {
        return FmStatus::InvalidHandle as i64;
    };
    let Some(v) = pick(&vector) else {
        return FmStatus::InvalidArgument as i64;
    };
    let (Some(start), Some(count)) = (to_usize(start), to_usize(count)) else {
        return 0;
    };
    let count = count.min(v.len().saturating_sub(start));
    if count == 0 {
        return 0;
    }
    // SAFETY: the caller guarantees buf holds at least `count` elements.
    let values = unsafe { std::slice::from_raw_parts(buf, count) };
    v.write_region(start, values) as i64
}

/// Copy up to `count` integers starting at `start` into `buf`. Returns the
/// number copied (clamped to the vector end) or a negative status.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_get_region_int(
    handle: u64,
    start: u64,
    count: u64,
    buf: *mut i32,
) -> i64 {
    ffi_guard_or!(FmStatus::Panicked as i64, {
        get_region(handle, start, count, buf, AnyVector::as_integer)
    })
}

/// Copy up to `count` doubles starting at `start` into `buf`. Returns the
/// number copied (clamped to the vector end) or a negative status.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_get_region_real(
    handle: u64,
    start: u64,
    count: u64,
    buf: *mut f64,
) -> i64 {
    ffi_guard_or!(FmStatus::Panicked as i64, {
        get_region(handle, start, count, buf, AnyVector::as_double)
    })
}

/// Copy up to `count` logicals starting at `start` into `buf`. Returns the
/// number copied (clamped to the vector end) or a negative status.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_get_region_logical(
    handle: u64,
    start: u64,
    count: u64,
    buf: *mut i32,
) -> i64 {
    ffi_guard_or!(FmStatus::Panicked as i64, {
        get_region(handle, start, count, buf.cast::<Logical>(), AnyVector::as_logical)
    })
}

/// Write `count` integers from `buf` starting at `start`. Returns the
/// number written (clamped to the vector end) or a negative status.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_set_region_int(
    handle: u64,
    start: u64,
    buf: *const i32,
    count: u64,
) -> i64 {
    ffi_guard_or!(FmStatus::Panicked as i64, {
        set_region(handle, start, buf, count, AnyVector::as_integer)
    })
}

/// Write `count` doubles from `buf` starting at `start`. Returns the
/// number written (clamped to the vector end) or a negative status.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_set_region_real(
    handle: u64,
    start: u64,
    buf: *const f64,
    count: u64,
) -> i64 {
    ffi_guard_or!(FmStatus::Panicked as i64, {
        set_region(handle, start, buf, count, AnyVector::as_double)
    })
}

/// Write `count` logicals from `buf` starting at `start`. Returns the
/// number written (clamped to the vector end) or a negative status.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_set_region_logical(
    handle: u64,
    start: u64,
    buf: *const i32,
    count: u64,
) -> i64 {
    ffi_guard_or!(FmStatus::Panicked as i64, {
        set_region(handle, start, buf.cast::<Logical>(), count, AnyVector::as_logical)
    })
}

/// Raw pointer to the first element, or null for an invalid handle.
///
/// Valid until the handle is released. Reads and writes through it bypass
/// the vector's lock.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_dataptr(handle: u64) -> *mut c_void {
    ffi_guard_or!(ptr::null_mut(), {
        get_vector(handle).map_or(ptr::null_mut(), |v| v.as_mut_ptr().cast::<c_void>())
    })
}

/// Duplicate a vector. Mapped vectors are never copied: the same handle
/// is written to `out`.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_duplicate(handle: u64, out: *mut u64) -> i32 {
    ffi_guard!({
        if out.is_null() {
            return FmStatus::InvalidArgument as i32;
        }
        if !ffi_lock!(VECTORS).contains(handle) {
            return FmStatus::InvalidHandle as i32;
        }
        write_out(out, handle);
        FmStatus::Ok as i32
    })
}

/// Release a vector handle. The mapping is unmapped once no other clone
/// of it is alive.
#[allow(unsafe_code)]
#[no_mangle]
pub extern "C" fn fmalloc_vector_release(handle: u64) -> i32 {
    ffi_guard!({
        let removed = ffi_lock!(VECTORS).remove(handle);
        match removed {
            Some(v) => {
                tracing::debug!(handle, path = %v.path().display(), "vector released");
                FmStatus::Ok as i32
            }
            None => FmStatus::InvalidHandle as i32,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    use fmalloc_core::{ElementType, NA_REAL_BITS};
    use fmalloc_test_utils::ScratchDir;

    fn open(path: &std::path::Path, len: u64, ty: ElementType) -> u64 {
        let c = CString::new(path.to_str().unwrap()).unwrap();
        let mut h = 0;
        assert_eq!(fmalloc_vector_open(c.as_ptr(), len, ty as i32, &mut h), 0);
        h
    }

    #[test]
    fn int_vector_roundtrip_through_hooks() {
        let dir = ScratchDir::new();
        let h = open(&dir.file("v.bin"), 10, ElementType::Integer);
        assert_eq!(fmalloc_vector_length(h), 10);
        assert_eq!(fmalloc_vector_elt_type(h), 0);

        let src: Vec<i32> = (1..=10).collect();
        assert_eq!(fmalloc_vector_set_region_int(h, 0, src.as_ptr(), 10), 10);
        assert_eq!(fmalloc_vector_elt_int(h, 4), 5);
        assert_eq!(fmalloc_vector_elt_int(h, 10), NA_INTEGER);

        let mut buf = [0i32; 8];
        assert_eq!(fmalloc_vector_get_region_int(h, 6, 8, buf.as_mut_ptr()), 4);
        assert_eq!(&buf[..4], &[7, 8, 9, 10]);
        assert_eq!(fmalloc_vector_get_region_int(h, 50, 8, buf.as_mut_ptr()), 0);

        assert_eq!(fmalloc_vector_release(h), 0);
        assert_eq!(fmalloc_vector_length(h), -1);
        assert_eq!(fmalloc_vector_release(h), FmStatus::InvalidHandle as i32);
    }

    #[test]
    fn type_mismatch_reads_na() {
        let dir = ScratchDir::new();
        let h = open(&dir.file("d.bin"), 4, ElementType::Double);
        assert_eq!(fmalloc_vector_elt_int(h, 0), NA_INTEGER);
        assert_eq!(fmalloc_vector_elt_real(h, 0), 0.0);
        assert_eq!(fmalloc_vector_elt_real(h, 4).to_bits(), NA_REAL_BITS);
        let mut buf = [0i32; 4];
        assert_eq!(
            fmalloc_vector_get_region_int(h, 0, 4, buf.as_mut_ptr()),
            FmStatus::InvalidArgument as i64
        );
        fmalloc_vector_release(h);
    }

    #[test]
    fn logical_hooks_use_integer_layout() {
        let dir = ScratchDir::new();
        let h = open(&dir.file("l.bin"), 3, ElementType::Logical);
        let src = [1, 0, NA_INTEGER];
        assert_eq!(fmalloc_vector_set_region_logical(h, 0, src.as_ptr(), 3), 3);
        assert_eq!(fmalloc_vector_elt_logical(h, 0), 1);
        assert_eq!(fmalloc_vector_elt_logical(h, 2), NA_INTEGER);
        let mut out = [7i32; 3];
        assert_eq!(fmalloc_vector_get_region_logical(h, 0, 3, out.as_mut_ptr()), 3);
        assert_eq!(out, src);
        fmalloc_vector_release(h);
    }

    #[test]
    #[allow(unsafe_code)]
    fn dataptr_and_duplicate_share_the_mapping() {
        let dir = ScratchDir::new();
        let h = open(&dir.file("p.bin"), 4, ElementType::Integer);
        let p = fmalloc_vector_dataptr(h).cast::<i32>();
        assert!(!p.is_null());
        // SAFETY: p points at 4 mapped i32 elements while h is live.
        unsafe { p.add(2).write(99) };
        let mut dup = 0;
        assert_eq!(fmalloc_vector_duplicate(h, &mut dup), 0);
        assert_eq!(dup, h);
        assert_eq!(fmalloc_vector_elt_int(dup, 2), 99);
        fmalloc_vector_release(h);
        assert!(fmalloc_vector_dataptr(h).is_null());
    }

    #[test]
    fn open_rejects_bad_arguments() {
        let dir = ScratchDir::new();
        let c = CString::new(dir.file("x.bin").to_str().unwrap()).unwrap();
        let mut h = 0;
        assert_eq!(
            fmalloc_vector_open(c.as_ptr(), 0, 0, &mut h),
            FmStatus::InvalidArgument as i32
        );
        assert_eq!(
            fmalloc_vector_open(c.as_ptr(), 4, 9, &mut h),
            FmStatus::InvalidArgument as i32
        );
        assert_eq!(
            fmalloc_vector_open(ptr::null(), 4, 0, &mut h),
            FmStatus::InvalidArgument as i32
        );
        assert_eq!(
            fmalloc_vector_open(c.as_ptr(), 4, 0, ptr::null_mut()),
            FmStatus::InvalidArgument as i32
        );
    }

    #[test]
    fn reopen_sees_persisted_values() {
        let dir = ScratchDir::new();
        let path = dir.file("keep.bin");
        let h = open(&path, 5, ElementType::Double);
        let src = [0.5, 1.5, 2.5, 3.5, 4.5];
        fmalloc_vector_set_region_real(h, 0, src.as_ptr(), 5);
        fmalloc_vector_release(h);

        let h = open(&path, 5, ElementType::Double);
        assert_eq!(fmalloc_vector_elt_real(h, 3), 3.5);
        fmalloc_vector_release(h);
    }

    #[test]
    fn reopen_at_new_length_while_mapped_is_refused() {
        let dir = ScratchDir::new();
        let path = dir.file("pinned.bin");
        let h = open(&path, 1 << 20, ElementType::Double);
        let src = [7.25];
        fmalloc_vector_set_region_real(h, 900_000, src.as_ptr(), 1);

        let c = CString::new(path.to_str().unwrap()).unwrap();
        let mut other = 0;
        assert_eq!(
            fmalloc_vector_open(c.as_ptr(), 1, ElementType::Double as i32, &mut other),
            FmStatus::StillMapped as i32
        );
        assert_eq!(fmalloc_vector_length(h), 1 << 20);
        assert_eq!(fmalloc_vector_elt_real(h, 900_000), 7.25);

        fmalloc_vector_release(h);
        let small = open(&path, 1, ElementType::Double);
        assert_eq!(fmalloc_vector_length(small), 1);
        fmalloc_vector_release(small);
    }
}
