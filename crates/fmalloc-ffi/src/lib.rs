//! C ABI for fmalloc.
//!
//! Exposes the allocator redirection layer and the memory-mapped vector
//! facade to host runtimes through `extern "C"` functions. The header
//! `include/fmalloc.h` is generated at build time.
//!
//! # Conventions
//!
//! - Functions that can fail return an `i32` [`FmStatus`] code: `0` on
//!   success, `1` for the soft "already initialized" outcome, negative on
//!   error. Value-returning accessors document their sentinel instead.
//! - Every entry point catches panics ([`FmStatus::Panicked`]) and maps a
//!   poisoned lock to [`FmStatus::InternalError`].
//! - Process-global state (the redirector and the vector table) lives
//!   behind `std::sync::Mutex`. No lock is held across a host callback.
//!
//! Outside the Python bindings, this crate, the `region` module of
//! `fmalloc-store` and the `raw` module of `fmalloc-vec` are the only
//! places with `unsafe` code.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

/// Run `$body` returning an `i32` status, converting a panic into
/// [`FmStatus::Panicked`].
macro_rules! ffi_guard {
    ($body:block) => {
        ffi_guard_or!($crate::status::FmStatus::Panicked as i32, $body)
    };
}

/// Run `$body`, returning `$fallback` if it panics.
macro_rules! ffi_guard_or {
    ($fallback:expr, $body:block) => {
        match ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $body)) {
            Ok(v) => v,
            Err(_) => $fallback,
        }
    };
}

/// Lock a mutex, returning [`FmStatus::InternalError`] from the enclosing
/// closure if it is poisoned. Use [`ffi_lock_or!`] where the function does
/// not return a status.
macro_rules! ffi_lock {
    ($mutex:expr) => {
        ffi_lock_or!($mutex, $crate::status::FmStatus::InternalError as i32)
    };
}

/// Lock a mutex, returning `$fallback` from the enclosing closure if it is
/// poisoned.
macro_rules! ffi_lock_or {
    ($mutex:expr, $fallback:expr) => {
        match $mutex.lock() {
            Ok(guard) => guard,
            Err(_) => return $fallback,
        }
    };
}

mod handle;
pub mod heap;
mod path;
pub mod status;
pub mod vector;

pub use heap::{
    fmalloc_active_handle, fmalloc_alloc, fmalloc_alloc_zeroed, fmalloc_allocator,
    fmalloc_block_read, fmalloc_block_write, fmalloc_cleanup, fmalloc_free, fmalloc_host_alloc,
    fmalloc_host_free, fmalloc_init, fmalloc_offset_of, fmalloc_ptr_at, fmalloc_realloc,
    fmalloc_root_get, fmalloc_root_set, fmalloc_set_target, fmalloc_stats, FmAllocFn,
    FmAllocator, FmFreeFn, FmHeapStats,
};
pub use status::{FmElementType, FmStatus};
pub use vector::{
    fmalloc_vector_dataptr, fmalloc_vector_duplicate, fmalloc_vector_elt_int,
    fmalloc_vector_elt_logical, fmalloc_vector_elt_real, fmalloc_vector_elt_type,
    fmalloc_vector_get_region_int, fmalloc_vector_get_region_logical,
    fmalloc_vector_get_region_real, fmalloc_vector_length, fmalloc_vector_open,
    fmalloc_vector_release, fmalloc_vector_set_region_int, fmalloc_vector_set_region_logical,
    fmalloc_vector_set_region_real,
};
