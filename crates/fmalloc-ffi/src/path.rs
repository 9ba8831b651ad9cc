//! C string arguments.

#![allow(unsafe_code)]

use std::ffi::{c_char, CStr};
use std::path::PathBuf;

use crate::status::FmStatus;

/// Read a NUL-terminated UTF-8 path argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
pub(crate) unsafe fn path_arg(ptr: *const c_char) -> Result<PathBuf, FmStatus> {
    if ptr.is_null() {
        return Err(FmStatus::InvalidArgument);
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let s = unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FmStatus::InvalidArgument)?;
    if s.is_empty() {
        return Err(FmStatus::InvalidArgument);
    }
    Ok(PathBuf::from(s))
}
