//! FmStatus -> Python exception mapping with recovery hints.

use pyo3::exceptions::{PyIndexError, PyMemoryError, PyRuntimeError, PyValueError};
use pyo3::{PyErr, PyResult};

/// Check an FFI status code. Returns `Ok(())` on success, raises a typed
/// Python exception with recovery hints on error.
pub(crate) fn check_status(code: i32) -> PyResult<()> {
    if code == 0 {
        return Ok(());
    }
    Err(status_error(code))
}

/// The Python exception for a non-zero FFI status code.
pub(crate) fn status_error(code: i32) -> PyErr {
    let (msg, hint) = error_detail(code);
    let full = format!("fmalloc error {code}: {msg}\n  Hint: {hint}");
    match code {
        // Caller-supplied arguments or files → ValueError
        -3 | -7 | -8 | -9 | -12 => PyValueError::new_err(full),

        // Store exhausted → MemoryError
        -6 => PyMemoryError::new_err(full),

        -10 => PyIndexError::new_err(full),

        _ => PyRuntimeError::new_err(full),
    }
}

/// Returns `(message, recovery_hint)` for each FFI status code.
fn error_detail(code: i32) -> (&'static str, &'static str) {
    match code {
        1 => (
            "store already initialized",
            "Only one store can be active per process. Call cleanup_fmalloc() \
             before initializing a different file.",
        ),
        -1 => (
            "invalid handle (already released?)",
            "The vector was closed or its store was cleaned up. If using a \
             context manager, access is only valid inside the `with` block.",
        ),
        -2 => (
            "I/O error on the backing file",
            "Check that the directory exists and is writable, and that the \
             file is not locked by another process.",
        ),
        -3 => (
            "existing file is too small to hold a store",
            "Stores need at least 16 MiB of header plus one 8 KiB chunk. \
             Point init_fmalloc() at a new path or delete the file.",
        ),
        -4 => (
            "the operating system refused to map the file",
            "Check the process address-space and mapped-file limits \
             (ulimit -v, vm.max_map_count).",
        ),
        -5 => (
            "no store is active",
            "Call init_fmalloc(path) before allocating vectors.",
        ),
        -6 => (
            "store is out of space",
            "Stores are pre-sized and never grow. Free unused vectors or \
             initialize a larger store with init_fmalloc(path, size_gib=...).",
        ),
        -7 => (
            "invalid argument",
            "A path is empty, a length is zero, or a dtype is not one of \
             'int', 'double', 'logical'.",
        ),
        -8 => (
            "size overflow",
            "length * element size does not fit the address space. Use a \
             smaller length.",
        ),
        -9 => (
            "corrupt store header",
            "The file carries the store magic but its header does not match \
             its size. It may have been truncated or written by another \
             version. Restore it from a backup or use a new path.",
        ),
        -10 => (
            "index out of bounds",
            "Indices run from 0 to len(vector) - 1.",
        ),
        -11 => (
            "pointer does not belong to the store",
            "The buffer was freed already or came from another allocator.",
        ),
        -12 => (
            "file is still mapped at a different length",
            "Another vector or the active store in this process maps the \
             same file. Close it first, or reopen with the same length.",
        ),
        -20 => (
            "internal lock poisoned",
            "An earlier call panicked while holding global state. Restart \
             the process.",
        ),
        -128 => (
            "panic inside the native library",
            "This is a bug in fmalloc. Please report it with the steps that \
             led to it.",
        ),
        _ => (
            "unknown fmalloc error",
            "An unrecognized error code was returned from the FFI layer. \
             This may indicate a version mismatch between the Python \
             bindings and the native library.",
        ),
    }
}
