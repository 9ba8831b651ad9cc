//! Python bindings for fmalloc.
//!
//! This crate provides PyO3 bindings wrapping the C FFI layer
//! (`fmalloc-ffi`). The native extension is named `_fmalloc`.
//!
//! Two kinds of vector are exposed: `HeapBuffer`, a block carved from the
//! active store by the redirected allocator, and `MmapVector`, a whole file
//! mapped as one vector through the lazy vector hooks.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(unsafe_code)]

use pyo3::prelude::*;

mod dtype;
mod error;
mod heap;
mod vector;

/// The native `_fmalloc` extension module.
#[pymodule]
fn _fmalloc(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<heap::HeapBuffer>()?;
    m.add_class::<heap::HeapStats>()?;
    m.add_class::<vector::MmapVector>()?;

    m.add_function(wrap_pyfunction!(heap::init_fmalloc, m)?)?;
    m.add_function(wrap_pyfunction!(heap::cleanup_fmalloc, m)?)?;
    m.add_function(wrap_pyfunction!(heap::heap_stats, m)?)?;
    m.add_function(wrap_pyfunction!(heap::create_fmalloc_vector, m)?)?;
    m.add_function(wrap_pyfunction!(vector::create_mmap_vector, m)?)?;

    Ok(())
}
