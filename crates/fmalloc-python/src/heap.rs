//! Store lifecycle and heap-backed buffers.
//!
//! All FFI calls release the GIL via `py.detach()` so other Python threads
//! can run while the store is opened or searched. This prevents
//! lock-ordering deadlocks between the GIL and the FFI redirector mutex.
//!
//! Buffer contents are never touched through the raw block address here:
//! every element access is a locked copy in the FFI layer, so a
//! `cleanup_fmalloc` from another thread turns into an error instead of a
//! read from an unmapped page.

use std::ffi::{c_char, c_void, CString};
use std::mem::size_of;
use std::ptr;

use numpy::PyArray1;
use pyo3::exceptions::{PyOverflowError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use fmalloc_core::ElementType;
use fmalloc_ffi::{
    fmalloc_active_handle, fmalloc_alloc_zeroed, fmalloc_block_read, fmalloc_block_write,
    fmalloc_cleanup, fmalloc_free, fmalloc_init, fmalloc_offset_of, fmalloc_stats, FmHeapStats,
    FmStatus,
};
use fmalloc_store::StoreConfig;

use crate::dtype::{
    int_from_py, int_to_py, logical_from_py, logical_to_py, normalize_index, parse_dtype,
    real_from_py, real_to_py,
};
use crate::error::{check_status, status_error};

fn active_handle(py: Python<'_>) -> Option<u64> {
    py.detach(|| {
        let mut h = 0u64;
        (fmalloc_active_handle(&mut h) == FmStatus::Ok as i32).then_some(h)
    })
}

/// Open or create the store at `path` and route allocations to it.
///
/// Args:
///     path: Backing file. Created if missing.
///     size_gib: Size of a newly created file in GiB (default 32 MiB).
///         Ignored when the file exists.
///
/// Returns:
///     True if the store header was freshly written, False if an existing
///     store was attached or a store was already active (a warning is
///     logged and nothing changes).
#[pyfunction]
#[pyo3(signature = (path, size_gib=None))]
pub(crate) fn init_fmalloc(py: Python<'_>, path: &str, size_gib: Option<f64>) -> PyResult<bool> {
    let mut config = StoreConfig::new(path);
    if let Some(gib) = size_gib {
        config = config
            .with_size_gib(gib)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
    }
    let c_path =
        CString::new(path).map_err(|_| PyValueError::new_err("path contains a NUL byte"))?;
    let path_addr = c_path.as_ptr() as usize;
    let size = config.size;

    // Release GIL: fmalloc_init locks the redirector and may create a
    // multi-gigabyte file.
    let (status, fresh) = py.detach(|| {
        let mut fresh = 0u8;
        let s = fmalloc_init(
            path_addr as *const c_char,
            size,
            ptr::null_mut(),
            &mut fresh,
        );
        (s, fresh)
    });
    if status == FmStatus::AlreadyInitialized as i32 {
        return Ok(false);
    }
    check_status(status)?;
    Ok(fresh != 0)
}

/// Unmap the active store.
///
/// Buffers created from it become unusable; touching them raises
/// RuntimeError.
///
/// Returns:
///     True if a store was released, False if none was active.
#[pyfunction]
pub(crate) fn cleanup_fmalloc(py: Python<'_>) -> bool {
    py.detach(|| fmalloc_cleanup()) == FmStatus::Ok as i32
}

/// Occupancy of the active store.
#[pyclass(frozen)]
pub(crate) struct HeapStats {
    inner: FmHeapStats,
}

#[pymethods]
impl HeapStats {
    /// Store length in bytes.
    #[getter]
    fn total_bytes(&self) -> u64 {
        self.inner.total_bytes
    }

    /// Chunks in use, header included.
    #[getter]
    fn used_chunks(&self) -> u64 {
        self.inner.used_chunks
    }

    /// Chunks still available.
    #[getter]
    fn free_chunks(&self) -> u64 {
        self.inner.free_chunks
    }

    /// Blocks allocated and not yet freed.
    #[getter]
    fn live_blocks(&self) -> u64 {
        self.inner.live_blocks
    }

    /// Requested bytes across live blocks.
    #[getter]
    fn allocated_bytes(&self) -> u64 {
        self.inner.allocated_bytes
    }

    fn __repr__(&self) -> String {
        format!(
            "HeapStats(total_bytes={}, used_chunks={}, free_chunks={}, live_blocks={}, allocated_bytes={})",
            self.inner.total_bytes,
            self.inner.used_chunks,
            self.inner.free_chunks,
            self.inner.live_blocks,
            self.inner.allocated_bytes,
        )
    }
}

/// Occupancy of the active store.
#[pyfunction]
pub(crate) fn heap_stats(py: Python<'_>) -> PyResult<HeapStats> {
    let handle = active_handle(py).ok_or_else(|| status_error(FmStatus::NotInitialized as i32))?;
    let (status, inner) = py.detach(|| {
        let mut stats = FmHeapStats::default();
        let s = fmalloc_stats(handle, &mut stats);
        (s, stats)
    });
    check_status(status)?;
    Ok(HeapStats { inner })
}

/// Allocate a zero-filled vector in the active store.
///
/// Args:
///     dtype: "int", "double" or "logical".
///     length: Number of elements.
#[pyfunction]
pub(crate) fn create_fmalloc_vector(
    py: Python<'_>,
    dtype: &str,
    length: usize,
) -> PyResult<HeapBuffer> {
    let dtype = parse_dtype(dtype)?;
    let handle = active_handle(py).ok_or_else(|| status_error(FmStatus::NotInitialized as i32))?;
    let bytes = length
        .checked_mul(dtype.size_bytes())
        .ok_or_else(|| PyOverflowError::new_err(format!("{length} {dtype} elements overflow")))?;

    let addr = if bytes == 0 {
        0
    } else {
        // Release GIL: the allocation and the zero fill hold the redirector
        // lock.
        py.detach(|| fmalloc_alloc_zeroed(handle, bytes) as usize)
    };
    if bytes != 0 && addr == 0 {
        return Err(status_error(FmStatus::AllocationFailed as i32));
    }
    Ok(HeapBuffer {
        handle,
        addr,
        len: length,
        dtype,
    })
}

/// A vector living in a block of the active store.
///
/// The block is returned to the store exactly once: on `free()`, or when
/// the object is reclaimed.
#[pyclass]
pub(crate) struct HeapBuffer {
    handle: u64,
    /// Stored as usize (cast from the block pointer) for Send+Sync.
    addr: usize,
    len: usize,
    dtype: ElementType,
}

#[pymethods]
impl HeapBuffer {
    fn __len__(&self) -> usize {
        self.len
    }

    /// Element type name.
    #[getter]
    fn dtype(&self) -> &'static str {
        self.dtype.name()
    }

    /// Offset of the block from the start of the backing file.
    #[getter]
    fn offset(&self, py: Python<'_>) -> PyResult<u64> {
        let addr = self.require_live()?;
        let handle = self.handle;
        let (status, off) = py.detach(|| {
            let mut off = 0u64;
            let s = fmalloc_offset_of(handle, addr as *const c_void, &mut off);
            (s, off)
        });
        block_status(status)?;
        Ok(off)
    }

    fn __getitem__(&self, py: Python<'_>, index: isize) -> PyResult<Py<PyAny>> {
        let i = normalize_index(index, self.len)?;
        match self.dtype {
            ElementType::Integer => int_to_py(py, self.load::<i32>(py, i)?),
            ElementType::Double => real_to_py(py, self.load::<f64>(py, i)?),
            ElementType::Logical => logical_to_py(py, self.load::<i32>(py, i)?),
        }
    }

    fn __setitem__(&self, py: Python<'_>, index: isize, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let i = normalize_index(index, self.len)?;
        match self.dtype {
            ElementType::Integer => self.store(py, i, int_from_py(value)?),
            ElementType::Double => self.store(py, i, real_from_py(value)?),
            ElementType::Logical => self.store(py, i, logical_from_py(value)?),
        }
    }

    /// Copy the buffer into a new numpy array (int32 for "int" and
    /// "logical", float64 for "double"). Missing values keep their
    /// sentinel encoding.
    fn to_numpy<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        if self.len == 0 {
            return Ok(match self.dtype {
                ElementType::Double => PyArray1::<f64>::from_slice(py, &[]).into_any(),
                _ => PyArray1::<i32>::from_slice(py, &[]).into_any(),
            });
        }
        Ok(match self.dtype {
            ElementType::Double => {
                let mut data = vec![0f64; self.len];
                self.copy_out(py, 0, data.as_mut_ptr() as usize, self.len * size_of::<f64>())?;
                PyArray1::from_vec(py, data).into_any()
            }
            _ => {
                let mut data = vec![0i32; self.len];
                self.copy_out(py, 0, data.as_mut_ptr() as usize, self.len * size_of::<i32>())?;
                PyArray1::from_vec(py, data).into_any()
            }
        })
    }

    /// Return the block to the store. Further access raises RuntimeError.
    fn free(&mut self, py: Python<'_>) {
        self.release(py);
    }

    fn __repr__(&self) -> String {
        format!("HeapBuffer(dtype={:?}, len={})", self.dtype.name(), self.len)
    }
}

impl HeapBuffer {
    /// The block address, provided the block was not freed. Whether its
    /// store is still mapped is checked by the FFI call that uses it.
    fn require_live(&self) -> PyResult<usize> {
        if self.addr == 0 {
            return Err(PyRuntimeError::new_err("HeapBuffer already freed"));
        }
        Ok(self.addr)
    }

    fn load<T: Copy + Default>(&self, py: Python<'_>, i: usize) -> PyResult<T> {
        let mut value = T::default();
        self.copy_out(
            py,
            i * size_of::<T>(),
            ptr::from_mut(&mut value) as usize,
            size_of::<T>(),
        )?;
        Ok(value)
    }

    fn store<T: Copy>(&self, py: Python<'_>, i: usize, value: T) -> PyResult<()> {
        let addr = self.require_live()?;
        let (handle, src) = (self.handle, ptr::from_ref(&value) as usize);
        let offset = i * size_of::<T>();
        // Release GIL: the copy holds the redirector lock.
        let status = py.detach(|| {
            fmalloc_block_write(
                handle,
                addr as *mut c_void,
                offset,
                src as *const c_void,
                size_of::<T>(),
            )
        });
        block_status(status)
    }

    /// Copy `len` bytes at `offset` into the block out to `dst`.
    fn copy_out(&self, py: Python<'_>, offset: usize, dst: usize, len: usize) -> PyResult<()> {
        let addr = self.require_live()?;
        let handle = self.handle;
        let status = py.detach(|| {
            fmalloc_block_read(handle, addr as *const c_void, offset, dst as *mut c_void, len)
        });
        block_status(status)
    }

    fn release(&mut self, py: Python<'_>) {
        let addr = std::mem::take(&mut self.addr);
        if addr != 0 {
            let handle = self.handle;
            // Release GIL: fmalloc_free locks the redirector.
            py.detach(|| fmalloc_free(handle, addr as *mut c_void));
        }
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        if self.addr != 0 {
            // PyO3 Drop for #[pyclass] runs with GIL held.
            Python::attach(|py| self.release(py));
        }
    }
}

fn block_status(status: i32) -> PyResult<()> {
    if status == FmStatus::NotInitialized as i32 {
        return Err(PyRuntimeError::new_err(
            "the store backing this HeapBuffer has been cleaned up",
        ));
    }
    check_status(status)
}
