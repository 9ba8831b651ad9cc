//! MmapVector: a whole file mapped as one vector, driven through the lazy
//! vector hooks of the FFI layer.
//!
//! Element and region access go through the same entry points a host
//! runtime's lazy-vector class would call, so the Python object never
//! touches the mapping directly except through `dataptr()`.

use std::ffi::{c_char, CString};
use std::sync::Arc;

use numpy::{PyArray1, PyArrayMethods};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use fmalloc_core::ElementType;
use fmalloc_ffi::{
    fmalloc_vector_dataptr, fmalloc_vector_duplicate, fmalloc_vector_elt_int,
    fmalloc_vector_elt_logical, fmalloc_vector_elt_real, fmalloc_vector_get_region_int,
    fmalloc_vector_get_region_logical, fmalloc_vector_get_region_real, fmalloc_vector_length,
    fmalloc_vector_open, fmalloc_vector_release, fmalloc_vector_set_region_int,
    fmalloc_vector_set_region_logical, fmalloc_vector_set_region_real,
};

use crate::dtype::{
    int_from_py, int_to_py, logical_from_py, logical_to_py, normalize_index, parse_dtype,
    real_from_py, real_to_py,
};
use crate::error::check_status;

/// An FFI vector handle, released when the last Python view drops it.
#[derive(Debug)]
struct VectorHandle(u64);

impl Drop for VectorHandle {
    fn drop(&mut self) {
        let h = self.0;
        Python::attach(|py| {
            py.detach(|| fmalloc_vector_release(h));
        });
    }
}

/// Turn a region hook result (count or negative status) into a count.
fn region_result(n: i64) -> PyResult<usize> {
    if n < 0 {
        check_status(n as i32)?;
    }
    Ok(n as usize)
}

/// Map `length` elements of `dtype` from `path`.
///
/// The file is created if missing and resized to exactly
/// `length * element_size` bytes; existing contents up to that length are
/// kept.
///
/// Args:
///     path: Backing file.
///     length: Number of elements (must be positive).
///     dtype: "int" (default), "double" or "logical".
#[pyfunction]
#[pyo3(signature = (path, length, dtype="int"))]
pub(crate) fn create_mmap_vector(
    py: Python<'_>,
    path: &str,
    length: u64,
    dtype: &str,
) -> PyResult<MmapVector> {
    let ty = parse_dtype(dtype)?;
    let c_path =
        CString::new(path).map_err(|_| PyValueError::new_err("path contains a NUL byte"))?;
    let path_addr = c_path.as_ptr() as usize;

    // Release GIL: fmalloc_vector_open maps the file and locks VECTORS.
    let (status, handle) = py.detach(|| {
        let mut h = 0u64;
        let s = fmalloc_vector_open(path_addr as *const c_char, length, ty as i32, &mut h);
        (s, h)
    });
    check_status(status)?;

    let len = py.detach(|| fmalloc_vector_length(handle));
    Ok(MmapVector {
        handle: Some(Arc::new(VectorHandle(handle))),
        len: usize::try_from(len).unwrap_or(0),
        dtype: ty,
        path: path.to_owned(),
    })
}

/// A vector backed by a memory-mapped file.
///
/// Writes go straight to the page cache and reach the file without an
/// explicit save. `duplicate()` returns another view of the same mapping;
/// the file is unmapped once every view is closed or reclaimed.
#[pyclass]
pub(crate) struct MmapVector {
    handle: Option<Arc<VectorHandle>>,
    len: usize,
    dtype: ElementType,
    path: String,
}

#[pymethods]
impl MmapVector {
    fn __len__(&self) -> usize {
        self.len
    }

    /// Element type name.
    #[getter]
    fn dtype(&self) -> &'static str {
        self.dtype.name()
    }

    /// Backing file path.
    #[getter]
    fn path(&self) -> &str {
        &self.path
    }

    fn __getitem__(&self, py: Python<'_>, index: isize) -> PyResult<Py<PyAny>> {
        let h = self.require_handle()?;
        let i = normalize_index(index, self.len)? as u64;
        match self.dtype {
            ElementType::Integer => int_to_py(py, py.detach(|| fmalloc_vector_elt_int(h, i))),
            ElementType::Double => real_to_py(py, py.detach(|| fmalloc_vector_elt_real(h, i))),
            ElementType::Logical => {
                logical_to_py(py, py.detach(|| fmalloc_vector_elt_logical(h, i)))
            }
        }
    }

    fn __setitem__(&self, py: Python<'_>, index: isize, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let h = self.require_handle()?;
        let i = normalize_index(index, self.len)? as u64;
        let n = match self.dtype {
            ElementType::Integer => {
                let v = int_from_py(value)?;
                py.detach(|| fmalloc_vector_set_region_int(h, i, &v, 1))
            }
            ElementType::Double => {
                let v = real_from_py(value)?;
                py.detach(|| fmalloc_vector_set_region_real(h, i, &v, 1))
            }
            ElementType::Logical => {
                let v = logical_from_py(value)?;
                py.detach(|| fmalloc_vector_set_region_logical(h, i, &v, 1))
            }
        };
        region_result(n).map(|_| ())
    }

    /// Copy up to `count` elements starting at `start` into a new numpy
    /// array (int32 for "int" and "logical", float64 for "double"). The
    /// result is shorter than `count` when the region runs past the end.
    fn get_region<'py>(
        &self,
        py: Python<'py>,
        start: u64,
        count: usize,
    ) -> PyResult<Bound<'py, PyAny>> {
        let h = self.require_handle()?;
        let count = count.min(self.len.saturating_sub(start as usize));
        Ok(match self.dtype {
            ElementType::Double => {
                let mut buf = vec![0f64; count];
                let addr = buf.as_mut_ptr() as usize;
                let n = py.detach(|| {
                    fmalloc_vector_get_region_real(h, start, count as u64, addr as *mut f64)
                });
                buf.truncate(region_result(n)?);
                PyArray1::from_vec(py, buf).into_any()
            }
            ty => {
                let mut buf = vec![0i32; count];
                let addr = buf.as_mut_ptr() as usize;
                let n = py.detach(|| {
                    let buf = addr as *mut i32;
                    if ty == ElementType::Logical {
                        fmalloc_vector_get_region_logical(h, start, count as u64, buf)
                    } else {
                        fmalloc_vector_get_region_int(h, start, count as u64, buf)
                    }
                });
                buf.truncate(region_result(n)?);
                PyArray1::from_vec(py, buf).into_any()
            }
        })
    }

    /// Copy a numpy array into the vector starting at `start`.
    ///
    /// The array must be int32 for "int" and "logical" vectors, float64 for
    /// "double". Returns the number of elements written, clamped to the
    /// vector end.
    fn set_region(&self, py: Python<'_>, start: u64, values: &Bound<'_, PyAny>) -> PyResult<usize> {
        let h = self.require_handle()?;
        let n = match self.dtype {
            ElementType::Double => {
                let arr = values.cast::<PyArray1<f64>>()?;
                let ro = arr.readonly();
                let data = ro
                    .as_slice()
                    .map_err(|e| PyValueError::new_err(e.to_string()))?;
                let (addr, len) = (data.as_ptr() as usize, data.len() as u64);
                py.detach(|| fmalloc_vector_set_region_real(h, start, addr as *const f64, len))
            }
            ty => {
                let arr = values.cast::<PyArray1<i32>>()?;
                let ro = arr.readonly();
                let data = ro
                    .as_slice()
                    .map_err(|e| PyValueError::new_err(e.to_string()))?;
                let (addr, len) = (data.as_ptr() as usize, data.len() as u64);
                py.detach(|| {
                    let buf = addr as *const i32;
                    if ty == ElementType::Logical {
                        fmalloc_vector_set_region_logical(h, start, buf, len)
                    } else {
                        fmalloc_vector_set_region_int(h, start, buf, len)
                    }
                })
            }
        };
        region_result(n)
    }

    /// The whole vector as a numpy array. See `get_region`.
    fn to_numpy<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        self.get_region(py, 0, self.len)
    }

    /// Another view of the same mapping. Writes through either are visible
    /// through both.
    fn duplicate(&self, py: Python<'_>) -> PyResult<MmapVector> {
        let h = self.require_handle()?;
        let (status, dup) = py.detach(|| {
            let mut out = 0u64;
            let s = fmalloc_vector_duplicate(h, &mut out);
            (s, out)
        });
        check_status(status)?;
        debug_assert_eq!(dup, h);
        Ok(MmapVector {
            handle: self.handle.clone(),
            len: self.len,
            dtype: self.dtype,
            path: self.path.clone(),
        })
    }

    /// Address of the first element, for handing to other native code.
    /// Valid while this view (or a duplicate) is open.
    fn dataptr(&self, py: Python<'_>) -> PyResult<usize> {
        let h = self.require_handle()?;
        Ok(py.detach(|| fmalloc_vector_dataptr(h) as usize))
    }

    /// Close this view. The file is unmapped once no duplicate remains.
    fn close(&mut self, py: Python<'_>) {
        self.do_close_with_gil(py);
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    #[pyo3(signature = (_exc_type=None, _exc_val=None, _exc_tb=None))]
    fn __exit__(
        &mut self,
        py: Python<'_>,
        _exc_type: Option<&Bound<'_, PyAny>>,
        _exc_val: Option<&Bound<'_, PyAny>>,
        _exc_tb: Option<&Bound<'_, PyAny>>,
    ) {
        self.do_close_with_gil(py);
    }

    fn __repr__(&self) -> String {
        format!(
            "MmapVector(path={:?}, dtype={:?}, len={}{})",
            self.path,
            self.dtype.name(),
            self.len,
            if self.handle.is_some() { "" } else { ", closed" }
        )
    }
}

impl MmapVector {
    fn require_handle(&self) -> PyResult<u64> {
        self.handle
            .as_ref()
            .map(|h| h.0)
            .ok_or_else(|| PyRuntimeError::new_err("MmapVector already closed"))
    }

    /// Drop this view's share of the handle. The last share releases it
    /// with the GIL detached (see `VectorHandle`).
    fn do_close_with_gil(&mut self, _py: Python<'_>) {
        self.handle.take();
    }
}
