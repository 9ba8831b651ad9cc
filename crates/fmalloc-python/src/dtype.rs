//! Element type parsing and Python value conversion shared by both vector
//! classes. Missing values surface as `None` in both directions.

use pyo3::exceptions::{PyIndexError, PyOverflowError, PyValueError};
use pyo3::prelude::*;
use pyo3::IntoPyObjectExt;

use fmalloc_core::{Element, ElementType, Logical, NA_INTEGER};

pub(crate) fn parse_dtype(name: &str) -> PyResult<ElementType> {
    ElementType::from_name(name).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Resolve a possibly negative Python index against `len`.
pub(crate) fn normalize_index(index: isize, len: usize) -> PyResult<usize> {
    let resolved = if index < 0 {
        len.checked_sub(index.unsigned_abs())
    } else {
        Some(index.unsigned_abs()).filter(|&i| i < len)
    };
    resolved.ok_or_else(|| {
        PyIndexError::new_err(format!("index {index} out of range for length {len}"))
    })
}

pub(crate) fn int_to_py(py: Python<'_>, v: i32) -> PyResult<Py<PyAny>> {
    (!v.is_na()).then_some(v).into_py_any(py)
}

pub(crate) fn real_to_py(py: Python<'_>, v: f64) -> PyResult<Py<PyAny>> {
    (!v.is_na()).then_some(v).into_py_any(py)
}

pub(crate) fn logical_to_py(py: Python<'_>, v: i32) -> PyResult<Py<PyAny>> {
    Logical(v).to_bool().into_py_any(py)
}

pub(crate) fn int_from_py(value: &Bound<'_, PyAny>) -> PyResult<i32> {
    match value.extract::<Option<i64>>()? {
        None => Ok(NA_INTEGER),
        Some(v) => i32::try_from(v)
            .ok()
            .filter(|v| !v.is_na())
            .ok_or_else(|| PyOverflowError::new_err(format!("{v} does not fit a 32-bit integer"))),
    }
}

pub(crate) fn real_from_py(value: &Bound<'_, PyAny>) -> PyResult<f64> {
    Ok(value.extract::<Option<f64>>()?.unwrap_or(<f64 as Element>::NA))
}

pub(crate) fn logical_from_py(value: &Bound<'_, PyAny>) -> PyResult<i32> {
    Ok(Logical::from(value.extract::<Option<bool>>()?).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_indices_count_from_the_end() {
        assert_eq!(normalize_index(-1, 5).unwrap(), 4);
        assert_eq!(normalize_index(-5, 5).unwrap(), 0);
        assert_eq!(normalize_index(0, 5).unwrap(), 0);
        assert_eq!(normalize_index(4, 5).unwrap(), 4);
    }

    #[test]
    fn dtype_names() {
        assert_eq!(parse_dtype("int").unwrap(), ElementType::Integer);
        assert_eq!(parse_dtype("double").unwrap(), ElementType::Double);
        assert_eq!(parse_dtype("logical").unwrap(), ElementType::Logical);
    }
}
