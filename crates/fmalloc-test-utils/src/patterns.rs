//! Deterministic data patterns for round-trip checks.

use fmalloc_core::{Element, NA_INTEGER};

/// `0, 1, 2, ...` skipping the integer NA sentinel.
pub fn int_ramp(len: usize) -> Vec<i32> {
    (0..len)
        .map(|i| {
            let v = i as i32;
            if v == NA_INTEGER {
                0
            } else {
                v
            }
        })
        .collect()
}

/// `0.0, 0.5, 1.0, ...`.
pub fn real_ramp(len: usize) -> Vec<f64> {
    (0..len).map(|i| i as f64 * 0.5).collect()
}

/// A byte pattern that differs for each `(seed, index)` pair modulo 251.
pub fn byte_pattern(seed: u64, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((seed as usize).wrapping_mul(31).wrapping_add(i) % 251) as u8)
        .collect()
}

/// Whether no element of `values` is NA.
pub fn none_na<T: Element>(values: &[T]) -> bool {
    values.iter().all(|v| !v.is_na())
}
