//! Backing store configuration.

use std::path::{Path, PathBuf};

use fmalloc_core::StoreError;

use crate::superblock::{CHUNK_SIZE, HEADER_REGION};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Where a store lives and how large to make it.
///
/// `size` is only consulted when the file does not exist yet. An existing
/// file is always mapped at its current length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the backing file.
    pub path: PathBuf,
    /// Length in bytes given to a newly created file.
    ///
    /// Default: [`StoreConfig::DEFAULT_SIZE`].
    pub size: u64,
}

impl StoreConfig {
    /// Default size of a newly created store: 32 MiB.
    pub const DEFAULT_SIZE: u64 = 32 * MIB;

    /// Smallest viable store: the header region plus one data chunk.
    pub const MIN_SIZE: u64 = HEADER_REGION + CHUNK_SIZE;

    /// Largest store this format can describe.
    pub const MAX_SIZE: u64 = 1000 * GIB;

    /// Configuration for `path` with the default size.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: Self::DEFAULT_SIZE,
        }
    }

    /// Set the creation size in bytes. Checked by [`validate`](Self::validate).
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Set the creation size in GiB, as host bindings express it.
    ///
    /// Rejects non-finite, non-positive and above-ceiling requests. Requests
    /// below the minimum viable size are raised to [`MIN_SIZE`](Self::MIN_SIZE).
    pub fn with_size_gib(mut self, gib: f64) -> Result<Self, StoreError> {
        if !gib.is_finite() || gib <= 0.0 {
            return Err(StoreError::invalid(format!(
                "store size must be a positive number of GiB, got {gib}"
            )));
        }
        let max_gib = (Self::MAX_SIZE / GIB) as f64;
        if gib > max_gib {
            return Err(StoreError::invalid(format!(
                "store size {gib} GiB exceeds the {max_gib} GiB ceiling"
            )));
        }
        let bytes = (gib * GIB as f64) as u64;
        self.size = bytes.max(Self::MIN_SIZE);
        Ok(self)
    }

    /// The configured path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the path and the size bounds.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::invalid("store path is empty"));
        }
        if self.size < Self::MIN_SIZE || self.size > Self::MAX_SIZE {
            return Err(StoreError::invalid(format!(
                "store size {} outside [{}, {}]",
                self.size,
                Self::MIN_SIZE,
                Self::MAX_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_size_is_32mib() {
        let config = StoreConfig::new("heap.bin");
        assert_eq!(config.size, 32 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_path_rejected() {
        let config = StoreConfig::new("");
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn gib_sizes() {
        let config = StoreConfig::new("h").with_size_gib(1.0).unwrap();
        assert_eq!(config.size, GIB);
        let config = StoreConfig::new("h").with_size_gib(0.25).unwrap();
        assert_eq!(config.size, GIB / 4);
    }

    #[test]
    fn tiny_gib_request_is_raised_to_minimum() {
        let config = StoreConfig::new("h").with_size_gib(1e-9).unwrap();
        assert_eq!(config.size, StoreConfig::MIN_SIZE);
    }

    #[test]
    fn bad_gib_requests_rejected() {
        for gib in [0.0, -1.0, f64::NAN, f64::INFINITY, 1001.0] {
            assert!(
                StoreConfig::new("h").with_size_gib(gib).is_err(),
                "{gib} accepted"
            );
        }
    }

    #[test]
    fn byte_size_bounds_checked() {
        assert!(StoreConfig::new("h")
            .with_size(StoreConfig::MIN_SIZE - 1)
            .validate()
            .is_err());
        assert!(StoreConfig::new("h")
            .with_size(StoreConfig::MAX_SIZE + 1)
            .validate()
            .is_err());
        assert!(StoreConfig::new("h")
            .with_size(StoreConfig::MIN_SIZE)
            .validate()
            .is_ok());
    }
}
