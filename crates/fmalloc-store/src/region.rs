//! A file mapped read/write and shared.
//!
//! The only `unsafe` in this crate lives here: creating the mapping. Every
//! other access goes through the safe slice views.

#![allow(unsafe_code)]

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fmalloc_core::StoreError;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;

/// Files this process currently has mapped, keyed by canonical path.
///
/// Resizing a file under a live mapping turns later accesses into SIGBUS,
/// so [`MappedRegion::create_exact`] consults this before touching the
/// file length.
static MAPPED: Mutex<BTreeMap<PathBuf, Live>> = Mutex::new(BTreeMap::new());

#[derive(Debug)]
struct Live {
    len: u64,
    regions: usize,
}

/// A whole file mapped into memory.
///
/// The mapping length equals the file length at mapping time. The file is
/// never resized while mapped. Dropping the region unmaps it and closes the
/// file; nothing is flushed explicitly, the shared mapping is written back
/// by the OS.
#[derive(Debug)]
pub struct MappedRegion {
    map: MmapMut,
    // Held so the descriptor lives exactly as long as the mapping.
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
    key: PathBuf,
}

impl MappedRegion {
    /// Map an existing file at its current length.
    pub fn open_existing(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, &e))?;
        let key = canonical(path)?;
        let mut mapped = MAPPED.lock();
        let len = file.metadata().map_err(|e| StoreError::io(path, &e))?.len();
        Self::map(&mut mapped, file, path, key, len)
    }

    /// Create a file that must not exist yet, size it to `len` bytes, and
    /// map it.
    pub fn create_new(path: &Path, len: u64) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| StoreError::io(path, &e))?;
        let key = canonical(path)?;
        let mut mapped = MAPPED.lock();
        file.set_len(len).map_err(|e| StoreError::io(path, &e))?;
        Self::map(&mut mapped, file, path, key, len)
    }

    /// Open or create a file, truncate or extend it to exactly `len` bytes,
    /// and map it. Existing contents within `len` are preserved.
    ///
    /// A file this process already has mapped keeps its length: asking for
    /// the same length maps it again, asking for any other length fails
    /// with [`StoreError::StillMapped`] and leaves the file alone.
    pub fn create_exact(path: &Path, len: u64) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::io(path, &e))?;
        let key = canonical(path)?;
        let mut mapped = MAPPED.lock();
        match mapped.get(&key) {
            Some(live) if live.len != len => {
                tracing::warn!(
                    path = %path.display(),
                    mapped_len = live.len,
                    requested = len,
                    "refusing to resize a mapped file"
                );
                return Err(StoreError::StillMapped {
                    path: path.to_path_buf(),
                    mapped_len: live.len,
                    requested: len,
                });
            }
            Some(_) => {}
            None => file.set_len(len).map_err(|e| StoreError::io(path, &e))?,
        }
        Self::map(&mut mapped, file, path, key, len)
    }

    /// Whether this process currently has `path` mapped.
    pub fn is_mapped(path: &Path) -> bool {
        path.canonicalize()
            .is_ok_and(|key| MAPPED.lock().contains_key(&key))
    }

    fn map(
        mapped: &mut BTreeMap<PathBuf, Live>,
        file: File,
        path: &Path,
        key: PathBuf,
        len: u64,
    ) -> Result<Self, StoreError> {
        let size = usize::try_from(len).map_err(|_| {
            StoreError::mapping(
                path,
                &io::Error::new(io::ErrorKind::InvalidInput, "file exceeds address space"),
            )
        })?;
        // SAFETY: the file is opened read/write by this process and stays
        // open for the lifetime of the mapping. Concurrent modification by
        // other processes is outside the single-writer contract; all access
        // from this process goes through `&self`/`&mut self` borrows of
        // the region, and no path in this process resizes a mapped file.
        let map = unsafe { MmapOptions::new().len(size).map_mut(&file) }
            .map_err(|e| StoreError::mapping(path, &e))?;
        mapped
            .entry(key.clone())
            .or_insert(Live { len, regions: 0 })
            .regions += 1;
        tracing::debug!(path = %path.display(), len = size, "mapped file");
        Ok(Self {
            map,
            file,
            path: path.to_path_buf(),
            key,
        })
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Mutable base address of the mapping.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    /// The whole mapping.
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// The whole mapping, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], StoreError> {
        let end = self.check_range(offset, len)?;
        Ok(&self.map[offset..end])
    }

    /// `len` bytes starting at `offset`, mutably.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], StoreError> {
        let end = self.check_range(offset, len)?;
        Ok(&mut self.map[offset..end])
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<usize, StoreError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.map.len() => Ok(end),
            _ => Err(StoreError::OutOfBounds {
                index: offset.saturating_add(len),
                len: self.map.len(),
            }),
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), len = self.map.len(), "unmapping file");
        let mut mapped = MAPPED.lock();
        if let Some(live) = mapped.get_mut(&self.key) {
            live.regions -= 1;
            if live.regions == 0 {
                mapped.remove(&self.key);
            }
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf, StoreError> {
    path.canonicalize().map_err(|e| StoreError::io(path, &e))
}
