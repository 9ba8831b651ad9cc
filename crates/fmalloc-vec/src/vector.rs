//! Typed vectors backed by a memory-mapped file.

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fmalloc_core::{Element, ElementType, StoreError};
use fmalloc_store::MappedRegion;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::raw;

struct VectorInner {
    region: RwLock<MappedRegion>,
    len: usize,
    path: PathBuf,
}

impl Drop for VectorInner {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), len = self.len, "releasing mapped vector");
    }
}

/// A vector of `T` whose storage is a memory-mapped file.
///
/// The file length is exactly `len * size_of::<T>()`. Handles returned by
/// [`duplicate`](Self::duplicate) share the same mapping; writes through
/// one are visible through all. The mapping is unmapped and the file closed
/// when the last handle drops.
///
/// Element access goes through an internal reader-writer lock, so handles
/// may be shared across threads. Raw pointers from
/// [`as_ptr`](Self::as_ptr) and [`as_mut_ptr`](Self::as_mut_ptr) bypass the
/// lock.
pub struct MappedVector<T: Element> {
    inner: Arc<VectorInner>,
    _marker: PhantomData<T>,
}

impl<T: Element> MappedVector<T> {
    /// Map `count` elements from `path`, creating the file if needed.
    ///
    /// The file is truncated or extended to exactly the byte length first;
    /// existing bytes within that length are kept, so reopening a file with
    /// the same count reproduces its contents. The byte length is checked
    /// for overflow before any file is touched.
    ///
    /// A file still mapped in this process (by another vector or by the
    /// active store) is never resized: the same byte length maps it again
    /// and shares its contents, any other length fails with
    /// [`StoreError::StillMapped`].
    pub fn create_or_open(path: impl AsRef<Path>, count: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StoreError::invalid("vector path is empty"));
        }
        if count == 0 {
            return Err(StoreError::invalid("vector length must be positive"));
        }
        let bytes = count
            .checked_mul(size_of::<T>())
            .filter(|&b| u64::try_from(b).is_ok() && b <= isize::MAX as usize)
            .ok_or(StoreError::Overflow {
                count: count as u64,
                element_size: size_of::<T>(),
            })?;
        let region = MappedRegion::create_exact(path, bytes as u64)?;
        tracing::debug!(path = %path.display(), count, ty = %T::TYPE, "mapped vector");
        Ok(Self::from_region(region, count))
    }

    /// Map an existing file, taking the length from its size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let region = MappedRegion::open_existing(path)?;
        let bytes = region.len();
        if bytes == 0 || bytes % size_of::<T>() != 0 {
            return Err(StoreError::invalid(format!(
                "{} is {bytes} bytes, not a whole number of {} elements",
                path.display(),
                T::TYPE
            )));
        }
        Ok(Self::from_region(region, bytes / size_of::<T>()))
    }

    fn from_region(region: MappedRegion, len: usize) -> Self {
        let path = region.path().to_path_buf();
        Self {
            inner: Arc::new(VectorInner {
                region: RwLock::new(region),
                len,
                path,
            }),
            _marker: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Always false: vectors hold at least one element.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Element type tag.
    pub fn element_type(&self) -> ElementType {
        T::TYPE
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Element `i`, or `T::NA` when `i` is out of range.
    pub fn element_at(&self, i: usize) -> T {
        self.get(i).unwrap_or(T::NA)
    }

    /// Element `i`, or `None` when out of range.
    pub fn get(&self, i: usize) -> Option<T> {
        self.read().get(i).copied()
    }

    /// Overwrite element `i`.
    pub fn set(&self, i: usize, value: T) -> Result<(), StoreError> {
        let mut data = self.write();
        let len = data.len();
        let slot = data
            .get_mut(i)
            .ok_or(StoreError::OutOfBounds { index: i, len })?;
        *slot = value;
        Ok(())
    }

    /// Copy up to `count` elements starting at `start` into `out`.
    ///
    /// Clamped to the vector bounds and to `out.len()`. Returns the number
    /// of elements copied; 0 when `start` is past the end.
    pub fn copy_region(&self, start: usize, count: usize, out: &mut [T]) -> usize {
        let data = self.read();
        let n = clamp(start, count.min(out.len()), data.len());
        if n > 0 {
            out[..n].copy_from_slice(&data[start..start + n]);
        }
        n
    }

    /// Copy `values` into the vector starting at `start`.
    ///
    /// Clamped to the vector bounds. Returns the number of elements written.
    pub fn write_region(&self, start: usize, values: &[T]) -> usize {
        let mut data = self.write();
        let n = clamp(start, values.len(), data.len());
        if n > 0 {
            data[start..start + n].copy_from_slice(&values[..n]);
        }
        n
    }

    /// Set every element to `value`.
    pub fn fill(&self, value: T) {
        self.write().fill(value);
    }

    /// Copy the whole vector out.
    pub fn to_vec(&self) -> Vec<T> {
        self.read().to_vec()
    }

    /// Shared view of the elements. Blocks writers while held.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [T]> {
        RwLockReadGuard::map(self.inner.region.read(), |region| {
            raw::as_elements::<T>(region.as_slice())
        })
    }

    /// Exclusive view of the elements. Blocks all other access while held.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [T]> {
        RwLockWriteGuard::map(self.inner.region.write(), |region| {
            raw::as_elements_mut::<T>(region.as_mut_slice())
        })
    }

    /// Pointer to the first element. Valid while any handle is alive.
    pub fn as_ptr(&self) -> *const T {
        self.read().as_ptr()
    }

    /// Mutable pointer to the first element. Valid while any handle is
    /// alive; writes through it are not synchronized with other access.
    pub fn as_mut_ptr(&self) -> *mut T {
        self.write().as_mut_ptr()
    }

    /// Another handle to the same mapping. No data is copied and writes are
    /// shared.
    pub fn duplicate(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }

    /// Number of live handles to this mapping.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles share a mapping.
    pub fn same_mapping(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Element> Clone for MappedVector<T> {
    fn clone(&self) -> Self {
        self.duplicate()
    }
}

impl<T: Element> fmt::Debug for MappedVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedVector")
            .field("type", &T::TYPE)
            .field("len", &self.inner.len)
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Elements available from `start` for a request of `want`, given `len`.
fn clamp(start: usize, want: usize, len: usize) -> usize {
    if start >= len {
        0
    } else {
        want.min(len - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmalloc_core::Logical;
    use fmalloc_test_utils::ScratchDir;

    #[test]
    fn hundred_ints_is_400_bytes() {
        let dir = ScratchDir::new();
        let path = dir.file("v.bin");
        let v = MappedVector::<i32>::create_or_open(&path, 100).unwrap();
        assert_eq!(v.len(), 100);
        assert_eq!(ScratchDir::file_len(&path), 400);
        assert_eq!(v.element_at(0), 0);
        assert_eq!(v.element_at(100), i32::MIN);
    }

    #[test]
    fn doubles_read_na_out_of_range() {
        let dir = ScratchDir::new();
        let v = MappedVector::<f64>::create_or_open(dir.file("d.bin"), 3).unwrap();
        v.set(2, 1.5).unwrap();
        assert_eq!(v.element_at(2), 1.5);
        assert!(v.element_at(3).is_na());
    }

    #[test]
    fn set_past_end_is_out_of_bounds() {
        let dir = ScratchDir::new();
        let v = MappedVector::<Logical>::create_or_open(dir.file("l.bin"), 2).unwrap();
        v.set(1, Logical::TRUE).unwrap();
        assert_eq!(
            v.set(2, Logical::TRUE),
            Err(StoreError::OutOfBounds { index: 2, len: 2 })
        );
        assert_eq!(v.element_at(1).to_bool(), Some(true));
        assert!(v.element_at(2).is_na());
    }

    #[test]
    fn invalid_arguments() {
        let dir = ScratchDir::new();
        assert!(matches!(
            MappedVector::<i32>::create_or_open("", 10),
            Err(StoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            MappedVector::<i32>::create_or_open(dir.file("z.bin"), 0),
            Err(StoreError::InvalidArgument { .. })
        ));
        assert!(!dir.file("z.bin").exists());
    }

    #[test]
    fn overflow_creates_no_file() {
        let dir = ScratchDir::new();
        let path = dir.file("huge.bin");
        let err = MappedVector::<f64>::create_or_open(&path, usize::MAX / 4).unwrap_err();
        assert_eq!(
            err,
            StoreError::Overflow {
                count: (usize::MAX / 4) as u64,
                element_size: 8
            }
        );
        assert!(!path.exists());
    }

    #[test]
    fn region_copies_clamp() {
        let dir = ScratchDir::new();
        let v = MappedVector::<i32>::create_or_open(dir.file("r.bin"), 10).unwrap();
        assert_eq!(v.write_region(8, &[1, 2, 3, 4]), 2);
        let mut out = [0i32; 5];
        assert_eq!(v.copy_region(7, 5, &mut out), 3);
        assert_eq!(&out[..3], &[0, 1, 2]);
        assert_eq!(v.copy_region(10, 5, &mut out), 0);
        assert_eq!(v.copy_region(0, 100, &mut out), 5);
        assert_eq!(v.copy_region(0, 2, &mut out), 2);
    }

    #[test]
    fn duplicate_shares_storage() {
        let dir = ScratchDir::new();
        let a = MappedVector::<i32>::create_or_open(dir.file("s.bin"), 4).unwrap();
        let b = a.duplicate();
        assert!(a.same_mapping(&b));
        assert_eq!(a.ref_count(), 2);
        b.set(0, 99).unwrap();
        assert_eq!(a.element_at(0), 99);
        assert_eq!(a.as_ptr(), b.as_ptr());
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn open_takes_length_from_file() {
        let dir = ScratchDir::new();
        let path = dir.file("o.bin");
        MappedVector::<f64>::create_or_open(&path, 6).unwrap().fill(2.0);
        let v = MappedVector::<f64>::open(&path).unwrap();
        assert_eq!(v.len(), 6);
        assert_eq!(v.to_vec(), vec![2.0; 6]);
        let ragged = dir.sized_file("ragged.bin", 6);
        assert!(MappedVector::<i32>::open(&ragged).is_err());
    }
}
