//! Type-erased mapped vectors.

use std::path::Path;

use fmalloc_core::{ElementType, Logical, StoreError};

use crate::vector::MappedVector;

/// A mapped vector whose element type is chosen at runtime.
#[derive(Clone, Debug)]
pub enum AnyVector {
    /// 32-bit integers.
    Integer(MappedVector<i32>),
    /// 64-bit floats.
    Double(MappedVector<f64>),
    /// Three-valued logicals.
    Logical(MappedVector<Logical>),
}

macro_rules! dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            AnyVector::Integer($v) => $body,
            AnyVector::Double($v) => $body,
            AnyVector::Logical($v) => $body,
        }
    };
}

impl AnyVector {
    /// Map `count` elements of type `ty` from `path`, creating the file if
    /// needed. See [`MappedVector::create_or_open`].
    pub fn create_or_open(
        path: impl AsRef<Path>,
        count: usize,
        ty: ElementType,
    ) -> Result<Self, StoreError> {
        Ok(match ty {
            ElementType::Integer => Self::Integer(MappedVector::create_or_open(path, count)?),
            ElementType::Double => Self::Double(MappedVector::create_or_open(path, count)?),
            ElementType::Logical => Self::Logical(MappedVector::create_or_open(path, count)?),
        })
    }

    /// Like [`create_or_open`](Self::create_or_open) with a raw type tag.
    pub fn create_or_open_tagged(
        path: impl AsRef<Path>,
        count: usize,
        tag: i32,
    ) -> Result<Self, StoreError> {
        Self::create_or_open(path, count, ElementType::try_from(tag)?)
    }

    /// Element type tag.
    pub fn element_type(&self) -> ElementType {
        dispatch!(self, v => v.element_type())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    /// Always false.
    pub fn is_empty(&self) -> bool {
        dispatch!(self, v => v.is_empty())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        dispatch!(self, v => v.path())
    }

    /// Another handle to the same mapping.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Number of live handles to this mapping.
    pub fn ref_count(&self) -> usize {
        dispatch!(self, v => v.ref_count())
    }

    /// Untyped pointer to the first element.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        dispatch!(self, v => v.as_mut_ptr().cast::<u8>())
    }

    /// The integer vector, if that is the element type.
    pub fn as_integer(&self) -> Option<&MappedVector<i32>> {
        match self {
            Self::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// The double vector, if that is the element type.
    pub fn as_double(&self) -> Option<&MappedVector<f64>> {
        match self {
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    /// The logical vector, if that is the element type.
    pub fn as_logical(&self) -> Option<&MappedVector<Logical>> {
        match self {
            Self::Logical(v) => Some(v),
            _ => None,
        }
    }
}

impl From<MappedVector<i32>> for AnyVector {
    fn from(v: MappedVector<i32>) -> Self {
        Self::Integer(v)
    }
}

impl From<MappedVector<f64>> for AnyVector {
    fn from(v: MappedVector<f64>) -> Self {
        Self::Double(v)
    }
}

impl From<MappedVector<Logical>> for AnyVector {
    fn from(v: MappedVector<Logical>) -> Self {
        Self::Logical(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmalloc_test_utils::ScratchDir;

    #[test]
    fn sizes_follow_element_type() {
        let dir = ScratchDir::new();
        for (ty, bytes) in [
            (ElementType::Integer, 40),
            (ElementType::Double, 80),
            (ElementType::Logical, 40),
        ] {
            let path = dir.file(ty.name());
            let v = AnyVector::create_or_open(&path, 10, ty).unwrap();
            assert_eq!(v.element_type(), ty);
            assert_eq!(v.len(), 10);
            assert_eq!(ScratchDir::file_len(&path), bytes);
        }
    }

    #[test]
    fn bad_tag_rejected_before_touching_disk() {
        let dir = ScratchDir::new();
        let path = dir.file("x.bin");
        assert!(matches!(
            AnyVector::create_or_open_tagged(&path, 10, 9),
            Err(StoreError::InvalidArgument { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn typed_access() {
        let dir = ScratchDir::new();
        let v = AnyVector::create_or_open(dir.file("d.bin"), 2, ElementType::Double).unwrap();
        assert!(v.as_integer().is_none());
        v.as_double().unwrap().set(0, 3.25).unwrap();
        let d = v.duplicate();
        assert_eq!(d.as_double().unwrap().element_at(0), 3.25);
        assert_eq!(v.ref_count(), 2);
        assert_eq!(v.as_mut_ptr(), d.as_mut_ptr());
    }
}
