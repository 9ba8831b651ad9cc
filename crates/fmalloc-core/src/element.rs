//! Element types storable in mapped memory, and their missing-value
//! sentinels.
//!
//! Every element type is plain old data: any bit pattern read back from a
//! file is a valid value. The [`Element`] trait is sealed so that invariant
//! cannot be broken from outside this crate.

use std::fmt;

use crate::error::StoreError;

/// Bit pattern of the double-precision missing value: a NaN with the quiet
/// bit clear whose low word carries the payload 1954.
pub const NA_REAL_BITS: u64 = 0x7FF0_0000_0000_07A2;

/// Missing value for 32-bit integers and logicals.
pub const NA_INTEGER: i32 = i32::MIN;

mod sealed {
    pub trait Sealed {}
    impl Sealed for i32 {}
    impl Sealed for f64 {}
    impl Sealed for super::Logical {}
}

/// Runtime tag for an element type.
///
/// Values are ABI-stable; they cross the C boundary as `i32`.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit signed integer.
    Integer = 0,
    /// 64-bit IEEE float.
    Double = 1,
    /// Three-valued logical stored as a 32-bit integer.
    Logical = 2,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::Integer | Self::Logical => 4,
            Self::Double => 8,
        }
    }

    /// Lowercase name, as used by host bindings (`"int"`, `"double"`,
    /// `"logical"`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "int",
            Self::Double => "double",
            Self::Logical => "logical",
        }
    }

    /// Parse a host-facing type name. Accepts a few common aliases.
    pub fn from_name(name: &str) -> Result<Self, StoreError> {
        match name {
            "int" | "integer" | "i32" => Ok(Self::Integer),
            "double" | "real" | "numeric" | "f64" => Ok(Self::Double),
            "logical" | "bool" => Ok(Self::Logical),
            other => Err(StoreError::invalid(format!(
                "unsupported element type {other:?}"
            ))),
        }
    }
}

impl TryFrom<i32> for ElementType {
    type Error = StoreError;

    fn try_from(tag: i32) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Integer),
            1 => Ok(Self::Double),
            2 => Ok(Self::Logical),
            other => Err(StoreError::invalid(format!(
                "unknown element type tag {other}"
            ))),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value that can live directly in mapped memory.
pub trait Element: sealed::Sealed + Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The runtime tag for this type.
    const TYPE: ElementType;

    /// The missing-value sentinel, returned for out-of-range reads.
    const NA: Self;

    /// Whether this value is the missing-value sentinel.
    fn is_na(&self) -> bool;
}

impl Element for i32 {
    const TYPE: ElementType = ElementType::Integer;
    const NA: Self = NA_INTEGER;

    fn is_na(&self) -> bool {
        *self == NA_INTEGER
    }
}

impl Element for f64 {
    const TYPE: ElementType = ElementType::Double;
    const NA: Self = f64::from_bits(NA_REAL_BITS);

    fn is_na(&self) -> bool {
        // Arithmetic may flip the quiet bit; only the payload identifies NA.
        self.is_nan() && (self.to_bits() & 0xFFFF_FFFF) == 1954
    }
}

/// A three-valued logical: true, false, or missing.
///
/// Stored as a 32-bit integer (`1`, `0`, [`NA_INTEGER`]) so that every bit
/// pattern is a valid value. Non-zero, non-NA integers read as true.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Logical(pub i32);

impl Logical {
    /// Logical true.
    pub const TRUE: Logical = Logical(1);
    /// Logical false.
    pub const FALSE: Logical = Logical(0);

    /// `None` for missing, otherwise the truth value.
    pub fn to_bool(self) -> Option<bool> {
        match self.0 {
            NA_INTEGER => None,
            0 => Some(false),
            _ => Some(true),
        }
    }
}

impl From<bool> for Logical {
    fn from(b: bool) -> Self {
        if b {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }
}

impl From<Option<bool>> for Logical {
    fn from(b: Option<bool>) -> Self {
        b.map_or(Self::NA, Self::from)
    }
}

impl fmt::Debug for Logical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bool() {
            Some(true) => f.write_str("TRUE"),
            Some(false) => f.write_str("FALSE"),
            None => f.write_str("NA"),
        }
    }
}

impl Element for Logical {
    const TYPE: ElementType = ElementType::Logical;
    const NA: Self = Logical(NA_INTEGER);

    fn is_na(&self) -> bool {
        self.0 == NA_INTEGER
    }
}
