//! Element data types and allocation classification enums.

use std::fmt;

use serde::Serialize;

/// Element type of a native buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// One byte per element, zero or non-zero.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// IEEE 754 half precision.
    Half,
    /// Brain floating point (8-bit exponent, 7-bit mantissa).
    BFloat16,
    /// IEEE 754 single precision.
    Float,
    /// IEEE 754 double precision.
    Double,
}

impl DataType {
    /// Width of one element in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Half | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
        }
    }

    /// Byte length of `len` elements, or `None` on overflow.
    pub fn byte_len(self, len: usize) -> Option<usize> {
        len.checked_mul(self.width())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What an allocation is used for. Device byte gauges are kept per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationKind {
    /// Ordinary standalone buffer.
    General,
    /// Workspace chunk, or a buffer spilled out of a workspace.
    Workspace,
    /// Immutable buffer whose contents may be shared.
    Constant,
    /// Allocation retained by a cache for reuse.
    Cache,
}

impl AllocationKind {
    /// Number of variants, for per-kind gauge arrays.
    pub const COUNT: usize = 4;

    /// All variants in declaration order.
    pub const ALL: [AllocationKind; Self::COUNT] =
        [Self::General, Self::Workspace, Self::Constant, Self::Cache];

    /// Dense index of this variant, in `0..COUNT`.
    pub const fn index(self) -> usize {
        match self {
            Self::General => 0,
            Self::Workspace => 1,
            Self::Constant => 2,
            Self::Cache => 3,
        }
    }
}

impl fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which side of the host/device split an allocation lives on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryKind {
    /// Host (system) memory.
    #[default]
    Host,
    /// Accelerator memory.
    Device,
}

impl MemoryKind {
    /// Number of variants.
    pub const COUNT: usize = 2;

    /// Dense index of this variant, in `0..COUNT`.
    pub const fn index(self) -> usize {
        match self {
            Self::Host => 0,
            Self::Device => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_match_element_sizes() {
        assert_eq!(DataType::Bool.width(), 1);
        assert_eq!(DataType::Half.width(), 2);
        assert_eq!(DataType::Float.width(), std::mem::size_of::<f32>());
        assert_eq!(DataType::Double.width(), std::mem::size_of::<f64>());
        assert_eq!(DataType::Int64.width(), 8);
    }

    #[test]
    fn byte_len_detects_overflow() {
        assert_eq!(DataType::Float.byte_len(256), Some(1024));
        assert_eq!(DataType::Double.byte_len(usize::MAX), None);
    }

    #[test]
    fn allocation_kind_indices_are_dense() {
        for (i, kind) in AllocationKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
