//! Element datatypes and runtime dispatch over them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element kind of a tensor buffer. The byte width is the stride unit of every view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl DataType {
    pub const ALL: [DataType; 12] = [
        DataType::Int8,
        DataType::UInt8,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Int64,
        DataType::UInt64,
        DataType::Float16,
        DataType::BFloat16,
        DataType::Float32,
        DataType::Float64,
    ];

    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 | DataType::BFloat16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Float16 | DataType::BFloat16 | DataType::Float32 | DataType::Float64
        )
    }

    /// Encode `value` as one element of this type, in native byte order.
    pub fn scalar_bytes(self, value: f64) -> Result<Vec<u8>> {
        with_element_type!(self, T => Ok(bytemuck::bytes_of(&T::from_f64(value)).to_vec()))
    }

    /// Fail with `UnsupportedDataType` unless `self == expected`.
    pub fn expect(self, expected: DataType) -> Result<()> {
        if self == expected {
            Ok(())
        } else {
            Err(Error::UnsupportedDataType(self))
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int8 => "i8",
            DataType::UInt8 => "u8",
            DataType::Int16 => "i16",
            DataType::UInt16 => "u16",
            DataType::Int32 => "i32",
            DataType::UInt32 => "u32",
            DataType::Int64 => "i64",
            DataType::UInt64 => "u64",
            DataType::Float16 => "f16",
            DataType::BFloat16 => "bf16",
            DataType::Float32 => "f32",
            DataType::Float64 => "f64",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Element: Rust scalar types that can live in a buffer
// ============================================================================

/// Scalar type stored in tensor buffers.
///
/// Conversions go through `f64`; integer conversions saturate (and map NaN to
/// zero) the way `as` casts do.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    const DATATYPE: DataType;

    fn to_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;
}

macro_rules! impl_element_cast {
    ($ty:ty, $dt:expr) => {
        impl Element for $ty {
            const DATATYPE: DataType = $dt;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
        }
    };
}

impl_element_cast!(i8, DataType::Int8);
impl_element_cast!(u8, DataType::UInt8);
impl_element_cast!(i16, DataType::Int16);
impl_element_cast!(u16, DataType::UInt16);
impl_element_cast!(i32, DataType::Int32);
impl_element_cast!(u32, DataType::UInt32);
impl_element_cast!(f32, DataType::Float32);

impl Element for half::f16 {
    const DATATYPE: DataType = DataType::Float16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl Element for half::bf16 {
    const DATATYPE: DataType = DataType::BFloat16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}

// ============================================================================
// Runtime dispatch
// ============================================================================

/// Bind `$T` to the unsigned integer type with the byte width of `$dt` and
/// evaluate `$body`. Only 1, 2 and 4-byte types have a path; anything else is
/// `UnsupportedDataType`. Used by kernels that move elements without looking
/// at their values.
macro_rules! dispatch_by_width {
    ($dt:expr, $T:ident => $body:expr) => {{
        let datatype: $crate::datatype::DataType = $dt;
        match datatype.size_in_bytes() {
            1 => {
                type $T = u8;
                $body
            }
            2 => {
                type $T = u16;
                $body
            }
            4 => {
                type $T = u32;
                $body
            }
            _ => Err($crate::error::Error::UnsupportedDataType(datatype)),
        }
    }};
}

/// Bind `$T` to the concrete element type of `$dt` and evaluate `$body`.
macro_rules! with_element_type {
    ($dt:expr, $T:ident => $body:expr) => {{
        let datatype: $crate::datatype::DataType = $dt;
        match datatype {
            $crate::datatype::DataType::Int8 => {
                type $T = i8;
                $body
            }
            $crate::datatype::DataType::UInt8 => {
                type $T = u8;
                $body
            }
            $crate::datatype::DataType::Int16 => {
                type $T = i16;
                $body
            }
            $crate::datatype::DataType::UInt16 => {
                type $T = u16;
                $body
            }
            $crate::datatype::DataType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::datatype::DataType::UInt32 => {
                type $T = u32;
                $body
            }
            $crate::datatype::DataType::Float16 => {
                type $T = half::f16;
                $body
            }
            $crate::datatype::DataType::BFloat16 => {
                type $T = half::bf16;
                $body
            }
            $crate::datatype::DataType::Float32 => {
                type $T = f32;
                $body
            }
            other => Err($crate::error::Error::UnsupportedDataType(other)),
        }
    }};
}

pub(crate) use dispatch_by_width;
pub(crate) use with_element_type;
