//! Endian-aware, bounds-checked reading of primitive values from byte buffers.
//!
//! Every value the heap inspector decodes passes through these helpers: raw bytes are fetched
//! from the target through [`crate::runtime::MemoryReader`] and then interpreted here. The
//! [`HeapIO`] trait abstracts over the fixed-size integer and floating point types, and the
//! `read_*` functions report [`crate::Error::OutOfBounds`] instead of panicking when a buffer is
//! too short.
//!
//! # Examples
//!
//! ```rust
//! use heapscope::memory::{read_le, read_le_at};
//!
//! let data = [0x7F, 0x00, 0x00, 0x01, 0x50, 0x00];
//! let address: u32 = read_le(&data)?;
//! assert_eq!(address, 0x0100_007F);
//!
//! let mut offset = 4;
//! let port: u16 = read_le_at(&data, &mut offset)?;
//! assert_eq!(port, 80);
//! assert_eq!(offset, 6);
//! # Ok::<(), heapscope::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe binary data reading operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait HeapIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_heap_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HeapIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }
            }
        )*
    };
}

impl_heap_io!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: HeapIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing the offset
/// by the size of `T`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: HeapIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Safely reads a value of type `T` in big-endian byte order from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be<T: HeapIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Safely reads a value of type `T` in big-endian byte order at `offset`, advancing the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: HeapIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Reads a pointer-sized little-endian value, widening 32-bit pointers to `u64`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes, or
/// [`crate::Error::Malformed`] for a pointer size other than 4 or 8.
pub fn read_pointer_le(data: &[u8], pointer_size: usize) -> Result<u64> {
    match pointer_size {
        4 => Ok(u64::from(read_le::<u32>(data)?)),
        8 => read_le::<u64>(data),
        other => Err(malformed_error!("Unsupported pointer size {}", other)),
    }
}
