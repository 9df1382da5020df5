//! Typed stream adapter over the ring buffer
//!
//! `ByteStream` pushes and pops trivially copyable values as raw bytes:
//! `size_of::<T>()` bytes per scalar, host endianness, 1-byte alignment on
//! the wire. Strings travel as their bare byte contents; length framing is
//! the caller's responsibility.

use std::mem::{size_of, MaybeUninit};
use std::ops::Deref;
use std::slice;
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::ring_buffer::{RingBuffer, RingError};

/// Errors from the typed adapter.
#[derive(Debug, Error)]
pub enum ByteStreamError {
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("stored bytes are not valid UTF-8")]
    Utf8(#[from] FromUtf8Error),
}

/// Marker for types whose values are plain bytes: no padding, no niches,
/// every bit pattern valid.
///
/// # Safety
///
/// Implementors guarantee that transmuting any `size_of::<Self>()` bytes
/// into `Self` is defined behavior. The provided impls cover the primitive
/// numeric types and arrays of them; do not implement this for types with
/// invalid bit patterns (`bool`, `char`, enums, references).
pub unsafe trait Plain: Copy {}

macro_rules! impl_plain {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl Plain for $t {})*
    };
}

impl_plain!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, isize, f32, f64);

unsafe impl<T: Plain, const N: usize> Plain for [T; N] {}

/// Zero-allocation typed read/write over a [`RingBuffer`].
///
/// Derefs to the inner buffer, so all raw-byte operations remain available.
pub struct ByteStream {
    ring: RingBuffer,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
        }
    }

    /// Append one value as raw bytes.
    pub fn push<T: Plain>(&self, value: T) -> Result<usize, RingError> {
        let bytes =
            unsafe { slice::from_raw_parts(&value as *const T as *const u8, size_of::<T>()) };
        self.ring.write(bytes)
    }

    /// Remove and return one value.
    pub fn pop<T: Plain>(&self) -> Result<T, RingError> {
        let mut value = MaybeUninit::<T>::uninit();
        let dst = unsafe {
            slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, size_of::<T>())
        };
        self.ring.read_into(dst)?;
        // Plain: any bit pattern is a valid T, and all bytes were filled.
        Ok(unsafe { value.assume_init() })
    }

    /// Append `values.len() * size_of::<T>()` raw bytes.
    pub fn push_slice<T: Plain>(&self, values: &[T]) -> Result<usize, RingError> {
        let bytes = unsafe {
            slice::from_raw_parts(values.as_ptr() as *const u8, std::mem::size_of_val(values))
        };
        self.ring.write(bytes)
    }

    /// Remove `count` values.
    pub fn pop_vec<T: Plain>(&self, count: usize) -> Result<Vec<T>, RingError> {
        let byte_len = count * size_of::<T>();
        let mut values: Vec<T> = Vec::with_capacity(count);
        let dst =
            unsafe { slice::from_raw_parts_mut(values.as_mut_ptr() as *mut u8, byte_len) };
        self.ring.read_into(dst)?;
        unsafe { values.set_len(count) };
        Ok(values)
    }

    /// Append the string's byte contents, without any length prefix.
    pub fn push_str(&self, value: &str) -> Result<usize, RingError> {
        self.ring.write(value.as_bytes())
    }

    /// Remove `len` bytes and decode them as UTF-8.
    pub fn pop_string(&self, len: usize) -> Result<String, ByteStreamError> {
        let bytes = self.ring.read(len)?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl Deref for ByteStream {
    type Target = RingBuffer;

    fn deref(&self) -> &RingBuffer {
        &self.ring
    }
}
