//! Little-endian field primitives shared by every payload type.
//!
//! Readers work on a `&mut &[u8]` cursor (advanced through [`bytes::Buf`]) and
//! check the remaining length before every read, so a truncated datagram is
//! reported as [`FrameError::MalformedFrame`] instead of panicking.

use bytes::{Buf, BufMut};

use crate::frame::FrameError;

/// Types that can be parsed from a payload cursor.
pub trait WireRead: Sized {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError>;
}

/// Types that can be appended to an outgoing payload.
pub trait WireWrite {
    /// Exact number of bytes `write_to` appends.
    fn wire_len(&self) -> usize;

    fn write_to<B: BufMut>(&self, dst: &mut B);
}

/// Fail with `MalformedFrame` unless `n` bytes remain.
#[inline]
pub fn ensure_remaining(src: &[u8], n: usize, field: &'static str) -> Result<(), FrameError> {
    if src.remaining() < n {
        return Err(FrameError::MalformedFrame { reason: field });
    }
    Ok(())
}

macro_rules! impl_wire_int {
    ($ty:ty, $get:ident, $put:ident) => {
        impl WireRead for $ty {
            #[inline]
            fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
                ensure_remaining(src, size_of::<$ty>(), stringify!($ty))?;
                Ok(src.$get())
            }
        }

        impl WireWrite for $ty {
            #[inline]
            fn wire_len(&self) -> usize {
                size_of::<$ty>()
            }

            #[inline]
            fn write_to<B: BufMut>(&self, dst: &mut B) {
                dst.$put(*self);
            }
        }
    };
}

impl_wire_int!(u8, get_u8, put_u8);
impl_wire_int!(i8, get_i8, put_i8);
impl_wire_int!(u16, get_u16_le, put_u16_le);
impl_wire_int!(i16, get_i16_le, put_i16_le);
impl_wire_int!(u32, get_u32_le, put_u32_le);
impl_wire_int!(i32, get_i32_le, put_i32_le);
impl_wire_int!(f32, get_f32_le, put_f32_le);

impl<const N: usize> WireRead for [u8; N] {
    fn read_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        ensure_remaining(src, N, "byte block")?;
        let mut out = [0u8; N];
        src.copy_to_slice(&mut out);
        Ok(out)
    }
}

impl<const N: usize> WireWrite for [u8; N] {
    fn wire_len(&self) -> usize {
        N
    }

    fn write_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_slice(self);
    }
}
