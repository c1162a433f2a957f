use std::io::Write;

use crate::impls::{cautious_capacity, take};
use crate::{CodecError, Decode, Encode};

/// Fixed-length byte arrays are encoded and decoded without a length prefix.
impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        Ok(w.write_all(self)?)
    }
}

impl<const N: usize> Decode<'_> for [u8; N] {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        Ok(*take::<N>(r)?)
    }
}

impl<'a, const N: usize> Decode<'a> for &'a [u8; N] {
    fn decode(r: &mut &'a [u8]) -> crate::Result<Self> {
        take::<N>(r)
    }
}

/// Slices carry a `u32` big-endian count prefix.
impl<T: Encode> Encode for [T] {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        if self.len() > i32::MAX as usize {
            return Err(CodecError::LengthOverflow);
        }

        (self.len() as u32).encode(&mut w)?;
        T::encode_slice(self, w)
    }
}

impl<'a> Decode<'a> for &'a [u8] {
    fn decode(r: &mut &'a [u8]) -> crate::Result<Self> {
        let len = u32::decode(r)?;
        if len > i32::MAX as u32 {
            return Err(CodecError::LengthOverflow);
        }

        let len = len as usize;
        if len > r.len() {
            return Err(CodecError::InsufficientBytes);
        }

        let (res, remaining) = r.split_at(len);
        *r = remaining;
        Ok(res)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, w: impl Write) -> crate::Result<()> {
        self.as_slice().encode(w)
    }
}

impl<'a, T: Decode<'a>> Decode<'a> for Vec<T> {
    fn decode(r: &mut &'a [u8]) -> crate::Result<Self> {
        let len = u32::decode(r)?;
        if len > i32::MAX as u32 {
            return Err(CodecError::LengthOverflow);
        }

        let len = len as usize;

        // The count is untrusted input. Start from a bounded capacity and
        // let growth be driven by bytes that actually arrived.
        let mut vec = Vec::with_capacity(cautious_capacity::<T>(len));

        for _ in 0..len {
            vec.push(T::decode(r)?);
        }

        Ok(vec)
    }
}
