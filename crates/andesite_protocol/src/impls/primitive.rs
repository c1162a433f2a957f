use std::io::Write;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{CodecError, Decode, Encode};

impl Encode for u8 {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        Ok(w.write_u8(*self)?)
    }

    fn encode_slice(slice: &[u8], mut w: impl Write) -> crate::Result<()> {
        Ok(w.write_all(slice)?)
    }
}

impl Decode<'_> for u8 {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        r.read_u8().map_err(|_| CodecError::InsufficientBytes)
    }
}

impl Encode for i8 {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        Ok(w.write_i8(*self)?)
    }
}

impl Decode<'_> for i8 {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        r.read_i8().map_err(|_| CodecError::InsufficientBytes)
    }
}

impl Encode for bool {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        Ok(w.write_u8(u8::from(*self))?)
    }
}

impl Decode<'_> for bool {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        match u8::decode(r)? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(CodecError::InvalidBoolean(n)),
        }
    }
}

/// All multi-byte integers and floats are big-endian and fixed-width.
macro_rules! impl_primitive {
    ($($ty:ty => $read:ident / $write:ident,)*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, mut w: impl Write) -> crate::Result<()> {
                    Ok(w.$write::<BigEndian>(*self)?)
                }
            }

            impl Decode<'_> for $ty {
                fn decode(r: &mut &[u8]) -> crate::Result<Self> {
                    r.$read::<BigEndian>().map_err(|_| CodecError::InsufficientBytes)
                }
            }
        )*
    };
}

impl_primitive! {
    u16 => read_u16 / write_u16,
    i16 => read_i16 / write_i16,
    u32 => read_u32 / write_u32,
    i32 => read_i32 / write_i32,
    u64 => read_u64 / write_u64,
    i64 => read_i64 / write_i64,
    u128 => read_u128 / write_u128,
    i128 => read_i128 / write_i128,
    f32 => read_f32 / write_f32,
    f64 => read_f64 / write_f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn round_trip<T>(value: T)
    where
        T: Encode + for<'a> Decode<'a> + PartialEq + std::fmt::Debug,
    {
        let mut buf = vec![];
        value.encode(&mut buf).unwrap();

        let mut r = buf.as_slice();
        assert_eq!(T::decode(&mut r).unwrap(), value);
        assert!(r.is_empty());
    }

    #[test]
    fn integers_round_trip() {
        round_trip(0xab_u8);
        round_trip(-100_i8);
        round_trip(0xabcd_u16);
        round_trip(i16::MIN);
        round_trip(0xdead_beef_u32);
        round_trip(i32::MIN);
        round_trip(u64::MAX);
        round_trip(i64::MIN);
        round_trip(u128::MAX);
        round_trip(-1.5_f32);
        round_trip(std::f64::consts::PI);
    }

    #[test]
    fn integers_are_big_endian() {
        let mut buf = vec![];
        0x0102_0304_u32.encode(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn bool_rejects_junk_bytes() {
        round_trip(true);
        round_trip(false);

        for b in 2..=u8::MAX {
            let mut r: &[u8] = &[b];
            assert!(matches!(
                bool::decode(&mut r),
                Err(CodecError::InvalidBoolean(n)) if n == b
            ));
        }
    }

    #[test]
    fn short_input_fails_cleanly() {
        let mut r: &[u8] = &[1, 2, 3];
        assert!(matches!(
            u32::decode(&mut r),
            Err(CodecError::InsufficientBytes)
        ));
    }
}
