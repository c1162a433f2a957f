use std::io::Write;

use crate::{CodecError, Decode, Encode};

/// Strings carry a `u32` big-endian byte-length prefix followed by UTF-8.
impl Encode for str {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        if self.len() > i32::MAX as usize {
            return Err(CodecError::LengthOverflow);
        }

        (self.len() as u32).encode(&mut w)?;
        Ok(w.write_all(self.as_bytes())?)
    }
}

impl<'a> Decode<'a> for &'a str {
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
        let res = std::str::from_utf8(res)?;
        *r = remaining;

        Ok(res)
    }
}

impl Encode for String {
    fn encode(&self, w: impl Write) -> crate::Result<()> {
        self.as_str().encode(w)
    }
}

impl Decode<'_> for String {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        Ok(<&str>::decode(r)?.into())
    }
}

impl Decode<'_> for Box<str> {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        Ok(<&str>::decode(r)?.into())
    }
}
