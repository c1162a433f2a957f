use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use uuid::Uuid;

use crate::impls::take;
use crate::{CodecError, Decode, Encode};

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        match self {
            Some(t) => {
                true.encode(&mut w)?;
                t.encode(w)
            }
            None => false.encode(w),
        }
    }
}

impl<'a, T: Decode<'a>> Decode<'a> for Option<T> {
    fn decode(r: &mut &'a [u8]) -> crate::Result<Self> {
        Ok(if bool::decode(r)? {
            Some(T::decode(r)?)
        } else {
            None
        })
    }
}

impl Encode for Uuid {
    fn encode(&self, w: impl Write) -> crate::Result<()> {
        self.as_u128().encode(w)
    }
}

impl Decode<'_> for Uuid {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        u128::decode(r).map(Uuid::from_u128)
    }
}

/// IP addresses are a one-byte family tag (4 or 6) followed by the raw
/// octets.
impl Encode for IpAddr {
    fn encode(&self, mut w: impl Write) -> crate::Result<()> {
        match self {
            IpAddr::V4(ip) => {
                4_u8.encode(&mut w)?;
                Ok(w.write_all(&ip.octets())?)
            }
            IpAddr::V6(ip) => {
                6_u8.encode(&mut w)?;
                Ok(w.write_all(&ip.octets())?)
            }
        }
    }
}

impl Decode<'_> for IpAddr {
    fn decode(r: &mut &[u8]) -> crate::Result<Self> {
        match u8::decode(r)? {
            4 => Ok(Ipv4Addr::from(*take::<4>(r)?).into()),
            6 => Ok(Ipv6Addr::from(*take::<16>(r)?).into()),
            tag => Err(CodecError::InvalidTag {
                kind: "ip address",
                tag: i32::from(tag),
            }),
        }
    }
}
