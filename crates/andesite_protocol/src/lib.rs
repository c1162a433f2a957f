#![doc = include_str!("../README.md")]

pub mod decode;
pub mod encode;
mod error;
mod impls;
pub mod packets;
pub mod var_int;

use std::io::Write;

pub use bytes;
pub use decode::{PacketDecoder, PacketFrame};
pub use encode::PacketEncoder;
pub use error::CodecError;
pub use var_int::VarInt;

/// The maximum number of bytes in a single packet frame.
pub const MAX_PACKET_SIZE: i32 = 2097152;

/// The protocol version this library speaks.
pub const PROTOCOL_VERSION: i32 = 4;

/// The stringified game version corresponding to [`PROTOCOL_VERSION`].
pub const GAME_VERSION: &str = "1.7.2";

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, CodecError>;

/// How large a packet body must be before the encoder compresses it.
///
/// If the inner value is >= 0, then packets with encoded lengths >= to this
/// value are compressed. If the value is negative, compression is disabled.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CompressionThreshold(pub i32);

impl CompressionThreshold {
    /// No compression.
    pub const DEFAULT: Self = Self(-1);

    pub fn is_enabled(self) -> bool {
        self.0 >= 0
    }
}

impl Default for CompressionThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for CompressionThreshold {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// The `Encode` trait allows objects to be written to the wire. It is the
/// inverse of [`Decode`].
///
/// Successful calls to [`encode`](Encode::encode) must always decode back to
/// an equal value using the data that was written, consuming exactly the
/// bytes that were produced.
pub trait Encode {
    /// Writes this object to the provided writer.
    fn encode(&self, w: impl Write) -> Result<()>;

    /// Like [`Encode::encode`], except that a whole slice of values is
    /// encoded with no leading length prefix.
    ///
    /// This exists so that `u8` slices can be written in a single
    /// [`write_all`](Write::write_all) call instead of one call per byte.
    fn encode_slice(slice: &[Self], mut w: impl Write) -> Result<()>
    where
        Self: Sized,
    {
        for value in slice {
            value.encode(&mut w)?;
        }

        Ok(())
    }
}

/// The `Decode` trait allows objects to be read from the wire. It is the
/// inverse of [`Encode`].
///
/// `Decode` is parameterized by a lifetime so decoded values may borrow from
/// the input slice.
pub trait Decode<'a>: Sized {
    /// Reads this object from the provided byte slice, shrinking the slice
    /// from the front as bytes are consumed.
    fn decode(r: &mut &'a [u8]) -> Result<Self>;
}

/// Types considered to be complete protocol packets.
///
/// In serialized form, a packet begins with a [`VarInt`] packet ID followed
/// by the body. The [`Encode`] and [`Decode`] implementations on `Self`
/// handle only the body.
pub trait Packet: std::fmt::Debug {
    /// The leading VarInt ID of this packet.
    const ID: i32;
    /// The name of this packet for debugging purposes.
    const NAME: &'static str;
    /// The side this packet is intended for.
    const SIDE: PacketSide;
    /// The protocol state in which this packet is used.
    const STATE: ProtocolState;

    /// Encodes this packet's VarInt ID first, followed by the packet's body.
    fn encode_with_id(&self, mut w: impl Write) -> Result<()>
    where
        Self: Encode,
    {
        VarInt(Self::ID).encode(&mut w)?;
        self.encode(w)
    }
}

/// The side a packet is intended for.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PacketSide {
    /// Server -> Client
    Clientbound,
    /// Client -> Server
    Serverbound,
}

/// The four protocol states of a client connection.
///
/// Transitions are monotone: `Handshaking` leads to either `Status` or
/// `Login`, and `Login` leads to `Play`. Only `Play` carries gameplay
/// packets.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ProtocolState {
    Handshaking,
    Status,
    Login,
    Play,
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rand::{thread_rng, Rng};

    use super::*;
    use crate::packets::login::EncryptionRequestS2c;
    use crate::packets::play::{ChatMessageS2c, ColumnDataS2c};

    const CRYPT_KEY: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

    fn test_packet(tag: &str) -> ColumnDataS2c {
        ColumnDataS2c {
            column_x: -42,
            column_z: 17,
            dimension: -1,
            full: true,
            data: tag.as_bytes().to_vec(),
        }
    }

    fn check_test_packet(dec: &mut PacketDecoder, tag: &str) {
        let frame = dec.try_next_packet().unwrap().unwrap();

        let pkt = frame.decode::<ColumnDataS2c>().unwrap();

        assert_eq!(pkt, test_packet(tag));
    }

    #[test]
    fn packets_round_trip() {
        let mut buf = BytesMut::new();

        let mut enc = PacketEncoder::new();

        enc.append_packet(&test_packet("first")).unwrap();
        enc.set_compression(0.into());
        enc.append_packet(&test_packet("second")).unwrap();
        buf.unsplit(enc.take());
        enc.enable_encryption(&CRYPT_KEY);
        enc.append_packet(&test_packet("third")).unwrap();

        buf.unsplit(enc.take());

        let mut dec = PacketDecoder::new();

        dec.queue_bytes(buf);

        check_test_packet(&mut dec, "first");

        dec.set_compression(0.into());

        check_test_packet(&mut dec, "second");

        dec.enable_encryption(&CRYPT_KEY);

        check_test_packet(&mut dec, "third");
    }

    /// A serialized packet split into arbitrary chunks must come out of the
    /// decoder as exactly one frame with identical contents.
    #[test]
    fn frame_survives_arbitrary_chunking() {
        let pkt = EncryptionRequestS2c {
            server_id: "A1B2C3".into(),
            public_key: (0..162).collect(),
            verify_token: vec![1, 2, 3, 4],
        };

        let mut enc = PacketEncoder::new();
        enc.append_packet(&pkt).unwrap();
        let bytes = enc.take();

        let mut rng = thread_rng();

        for _ in 0..100 {
            let mut dec = PacketDecoder::new();
            let mut fed = 0;

            let mut frames = vec![];

            while fed < bytes.len() {
                let chunk = rng.gen_range(1..=bytes.len() - fed);
                dec.queue_slice(&bytes[fed..fed + chunk]);
                fed += chunk;

                while let Some(frame) = dec.try_next_packet().unwrap() {
                    frames.push(frame);
                }
            }

            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].decode::<EncryptionRequestS2c>().unwrap(), pkt);
        }
    }

    /// Encrypt and decrypt streams keyed with the same 16 bytes must
    /// compose to the identity over a continuous stream.
    #[test]
    fn cipher_symmetry() {
        let mut rng = thread_rng();
        let key: [u8; 16] = rng.gen();

        let mut enc = PacketEncoder::new();
        let mut dec = PacketDecoder::new();
        enc.enable_encryption(&key);
        dec.enable_encryption(&key);

        let mut ciphertext = BytesMut::new();
        let mut cleartext = vec![];

        for _ in 0..32 {
            let chunk: Vec<u8> = (0..rng.gen_range(1..512)).map(|_| rng.gen()).collect();

            let pkt = ChatMessageS2c {
                json: String::from_utf8_lossy(&chunk).into_owned(),
            };

            cleartext.push(pkt.clone());
            enc.append_packet(&pkt).unwrap();
            ciphertext.unsplit(enc.take());
        }

        dec.queue_bytes(ciphertext);

        for expected in &cleartext {
            let frame = dec.try_next_packet().unwrap().unwrap();
            assert_eq!(&frame.decode::<ChatMessageS2c>().unwrap(), expected);
        }
    }

    #[test]
    fn unknown_frame_id_is_reported() {
        let mut enc = PacketEncoder::new();
        enc.append_packet(&test_packet("x")).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_bytes(enc.take());

        let frame = dec.try_next_packet().unwrap().unwrap();
        assert!(matches!(
            frame.decode::<ChatMessageS2c>(),
            Err(CodecError::IdMismatch { .. })
        ));
    }
}
