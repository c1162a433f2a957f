use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockSizeUser, KeyIvInit};
use bytes::{Buf, BytesMut};

use crate::var_int::{VarInt, VarIntDecodeError};
use crate::{CodecError, CompressionThreshold, Decode, Packet, MAX_PACKET_SIZE};

/// The AES block cipher with a 128 bit key, using the CFB-8 mode of
/// operation.
type Cipher = cfb8::Decryptor<aes::Aes128>;

/// Splits a stream of bytes into packet frames, decrypting and
/// decompressing as configured.
///
/// Bytes are fed in with [`queue_bytes`](Self::queue_bytes) or
/// [`queue_slice`](Self::queue_slice) in arbitrary chunks; complete frames
/// come out of [`try_next_packet`](Self::try_next_packet) in byte order.
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
    decompress_buf: BytesMut,
    threshold: CompressionThreshold,
    cipher: Option<Cipher>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_next_packet(&mut self) -> crate::Result<Option<PacketFrame>> {
        let mut r = &self.buf[..];

        let packet_len = match VarInt::decode_partial(&mut r) {
            Ok(len) => len,
            Err(VarIntDecodeError::Incomplete) => return Ok(None),
            Err(VarIntDecodeError::TooLarge) => return Err(CodecError::LengthOverflow),
        };

        if !(0..=MAX_PACKET_SIZE).contains(&packet_len) {
            return Err(CodecError::LengthOverflow);
        }

        if r.len() < packet_len as usize {
            // Not enough data arrived yet.
            return Ok(None);
        }

        let packet_len_len = VarInt(packet_len).written_size();

        let mut data;

        if self.threshold.is_enabled() {
            use std::io::Write;

            use bytes::BufMut;
            use flate2::write::ZlibDecoder;

            r = &r[..packet_len as usize];

            let data_len = VarInt::decode(&mut r)?.0;

            if !(0..MAX_PACKET_SIZE).contains(&data_len) {
                return Err(CodecError::LengthOverflow);
            }

            // A data length of zero means the body was below the threshold
            // and is not compressed.
            if data_len > 0 {
                self.decompress_buf.clear();
                self.decompress_buf.put_bytes(0, data_len as usize);

                let mut z = ZlibDecoder::new(&mut self.decompress_buf[..]);

                z.write_all(r)?;

                if !z.finish()?.is_empty() {
                    // The payload inflated to less than the claimed length.
                    return Err(CodecError::InsufficientBytes);
                }

                self.buf.advance(packet_len_len + packet_len as usize);

                data = self.decompress_buf.split();
            } else {
                let remaining_len = r.len();

                self.buf.advance(packet_len_len + 1);

                data = self.buf.split_to(remaining_len);
            }
        } else {
            self.buf.advance(packet_len_len);
            data = self.buf.split_to(packet_len as usize);
        }

        // Decode the leading packet ID.
        let mut body = &data[..];
        let packet_id = VarInt::decode(&mut body)?.0;

        data.advance(data.len() - body.len());

        Ok(Some(PacketFrame {
            id: packet_id,
            body: data,
        }))
    }

    pub fn compression(&self) -> CompressionThreshold {
        self.threshold
    }

    pub fn set_compression(&mut self, threshold: CompressionThreshold) {
        self.threshold = threshold;
    }

    /// Installs the stream cipher. Key and IV are both `key`.
    ///
    /// Data already queued but not yet framed is decrypted immediately, so
    /// it is safe to enable encryption while the peer's first encrypted
    /// bytes are already buffered.
    ///
    /// # Panics
    ///
    /// Panics if encryption is already enabled.
    pub fn enable_encryption(&mut self, key: &[u8; 16]) {
        assert!(self.cipher.is_none(), "encryption is already enabled");

        let mut cipher = Cipher::new_from_slices(key, key).expect("invalid key");

        Self::decrypt_bytes(&mut cipher, &mut self.buf);

        self.cipher = Some(cipher);
    }

    /// Decrypts the provided byte slice in place using the cipher, without
    /// consuming the cipher.
    fn decrypt_bytes(cipher: &mut Cipher, bytes: &mut [u8]) {
        for chunk in bytes.chunks_mut(Cipher::block_size()) {
            let gen_arr = GenericArray::from_mut_slice(chunk);
            cipher.decrypt_block_mut(gen_arr);
        }
    }

    pub fn queue_bytes(&mut self, mut bytes: BytesMut) {
        if let Some(cipher) = &mut self.cipher {
            Self::decrypt_bytes(cipher, &mut bytes);
        }

        self.buf.unsplit(bytes);
    }

    pub fn queue_slice(&mut self, bytes: &[u8]) {
        let len = self.buf.len();

        self.buf.extend_from_slice(bytes);

        if let Some(cipher) = &mut self.cipher {
            Self::decrypt_bytes(cipher, &mut self.buf[len..]);
        }
    }

    pub fn take_capacity(&mut self) -> BytesMut {
        self.buf.split_off(self.buf.len())
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }
}

/// A framed packet: the leading VarInt ID plus the undecoded body.
#[derive(Clone, Debug)]
pub struct PacketFrame {
    pub id: i32,
    pub body: BytesMut,
}

impl PacketFrame {
    /// Attempts to decode this frame as type `P`. Fails if the packet ID
    /// does not match, the body fails to decode, or input is left over.
    pub fn decode<'a, P>(&'a self) -> crate::Result<P>
    where
        P: Packet + Decode<'a>,
    {
        if P::ID != self.id {
            return Err(CodecError::IdMismatch {
                expected: P::ID,
                actual: self.id,
            });
        }

        let mut r = &self.body[..];

        let pkt = P::decode(&mut r)?;

        if !r.is_empty() {
            return Err(CodecError::TrailingBytes(r.len()));
        }

        Ok(pkt)
    }
}
