use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncryptMut, BlockSizeUser, KeyIvInit};
use bytes::{BufMut, BytesMut};

use crate::var_int::VarInt;
use crate::{CodecError, CompressionThreshold, Encode, Packet, MAX_PACKET_SIZE};

/// The AES block cipher with a 128 bit key, using the CFB-8 mode of
/// operation.
type Cipher = cfb8::Encryptor<aes::Aes128>;

/// Serializes packets into framed wire bytes, compressing and encrypting as
/// configured.
#[derive(Default)]
pub struct PacketEncoder {
    buf: BytesMut,
    compress_buf: Vec<u8>,
    threshold: CompressionThreshold,
    cipher: Option<Cipher>,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_packet<P>(&mut self, pkt: &P) -> crate::Result<()>
    where
        P: Packet + Encode,
    {
        let start_len = self.buf.len();
        pkt.encode_with_id((&mut self.buf).writer())?;
        self.enframe_from(start_len)
    }

    /// Frames the bytes from `from` to the end of the buffer: prepends the
    /// packet length varint, and under compression also the data length
    /// varint plus the deflated body.
    fn enframe_from(&mut self, from: usize) -> crate::Result<()> {
        let data_len = self.buf.len() - from;

        if self.threshold.is_enabled() {
            use std::io::Read;

            use flate2::bufread::ZlibEncoder;
            use flate2::Compression;

            if data_len > self.threshold.0 as usize {
                let mut z = ZlibEncoder::new(&self.buf[from..], Compression::new(4));

                self.compress_buf.clear();

                let data_len_size = VarInt(data_len as i32).written_size();

                let packet_len = data_len_size + z.read_to_end(&mut self.compress_buf)?;

                if packet_len > MAX_PACKET_SIZE as usize {
                    return Err(CodecError::LengthOverflow);
                }

                drop(z);

                self.buf.truncate(from);

                let mut writer = (&mut self.buf).writer();

                VarInt(packet_len as i32).encode(&mut writer)?;
                VarInt(data_len as i32).encode(&mut writer)?;
                self.buf.extend_from_slice(&self.compress_buf);
            } else {
                let data_len_size = 1;
                let packet_len = data_len_size + data_len;

                if packet_len > MAX_PACKET_SIZE as usize {
                    return Err(CodecError::LengthOverflow);
                }

                let packet_len_size = VarInt(packet_len as i32).written_size();

                let data_prefix_len = packet_len_size + data_len_size;

                self.buf.put_bytes(0, data_prefix_len);
                self.buf
                    .copy_within(from..from + data_len, from + data_prefix_len);

                let mut front = &mut self.buf[from..];

                VarInt(packet_len as i32).encode(&mut front)?;
                // Zero for no compression on this packet.
                VarInt(0).encode(front)?;
            }

            return Ok(());
        }

        let packet_len = data_len;

        if packet_len > MAX_PACKET_SIZE as usize {
            return Err(CodecError::LengthOverflow);
        }

        let packet_len_size = VarInt(packet_len as i32).written_size();

        self.buf.put_bytes(0, packet_len_size);
        self.buf
            .copy_within(from..from + data_len, from + packet_len_size);

        let front = &mut self.buf[from..];
        VarInt(packet_len as i32).encode(front)?;

        Ok(())
    }

    /// Takes all the packets written so far, encrypting them if encryption
    /// is enabled.
    pub fn take(&mut self) -> BytesMut {
        if let Some(cipher) = &mut self.cipher {
            for chunk in self.buf.chunks_mut(Cipher::block_size()) {
                let gen_arr = GenericArray::from_mut_slice(chunk);
                cipher.encrypt_block_mut(gen_arr);
            }
        }

        self.buf.split()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn compression(&self) -> CompressionThreshold {
        self.threshold
    }

    pub fn set_compression(&mut self, threshold: CompressionThreshold) {
        self.threshold = threshold;
    }

    /// Installs the stream cipher. Key and IV are both `key`. All future
    /// packets **and any that have not been [taken](Self::take) yet** are
    /// encrypted.
    ///
    /// # Panics
    ///
    /// Panics if encryption is already enabled.
    pub fn enable_encryption(&mut self, key: &[u8; 16]) {
        assert!(self.cipher.is_none(), "encryption is already enabled");
        self.cipher = Some(Cipher::new_from_slices(key, key).expect("invalid key"));
    }
}
