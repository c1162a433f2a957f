//! The server's RSA identity: a keypair generated at startup, exported as
//! ASN.1 DER for the encryption request, used to recover the shared secret
//! and verify token during login.

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

use crate::NetError;

const KEY_BITS: usize = 1024;

pub struct ServerKeyPair {
    key: RsaPrivateKey,
    public_der: Box<[u8]>,
}

impl ServerKeyPair {
    /// Generates a fresh 1024-bit keypair. Done once at server startup.
    pub fn generate() -> Result<Self, NetError> {
        let key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|_| NetError::Encryption("RSA key generation failed"))?;

        let public_der =
            rsa_der::public_key_to_der(&key.n().to_bytes_be(), &key.e().to_bytes_be())
                .into_boxed_slice();

        Ok(Self { key, public_der })
    }

    /// The public half in DER form, as sent to clients during login.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Decrypts a PKCS#1 v1.5 blob produced by a client with our public
    /// key.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, NetError> {
        self.key
            .decrypt(Pkcs1v15Encrypt, data)
            .map_err(|_| NetError::Encryption("RSA decryption failed"))
    }

    #[cfg(test)]
    pub(crate) fn encrypt_for_tests(&self, data: &[u8]) -> Vec<u8> {
        use rsa::RsaPublicKey;

        RsaPublicKey::from(&self.key)
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, data)
            .expect("encryption failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_round_trips_a_secret() {
        let keys = ServerKeyPair::generate().unwrap();

        let secret: [u8; 16] = [
            0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
            0x1e, 0x1f,
        ];

        let encrypted = keys.encrypt_for_tests(&secret);
        assert_ne!(encrypted.as_slice(), secret.as_slice());

        assert_eq!(keys.decrypt(&encrypted).unwrap(), secret);
    }

    #[test]
    fn der_export_is_plausible() {
        let keys = ServerKeyPair::generate().unwrap();

        // 1024-bit keys export to roughly 160 bytes of DER; mostly we care
        // that the SEQUENCE header is present.
        assert_eq!(keys.public_der()[0], 0x30);
        assert!(keys.public_der().len() > 100);
    }
}
