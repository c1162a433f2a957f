use uuid::Uuid;

use crate::packets::packet_group;

packet_group! {
    LoginStartC2s = 0x00, Serverbound, Login {
        username: String,
    }

    /// Both blobs are RSA-encrypted under the server's public key.
    EncryptionResponseC2s = 0x01, Serverbound, Login {
        shared_secret: Vec<u8>,
        verify_token: Vec<u8>,
    }

    LoginDisconnectS2c = 0x00, Clientbound, Login {
        reason: String,
    }

    /// Opens the encryption handshake. `public_key` is the server's RSA
    /// public key in ASN.1 DER form; `verify_token` is a fresh random blob
    /// the client must echo back encrypted.
    EncryptionRequestS2c = 0x01, Clientbound, Login {
        server_id: String,
        public_key: Vec<u8>,
        verify_token: Vec<u8>,
    }

    /// Sent under the newly installed cipher; the first encrypted packet of
    /// the session.
    LoginSuccessS2c = 0x02, Clientbound, Login {
        uuid: Uuid,
        username: String,
    }
}
