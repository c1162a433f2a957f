use crate::packets::packet_group;

/// The value of [`HandshakeC2s::next_state`] requesting the status flow.
pub const NEXT_STATE_STATUS: u8 = 1;
/// The value of [`HandshakeC2s::next_state`] requesting the login flow.
pub const NEXT_STATE_LOGIN: u8 = 2;

packet_group! {
    /// The first packet on every connection. Chooses between the status
    /// and login flows.
    HandshakeC2s = 0x00, Serverbound, Handshaking {
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        next_state: u8,
    }
}
