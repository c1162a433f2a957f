use crate::packets::packet_group;

packet_group! {
    StatusRequestC2s = 0x00, Serverbound, Status {}

    /// Carries the server-list description as a JSON document.
    StatusResponseS2c = 0x00, Clientbound, Status {
        json: String,
    }

    PingC2s = 0x01, Serverbound, Status {
        payload: i64,
    }

    PongS2c = 0x01, Clientbound, Status {
        payload: i64,
    }
}
