use crate::packets::packet_group;

packet_group! {
    /// An id of zero marks a client-initiated keep alive, which the server
    /// echoes verbatim. Server-issued ids are random and never zero.
    KeepAliveC2s = 0x00, Serverbound, Play {
        id: i32,
    }

    KeepAliveS2c = 0x00, Clientbound, Play {
        id: i32,
    }

    ChatMessageC2s = 0x01, Serverbound, Play {
        message: String,
    }

    /// Chat display documents are pre-rendered to JSON by the sender.
    ChatMessageS2c = 0x02, Clientbound, Play {
        json: String,
    }

    /// A full column of blocks and biomes. `data` is the zlib-compressed
    /// column payload produced by the world store.
    ColumnDataS2c = 0x21, Clientbound, Play {
        column_x: i32,
        column_z: i32,
        dimension: i8,
        full: bool,
        data: Vec<u8>,
    }

    BlockChangeS2c = 0x23, Clientbound, Play {
        x: i32,
        y: u8,
        z: i32,
        block_id: u16,
        metadata: u8,
    }

    DisconnectS2c = 0x40, Clientbound, Play {
        reason: String,
    }
}
