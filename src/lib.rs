#![doc = include_str!("../README.md")]

pub use andesite_network as network;
pub use andesite_protocol as protocol;
pub use andesite_server as server;
pub use andesite_server_common as server_common;
pub use andesite_world as world;

/// The most commonly used items from every crate in the workspace.
pub mod prelude {
    pub use andesite_network::{
        Client, ClientSet, Connection, NetError, Reactor, ReactorConfig, Router, SendHandle,
        SendState, SessionAuthenticator, TaskPool,
    };
    pub use andesite_protocol::{
        CodecError, Decode, Encode, Packet, PacketDecoder, PacketEncoder, ProtocolState,
    };
    pub use andesite_server::{ChatMessage, Command, Module, Server, ServerConfig};
    pub use andesite_server_common::{DataProvider, LogLevel, Settings};
    pub use andesite_world::{
        AccessStrategy, Block, BlockId, ColumnId, World, WorldHandle, WorldLockRequest,
        WriteStrategy,
    };
}
