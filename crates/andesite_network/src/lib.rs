#![doc = include_str!("../README.md")]

pub mod auth;
pub mod client;
pub mod connection;
pub mod crypto;
pub mod debug;
pub mod handshake;
pub mod keep_alive;
pub mod pool;
pub mod reactor;
pub mod router;
pub mod send_handle;

use andesite_protocol::{CodecError, ProtocolState};
use thiserror::Error;

pub use auth::{AuthError, AuthOutcome, AuthRequest, SessionAuthenticator};
pub use client::{Client, ClientSet};
pub use connection::{Connection, ConnectionHandler};
pub use crypto::ServerKeyPair;
pub use debug::PacketLog;
pub use handshake::{Handshake, HandshakeConfig};
pub use keep_alive::KeepAlive;
pub use pool::{PoolConfig, PoolError, TaskHandle, TaskPool};
pub use reactor::{Reactor, ReactorConfig};
pub use router::Router;
pub use send_handle::{SendHandle, SendState};

/// Errors surfaced by the networking layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A well-formed packet arrived in a state where it is not legal, or a
    /// frame violated the protocol in some other way.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("no handler for packet {id:#04x} in state {state:?}")]
    UnknownPacket { id: i32, state: ProtocolState },
    #[error("encryption failure: {0}")]
    Encryption(&'static str),
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The per-connection cap on buffered-but-unsent bytes was exceeded.
    #[error("send queue cap of {cap} bytes exceeded")]
    Backpressure { cap: usize },
    #[error("connection is closed")]
    Disconnected,
    #[error("task pool shut down")]
    PoolShutdown,
}

impl From<PoolError> for NetError {
    fn from(_: PoolError) -> Self {
        NetError::PoolShutdown
    }
}

impl NetError {
    /// The reason string delivered to the peer when this error terminates a
    /// connection.
    pub fn disconnect_reason(&self) -> &'static str {
        match self {
            NetError::Encryption(_) => "Encryption error",
            NetError::Auth(_) => "Authentication failed",
            _ => "Protocol error",
        }
    }
}
