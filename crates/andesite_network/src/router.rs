//! Dispatch of serverbound frames to handlers keyed by packet id and
//! protocol state.

use std::sync::Arc;

use andesite_protocol::{PacketFrame, PacketSide, ProtocolState};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::client::Client;
use crate::debug::PacketLog;
use crate::NetError;

pub type Handler = Arc<dyn Fn(&Client, &PacketFrame) -> Result<(), NetError> + Send + Sync>;

/// Routes each frame by `(packet id, protocol state)`. Unknown
/// combinations disconnect the client with a protocol-error reason;
/// handler failures disconnect with the error's reason string.
pub struct Router {
    handlers: RwLock<FxHashMap<(i32, ProtocolState), Handler>>,
    log: Arc<PacketLog>,
}

impl Router {
    pub fn new(log: Arc<PacketLog>) -> Self {
        Self {
            handlers: RwLock::new(FxHashMap::default()),
            log,
        }
    }

    pub fn set_handler(
        &self,
        id: i32,
        state: ProtocolState,
        handler: impl Fn(&Client, &PacketFrame) -> Result<(), NetError> + Send + Sync + 'static,
    ) {
        self.handlers
            .write()
            .insert((id, state), Arc::new(handler));
    }

    pub fn clear_handler(&self, id: i32, state: ProtocolState) {
        self.handlers.write().remove(&(id, state));
    }

    /// Dispatches one frame under the client's current protocol state.
    /// Runs on a task-pool worker.
    pub fn dispatch(&self, client: &Client, frame: &PacketFrame) {
        let state = client.state();

        if self.log.enabled(frame.id, state, PacketSide::Serverbound) {
            debug!(
                id = format_args!("{:#04x}", frame.id),
                ?state,
                from = %client.connection().remote_addr(),
                "serverbound packet ({} bytes)",
                frame.body.len()
            );
        }

        let handler = self.handlers.read().get(&(frame.id, state)).cloned();

        match handler {
            Some(handler) => {
                if let Err(e) = handler(client, frame) {
                    warn!("handler for packet {:#04x} failed: {e}", frame.id);
                    client.disconnect(e.disconnect_reason());
                }
            }
            None => {
                let e = NetError::UnknownPacket { id: frame.id, state };
                warn!("client {}: {e}", client.id());
                client.disconnect(e.disconnect_reason());
            }
        }
    }
}
