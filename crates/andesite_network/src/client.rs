//! The per-connection protocol layer: protocol state, the cipher pair, and
//! packet-granular send/receive on top of the raw connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use andesite_protocol::packets::login::LoginDisconnectS2c;
use andesite_protocol::packets::play::DisconnectS2c;
use andesite_protocol::{
    CodecError, Encode, Packet, PacketDecoder, PacketEncoder, PacketFrame, PacketSide,
    ProtocolState,
};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;
use uuid::Uuid;

use crate::connection::Connection;
use crate::debug::PacketLog;
use crate::send_handle::SendHandle;
use crate::NetError;

/// Progress through the login flow. Tracked per client so packets arriving
/// out of order are protocol errors rather than surprises.
pub(crate) enum LoginStage {
    AwaitingStart,
    AwaitingResponse {
        server_id: String,
        verify_token: [u8; 4],
    },
    Complete,
}

pub(crate) struct KeepAliveStatus {
    pub(crate) waiting: bool,
    pub(crate) id: i32,
    pub(crate) sent_at: Instant,
}

/// A client on a connection. Cheap to clone; clones share state.
///
/// Protocol state moves monotonically `Handshaking -> (Status | Login ->
/// Play)`. Once the cipher pair is installed it is never removed.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    conn: Arc<Connection>,
    // Lock order is state, then encoder, then decoder.
    state: Mutex<ProtocolState>,
    enc: Mutex<PacketEncoder>,
    dec: Mutex<PacketDecoder>,
    username: Mutex<Option<String>>,
    uuid: Mutex<Option<Uuid>>,
    last_active: Mutex<Instant>,
    connected_at: Instant,
    ping_ms: AtomicU32,
    login: Mutex<LoginStage>,
    keep_alive: Mutex<KeepAliveStatus>,
    packet_log: Arc<PacketLog>,
}

impl Client {
    pub fn new(conn: Arc<Connection>, packet_log: Arc<PacketLog>) -> Self {
        let now = Instant::now();

        Self {
            inner: Arc::new(ClientInner {
                conn,
                state: Mutex::new(ProtocolState::Handshaking),
                enc: Mutex::new(PacketEncoder::new()),
                dec: Mutex::new(PacketDecoder::new()),
                username: Mutex::new(None),
                uuid: Mutex::new(None),
                last_active: Mutex::new(now),
                connected_at: now,
                ping_ms: AtomicU32::new(0),
                login: Mutex::new(LoginStage::AwaitingStart),
                keep_alive: Mutex::new(KeepAliveStatus {
                    waiting: false,
                    id: 0,
                    sent_at: now,
                }),
                packet_log,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.conn.id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.inner.conn
    }

    pub fn state(&self) -> ProtocolState {
        *self.inner.state.lock()
    }

    /// Advances the protocol state. Transitions are monotone; anything
    /// else is a protocol violation.
    pub fn set_state(&self, new: ProtocolState) -> Result<(), NetError> {
        let mut state = self.inner.state.lock();

        let legal = matches!(
            (*state, new),
            (ProtocolState::Handshaking, ProtocolState::Status)
                | (ProtocolState::Handshaking, ProtocolState::Login)
                | (ProtocolState::Login, ProtocolState::Play)
        );

        if !legal {
            return Err(NetError::Protocol("illegal protocol state transition"));
        }

        *state = new;
        Ok(())
    }

    pub fn username(&self) -> Option<String> {
        self.inner.username.lock().clone()
    }

    pub fn set_username(&self, username: &str) {
        *self.inner.username.lock() = Some(username.into());
    }

    pub fn uuid(&self) -> Option<Uuid> {
        *self.inner.uuid.lock()
    }

    pub fn set_uuid(&self, uuid: Uuid) {
        *self.inner.uuid.lock() = Some(uuid);
    }

    /// Round-trip time as measured by keep-alives, in milliseconds.
    pub fn ping_ms(&self) -> u32 {
        self.inner.ping_ms.load(Ordering::Relaxed)
    }

    pub fn set_ping_ms(&self, ping: u32) {
        self.inner.ping_ms.store(ping, Ordering::Relaxed);
    }

    /// Milliseconds since the last byte was received from this client.
    pub fn inactive_ms(&self) -> u64 {
        self.inner.last_active.lock().elapsed().as_millis() as u64
    }

    pub fn connected_ms(&self) -> u64 {
        self.inner.connected_at.elapsed().as_millis() as u64
    }

    /// Records activity. Called on every receive.
    pub fn touch(&self) {
        *self.inner.last_active.lock() = Instant::now();
    }

    /// Serializes and sends a packet, encrypting under the current cipher.
    pub fn send<P>(&self, pkt: &P) -> Result<SendHandle, NetError>
    where
        P: Packet + Encode,
    {
        if self
            .inner
            .packet_log
            .enabled(P::ID, P::STATE, PacketSide::Clientbound)
        {
            debug!(
                packet = P::NAME,
                to = %self.inner.conn.remote_addr(),
                "clientbound: {pkt:?}"
            );
        }

        let mut enc = self.inner.enc.lock();
        enc.append_packet(pkt)?;
        let bytes = enc.take();

        // The connection send stays under the encoder lock so concurrent
        // sends cannot interleave between encryption and enqueue.
        self.inner.conn.send(bytes)
    }

    /// Feeds received bytes through the cipher and framer, yielding every
    /// complete frame in byte order.
    pub fn receive(&self, bytes: &[u8]) -> Result<Vec<PacketFrame>, CodecError> {
        self.touch();

        let mut dec = self.inner.dec.lock();
        dec.queue_slice(bytes);

        let mut frames = Vec::new();
        while let Some(frame) = dec.try_next_packet()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// The indivisible regime change of the login handshake: installs the
    /// cipher pair, sends `reply` as the first packet of the new regime,
    /// advances the protocol state, then invokes `then`.
    ///
    /// Both cipher locks are held across the change, so no byte sent
    /// before `reply` is encrypted under the new cipher and no byte
    /// received after it is interpreted under the old one.
    pub fn atomic<P>(
        &self,
        reply: &P,
        key: &[u8; 16],
        new_state: ProtocolState,
        then: impl FnOnce(),
    ) -> Result<SendHandle, NetError>
    where
        P: Packet + Encode,
    {
        let handle = {
            let mut state = self.inner.state.lock();
            let mut enc = self.inner.enc.lock();
            let mut dec = self.inner.dec.lock();

            enc.enable_encryption(key);
            dec.enable_encryption(key);

            enc.append_packet(reply)?;
            let bytes = enc.take();
            let handle = self.inner.conn.send(bytes)?;

            *state = new_state;
            handle
        };

        then();

        Ok(handle)
    }

    /// Sends the state-appropriate disconnect packet (best effort) and
    /// closes the connection with `reason`.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let reason = reason.into();

        if self.inner.conn.is_shutdown() {
            return;
        }

        match self.state() {
            ProtocolState::Play => {
                let json = serde_json::json!({ "text": reason }).to_string();
                let _ = self.send(&DisconnectS2c { reason: json });
            }
            ProtocolState::Login => {
                let _ = self.send(&LoginDisconnectS2c {
                    reason: reason.clone(),
                });
            }
            _ => {}
        }

        self.inner.conn.disconnect(reason);
    }

    pub(crate) fn login_stage(&self) -> &Mutex<LoginStage> {
        &self.inner.login
    }

    pub(crate) fn keep_alive(&self) -> &Mutex<KeepAliveStatus> {
        &self.inner.keep_alive
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id())
            .field("remote", &self.inner.conn.remote_addr())
            .field("state", &self.state())
            .field("username", &self.username())
            .finish()
    }
}

/// The set of live clients, keyed by connection id.
#[derive(Default)]
pub struct ClientSet {
    clients: RwLock<FxHashMap<u64, Client>>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Client) {
        self.clients.write().insert(client.id(), client);
    }

    pub fn remove(&self, id: u64) -> Option<Client> {
        self.clients.write().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Client> {
        self.clients.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// A point-in-time copy of every client, for iteration without holding
    /// the registry lock.
    pub fn snapshot(&self) -> Vec<Client> {
        self.clients.read().values().cloned().collect()
    }
}
