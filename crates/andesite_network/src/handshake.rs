//! The handshake state machine: status queries, and the login flow that
//! carries a connection from plaintext into authenticated, encrypted play.
//!
//! State transitions (server authoritative):
//!
//! | From        | Trigger packet     | To       |
//! |-------------|--------------------|----------|
//! | Handshaking | Handshake{next=1}  | Status   |
//! | Handshaking | Handshake{next=2}  | Login    |
//! | Status      | StatusRequest      | Status   |
//! | Status      | Ping               | (closed) |
//! | Login       | LoginStart         | Login    |
//! | Login       | EncryptionResponse | Play     |
//!
//! Any packet arriving in an unexpected state disconnects the client with
//! "Protocol error".

use std::sync::Arc;

use andesite_protocol::packets::handshaking::{HandshakeC2s, NEXT_STATE_LOGIN, NEXT_STATE_STATUS};
use andesite_protocol::packets::login::{
    EncryptionRequestS2c, EncryptionResponseC2s, LoginStartC2s, LoginSuccessS2c,
};
use andesite_protocol::packets::status::{PingC2s, PongS2c, StatusRequestC2s, StatusResponseS2c};
use andesite_protocol::{Packet, ProtocolState};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::runtime::Handle;
use tracing::{info, trace};

use crate::auth::{AuthRequest, SessionAuthenticator};
use crate::client::{Client, LoginStage};
use crate::crypto::ServerKeyPair;
use crate::router::Router;
use crate::NetError;

/// Builds the server-list description document for a status query.
pub type StatusFn = Arc<dyn Fn(&Client) -> serde_json::Value + Send + Sync>;
/// Invoked after a client completes login and enters play.
pub type LoginFn = Arc<dyn Fn(&Client) + Send + Sync>;

pub struct HandshakeConfig {
    pub authenticator: Arc<dyn SessionAuthenticator>,
    pub status: StatusFn,
    pub on_login: LoginFn,
}

/// Owns the server keypair and implements the packet handlers of the
/// pre-play states.
pub struct Handshake {
    keys: ServerKeyPair,
    authenticator: Arc<dyn SessionAuthenticator>,
    status: StatusFn,
    on_login: LoginFn,
    runtime: Handle,
}

impl Handshake {
    /// Generates the server keypair and captures the reactor runtime
    /// handle used for the authenticator callout.
    pub fn new(config: HandshakeConfig, runtime: Handle) -> Result<Arc<Self>, NetError> {
        Ok(Arc::new(Self {
            keys: ServerKeyPair::generate()?,
            authenticator: config.authenticator,
            status: config.status,
            on_login: config.on_login,
            runtime,
        }))
    }

    pub fn public_key_der(&self) -> &[u8] {
        self.keys.public_der()
    }

    /// Installs the five pre-play handlers into the router, which keep
    /// the keypair and callbacks alive from then on.
    pub fn register(self: Arc<Self>, router: &Router) {
        router.set_handler(
            HandshakeC2s::ID,
            ProtocolState::Handshaking,
            |client, frame| {
                let pkt: HandshakeC2s = frame.decode()?;

                trace!(
                    protocol = pkt.protocol_version,
                    address = %pkt.server_address,
                    "handshake from {}",
                    client.connection().remote_addr()
                );

                match pkt.next_state {
                    NEXT_STATE_STATUS => client.set_state(ProtocolState::Status),
                    NEXT_STATE_LOGIN => client.set_state(ProtocolState::Login),
                    _ => Err(NetError::Protocol("handshake requested an unknown state")),
                }
            },
        );

        let this = self.clone();
        router.set_handler(
            StatusRequestC2s::ID,
            ProtocolState::Status,
            move |client, frame| {
                frame.decode::<StatusRequestC2s>()?;

                let json = (this.status)(client);
                client.send(&StatusResponseS2c {
                    json: json.to_string(),
                })?;

                Ok(())
            },
        );

        router.set_handler(PingC2s::ID, ProtocolState::Status, |client, frame| {
            let pkt: PingC2s = frame.decode()?;

            // Echo, then close. The pong is queued ahead of the shutdown
            // marker, so it flushes first.
            client.send(&PongS2c {
                payload: pkt.payload,
            })?;
            client.disconnect("");

            Ok(())
        });

        let this = self.clone();
        router.set_handler(
            LoginStartC2s::ID,
            ProtocolState::Login,
            move |client, frame| {
                let pkt: LoginStartC2s = frame.decode()?;

                if !is_valid_username(&pkt.username) {
                    return Err(NetError::Protocol("invalid username"));
                }

                let mut stage = client.login_stage().lock();

                if !matches!(*stage, LoginStage::AwaitingStart) {
                    return Err(NetError::Protocol("unexpected login start"));
                }

                client.set_username(&pkt.username);

                let server_id = random_server_id();
                let verify_token: [u8; 4] = rand::random();

                client.send(&EncryptionRequestS2c {
                    server_id: server_id.clone(),
                    public_key: this.keys.public_der().to_vec(),
                    verify_token: verify_token.to_vec(),
                })?;

                *stage = LoginStage::AwaitingResponse {
                    server_id,
                    verify_token,
                };

                Ok(())
            },
        );

        let this = self;
        router.set_handler(
            EncryptionResponseC2s::ID,
            ProtocolState::Login,
            move |client, frame| this.encryption_response(client, frame),
        );
    }

    fn encryption_response(
        &self,
        client: &Client,
        frame: &andesite_protocol::PacketFrame,
    ) -> Result<(), NetError> {
        let pkt: EncryptionResponseC2s = frame.decode()?;

        let (server_id, expected_token) = {
            let mut stage = client.login_stage().lock();

            match std::mem::replace(&mut *stage, LoginStage::Complete) {
                LoginStage::AwaitingResponse {
                    server_id,
                    verify_token,
                } => (server_id, verify_token),
                other => {
                    *stage = other;
                    return Err(NetError::Protocol("unexpected encryption response"));
                }
            }
        };

        let token = self.keys.decrypt(&pkt.verify_token)?;
        if token != expected_token {
            return Err(NetError::Encryption("verify token mismatch"));
        }

        let secret = self.keys.decrypt(&pkt.shared_secret)?;
        let key: [u8; 16] = secret
            .as_slice()
            .try_into()
            .map_err(|_| NetError::Encryption("shared secret must be 16 bytes"))?;

        let username = client
            .username()
            .ok_or(NetError::Protocol("no username recorded"))?;

        let request = AuthRequest {
            username,
            server_id,
            shared_secret: key.to_vec(),
            public_key_der: self.keys.public_der().to_vec(),
        };

        // Blocks this pool worker, never a reactor worker.
        let outcome = self
            .runtime
            .block_on(self.authenticator.authenticate(&request))
            .map_err(|e| NetError::Auth(e.to_string()))?;

        info!(
            "{} logged in as {}",
            client.connection().remote_addr(),
            outcome.username
        );

        client.set_uuid(outcome.uuid);
        client.set_username(&outcome.username);

        let on_login = self.on_login.clone();
        let logged_in = client.clone();

        client.atomic(
            &LoginSuccessS2c {
                uuid: outcome.uuid,
                username: outcome.username,
            },
            &key,
            ProtocolState::Play,
            move || on_login(&logged_in),
        )?;

        Ok(())
    }
}

/// Usernames are 1-16 characters drawn from `[a-zA-Z0-9_]`.
pub fn is_valid_username(username: &str) -> bool {
    (1..=16).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn random_server_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
