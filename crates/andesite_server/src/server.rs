//! The assembled server: one context object owning the pool, the reactor,
//! the router, the world, and the registries, with typed events where
//! modules attach behavior.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use andesite_network::{
    Client, ClientSet, Connection, ConnectionHandler, Handshake, HandshakeConfig, KeepAlive,
    PacketLog, PoolConfig, Reactor, ReactorConfig, Router, SessionAuthenticator, TaskPool,
};
use andesite_network::handshake::{LoginFn, StatusFn};
use andesite_protocol::packets::play::ChatMessageS2c;
use andesite_protocol::{ProtocolState, GAME_VERSION, PROTOCOL_VERSION};
use andesite_server_common::{DataProvider, Event, LogLevel, Settings};
use andesite_world::World;
use base64::prelude::*;
use serde_json::Value;
use tracing::warn;

use crate::chat::ChatMessage;
use crate::command::CommandRegistry;
use crate::module::{Module, ModuleRegistry};

// Settings keys and their defaults. All tunables flow through the
// settings namespace of the data provider.
const TIMEOUT_SETTING: &str = "timeout";
const TIMEOUT_DEFAULT: u64 = 10000;
const KEEP_ALIVE_SETTING: &str = "keep_alive_frequency";
const KEEP_ALIVE_DEFAULT: u64 = 5000;
const MAX_CONNECTIONS_SETTING: &str = "max_connections";
const MAX_CONNECTIONS_DEFAULT: usize = 1024;
const MAX_PLAYERS_SETTING: &str = "max_players";
const MAX_PLAYERS_DEFAULT: usize = 20;
const INCOMING_LIMIT_SETTING: &str = "incoming_byte_limit";
const INCOMING_LIMIT_DEFAULT: usize = 2097152;
const OUTGOING_LIMIT_SETTING: &str = "outgoing_byte_limit";
const OUTGOING_LIMIT_DEFAULT: usize = 8388608;
const MAINTENANCE_SETTING: &str = "maintenance_interval";
const MAINTENANCE_DEFAULT: u64 = 300000;
const WORLD_TYPE_SETTING: &str = "world_type";
const WORLD_TYPE_DEFAULT: &str = "flat";
const REACTOR_WORKERS_SETTING: &str = "reactor_workers";
const REACTOR_WORKERS_DEFAULT: usize = 2;
const POOL_WORKERS_SETTING: &str = "pool_workers";
const MOTD_SETTING: &str = "motd";
const MOTD_DEFAULT: &str = "An Andesite Server";
const FAVICON_KEY: &str = "favicon";

pub struct ServerConfig {
    pub data: Arc<dyn DataProvider>,
    pub authenticator: Arc<dyn SessionAuthenticator>,
    /// The listen address. Port zero binds an ephemeral port, reported by
    /// [`Server::local_addr`].
    pub address: SocketAddr,
    pub modules: Vec<Arc<dyn Module>>,
}

impl ServerConfig {
    pub fn new(data: Arc<dyn DataProvider>, authenticator: Arc<dyn SessionAuthenticator>) -> Self {
        Self {
            data,
            authenticator,
            address: SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 25565).into(),
            modules: Vec::new(),
        }
    }
}

/// Events modules subscribe to.
#[derive(Default)]
pub struct ServerEvents {
    /// A connection was accepted and a client created for it.
    pub on_connect: Event<Client>,
    /// A client completed login and entered play.
    pub on_login: Event<Client>,
    /// A client's connection ended, with the recorded reason.
    pub on_disconnect: Event<(Client, String)>,
}

pub struct Server {
    me: Weak<Server>,
    data: Arc<dyn DataProvider>,
    settings: Settings,
    pool: TaskPool,
    reactor: Reactor,
    router: Arc<Router>,
    packet_log: Arc<PacketLog>,
    clients: Arc<ClientSet>,
    world: Arc<World>,
    keep_alive: KeepAlive,
    events: Arc<ServerEvents>,
    commands: CommandRegistry,
    modules: ModuleRegistry,
    started_at: Instant,
}

impl Server {
    /// Builds and starts a server: pool, world, reactor, handshake, and
    /// keep-alive, then installs the configured modules in priority
    /// order. When this returns, the listener is accepting.
    pub fn start(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let data = config.data;
        let settings = Settings::new(data.clone());

        let pool = {
            let data = data.clone();
            TaskPool::new(PoolConfig {
                workers: settings.get_or(
                    POOL_WORKERS_SETTING,
                    std::thread::available_parallelism().map_or(4, Into::into),
                ),
                panic_hook: Some(Arc::new(move |message| {
                    data.write_log(message, LogLevel::Error);
                })),
                worker_init: None,
                worker_cleanup: None,
            })
        };

        let packet_log = Arc::new(PacketLog::new());
        let router = Arc::new(Router::new(packet_log.clone()));
        let clients = Arc::new(ClientSet::new());
        let events = Arc::new(ServerEvents::default());

        let world_type = settings
            .get(WORLD_TYPE_SETTING)
            .unwrap_or_else(|| WORLD_TYPE_DEFAULT.into());
        let world = World::new(data.clone(), pool.clone(), &world_type);
        world.start_maintenance(Duration::from_millis(
            settings.get_or(MAINTENANCE_SETTING, MAINTENANCE_DEFAULT),
        ));

        let handler = Arc::new(ServerHandler {
            clients: clients.clone(),
            router: router.clone(),
            packet_log: packet_log.clone(),
            events: events.clone(),
            world: world.clone(),
            data: data.clone(),
        });

        let reactor = Reactor::bind(
            ReactorConfig {
                address: config.address,
                workers: settings.get_or(REACTOR_WORKERS_SETTING, REACTOR_WORKERS_DEFAULT),
                max_connections: settings.get_or(MAX_CONNECTIONS_SETTING, MAX_CONNECTIONS_DEFAULT),
                incoming_byte_limit: settings
                    .get_or(INCOMING_LIMIT_SETTING, INCOMING_LIMIT_DEFAULT),
                outgoing_byte_limit: settings
                    .get_or(OUTGOING_LIMIT_SETTING, OUTGOING_LIMIT_DEFAULT),
            },
            pool.clone(),
            handler,
        )?;

        let status: StatusFn = {
            let clients = clients.clone();
            let settings = settings.clone();
            let data = data.clone();

            Arc::new(move |_client| {
                let mut json = serde_json::json!({
                    "version": { "name": GAME_VERSION, "protocol": PROTOCOL_VERSION },
                    "players": {
                        "online": clients.len(),
                        "max": settings.get_or(MAX_PLAYERS_SETTING, MAX_PLAYERS_DEFAULT),
                    },
                    "description": {
                        "text": settings.get(MOTD_SETTING).unwrap_or_else(|| MOTD_DEFAULT.into()),
                    },
                });

                if let Some(png) = data.get_binary(FAVICON_KEY) {
                    let mut uri = "data:image/png;base64,".to_owned();
                    BASE64_STANDARD.encode_string(&png, &mut uri);
                    json["favicon"] = Value::String(uri);
                }

                json
            })
        };

        let on_login: LoginFn = {
            let events = events.clone();
            let data = data.clone();

            Arc::new(move |client| {
                data.write_log(
                    &format!(
                        "{} logged in as {}",
                        client.connection().remote_addr(),
                        client.username().unwrap_or_default()
                    ),
                    LogLevel::Info,
                );

                events.on_login.fire(client);
            })
        };

        let handshake = Handshake::new(
            HandshakeConfig {
                authenticator: config.authenticator,
                status,
                on_login,
            },
            reactor.handle().clone(),
        )?;
        handshake.register(&router);

        let keep_alive = KeepAlive::new(
            clients.clone(),
            pool.clone(),
            settings.get_or(TIMEOUT_SETTING, TIMEOUT_DEFAULT),
            settings.get_or(KEEP_ALIVE_SETTING, KEEP_ALIVE_DEFAULT),
        );
        keep_alive.register(&router);
        keep_alive.start();

        let server = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            data,
            settings,
            pool,
            reactor,
            router,
            packet_log,
            clients,
            world,
            keep_alive,
            events,
            commands: CommandRegistry::new(),
            modules: ModuleRegistry::default(),
            started_at: Instant::now(),
        });

        server
            .data
            .write_log(&format!("Server listening on {}", server.local_addr()), LogLevel::Info);

        server.modules.install_all(&server, config.modules);

        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.reactor.local_addr()
    }

    pub fn data(&self) -> &Arc<dyn DataProvider> {
        &self.data
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn packet_log(&self) -> &Arc<PacketLog> {
        &self.packet_log
    }

    pub fn clients(&self) -> &Arc<ClientSet> {
        &self.clients
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn events(&self) -> &Arc<ServerEvents> {
        &self.events
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The command-interpreter entry point: parses a leading solidus,
    /// routes to a command handler, and returns the rendered response.
    pub fn interpret(&self, line: &str) -> Option<String> {
        self.commands.interpret(None, line)
    }

    /// Delivers a chat document to its recipients (every play-state
    /// client for broadcasts) and records it in the chat log.
    pub fn send_chat(&self, message: &ChatMessage) {
        let packet = ChatMessageS2c {
            json: message.to_json().to_string(),
        };

        for client in self.clients.snapshot() {
            if client.state() != ProtocolState::Play {
                continue;
            }

            let addressed = message.broadcast
                || client
                    .username()
                    .is_some_and(|name| message.recipients.contains(&name));

            if addressed {
                let _ = client.send(&packet);
            }
        }

        let from = message.sender.clone().unwrap_or_else(|| "server".into());
        self.data
            .write_chat_log(&from, &message.recipients, &message.to_plain(), None);
    }

    /// Orderly teardown: uninstall modules, stop periodic work, flush the
    /// world, close connections, and drain the pool.
    ///
    /// Must be called from outside the task pool.
    pub fn shutdown(&self) {
        let this = self.me.upgrade().expect("server already dropped");
        self.modules.uninstall_all(&this);
        self.keep_alive.stop();
        self.world.shutdown();

        let (done_tx, done_rx) = flume::bounded(1);
        self.world.save_all(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv_timeout(Duration::from_secs(30));

        self.reactor.shutdown("Server shutting down");
        self.pool.shutdown();

        self.data.write_log("Server stopped", LogLevel::Info);
    }
}

/// Bridges reactor callbacks into clients, the router, and server events.
struct ServerHandler {
    clients: Arc<ClientSet>,
    router: Arc<Router>,
    packet_log: Arc<PacketLog>,
    events: Arc<ServerEvents>,
    world: Arc<World>,
    data: Arc<dyn DataProvider>,
}

impl ConnectionHandler for ServerHandler {
    fn on_connect(&self, conn: &Arc<Connection>) {
        let client = Client::new(conn.clone(), self.packet_log.clone());
        self.clients.insert(client.clone());

        self.data.write_log(
            &format!("{} connected", conn.remote_addr()),
            LogLevel::Info,
        );

        self.events.on_connect.fire(&client);
    }

    fn on_receive(&self, conn: &Arc<Connection>, data: &mut Vec<u8>) {
        let Some(client) = self.clients.get(conn.id()) else {
            data.clear();
            return;
        };

        match client.receive(data) {
            Ok(frames) => {
                data.clear();

                for frame in frames {
                    self.router.dispatch(&client, &frame);
                }
            }
            Err(e) => {
                warn!("failed to frame bytes from {}: {e}", conn.remote_addr());
                data.clear();
                client.disconnect("Protocol error");
            }
        }
    }

    fn on_disconnect(&self, conn: &Arc<Connection>, reason: &str) {
        let Some(client) = self.clients.remove(conn.id()) else {
            return;
        };

        self.world.detach_client_everywhere(client.id());

        self.data.write_log(
            &format!("{} disconnected ({reason})", conn.remote_addr()),
            LogLevel::Info,
        );

        self.events
            .on_disconnect
            .fire(&(client, reason.to_owned()));
    }
}
