//! The connection reactor: a bounded set of I/O worker threads that accept
//! connections, move bytes, and dispatch callbacks to the task pool.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Semaphore;
use tracing::{error, trace};

use andesite_server_common::IdGenerator;

use crate::connection::{run_reader, run_writer, Connection, ConnectionHandler, ReceiveCtx};
use crate::pool::TaskPool;
use crate::NetError;

pub struct ReactorConfig {
    /// The socket address the server will be bound to.
    pub address: SocketAddr,
    /// The number of reactor worker threads. These only move bytes; all
    /// user callbacks run on the task pool.
    pub workers: usize,
    /// The maximum number of simultaneous connections.
    pub max_connections: usize,
    /// Cap on unconsumed received bytes per connection.
    pub incoming_byte_limit: usize,
    /// Cap on buffered-but-unsent bytes per connection; beyond it, sends
    /// fail with backpressure.
    pub outgoing_byte_limit: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            address: SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 25565).into(),
            workers: 2,
            max_connections: 1024,
            incoming_byte_limit: 2097152, // 2 MiB
            outgoing_byte_limit: 8388608, // 8 MiB
        }
    }
}

/// Accepts and owns connections. Construction is a rendezvous: when
/// [`bind`](Self::bind) returns `Ok`, the listener is bound and accepting.
pub struct Reactor {
    inner: Arc<ReactorInner>,
    // Holding a runtime handle is not enough to keep tokio working; the
    // runtime itself lives here, outside the Arc that reactor tasks hold,
    // so it is always dropped from the owner's thread.
    _runtime: Runtime,
}

struct ReactorInner {
    config: ReactorConfig,
    handle: Handle,
    local_addr: SocketAddr,
    connection_sema: Arc<Semaphore>,
    pool: TaskPool,
    handler: Arc<dyn ConnectionHandler>,
    connections: Mutex<FxHashMap<u64, Arc<Connection>>>,
    ids: IdGenerator,
}

impl Reactor {
    /// Starts the reactor workers and binds the listener. Errors binding or
    /// starting the runtime surface here rather than asynchronously.
    pub fn bind(
        config: ReactorConfig,
        pool: TaskPool,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Self, NetError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.workers.max(1))
            .thread_name("andesite-reactor")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(TcpListener::bind(config.address))?;
        let local_addr = listener.local_addr()?;

        let handle = runtime.handle().clone();

        let inner = Arc::new(ReactorInner {
            connection_sema: Arc::new(Semaphore::new(config.max_connections)),
            config,
            handle,
            local_addr,
            pool,
            handler,
            connections: Mutex::new(FxHashMap::default()),
            ids: IdGenerator::new(),
        });

        let inner2 = inner.clone();
        inner.handle.spawn(accept_loop(inner2, listener));

        Ok(Self {
            inner,
            _runtime: runtime,
        })
    }

    /// The address the listener actually bound, useful when the configured
    /// port was zero.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// A handle onto the reactor's runtime, for code that needs to block on
    /// async work (such as the authenticator callout).
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Opens an outbound connection wired into the same callback and pool
    /// machinery as accepted ones.
    pub fn connect(&self, addr: SocketAddr) -> Result<Arc<Connection>, NetError> {
        let stream = self.inner.handle.block_on(TcpStream::connect(addr))?;
        Ok(self.inner.clone().adopt(stream, addr, None))
    }

    /// Stops accepting, disconnects every connection, and lets in-flight
    /// callbacks drain through the pool.
    pub fn shutdown(&self, reason: &str) {
        self.inner.connection_sema.close();

        let connections: Vec<_> = self.inner.connections.lock().values().cloned().collect();
        for conn in connections {
            conn.disconnect(reason);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown("Server shutting down");
    }
}

impl ReactorInner {
    fn adopt(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) -> Arc<Connection> {
        if let Err(e) = stream.set_nodelay(true) {
            error!("failed to set TCP_NODELAY: {e}");
        }

        let local_addr = stream.local_addr().unwrap_or(self.local_addr);

        let (conn, outgoing_rx) = Connection::new(
            self.ids.next(),
            remote_addr,
            local_addr,
            self.config.outgoing_byte_limit,
            self.config.incoming_byte_limit,
        );

        conn.set_ctx(ReceiveCtx {
            handler: RegistryHandler::wrap(&self),
            pool: self.pool.clone(),
        });

        self.connections.lock().insert(conn.id(), conn.clone());

        let connected = {
            let handler = self.handler.clone();
            let conn = conn.clone();
            self.pool.enqueue(move || handler.on_connect(&conn))
        };

        let (reader, writer) = stream.into_split();

        // No bytes are delivered until the connect callback has finished,
        // so handlers always see connections they were introduced to.
        let reader_conn = conn.clone();
        self.handle.spawn(async move {
            let _ = connected.wait_async().await;
            run_reader(reader_conn, reader).await;
        });

        self.handle
            .spawn(run_writer(conn.clone(), writer, outgoing_rx, permit));

        conn
    }
}

/// Forwards callbacks to the user handler, dropping the reactor's map
/// entry when a connection ends.
struct RegistryHandler {
    reactor: Arc<ReactorInner>,
}

impl RegistryHandler {
    fn wrap(reactor: &Arc<ReactorInner>) -> Arc<dyn ConnectionHandler> {
        Arc::new(Self {
            reactor: reactor.clone(),
        })
    }
}

impl ConnectionHandler for RegistryHandler {
    fn on_connect(&self, conn: &Arc<Connection>) {
        self.reactor.handler.on_connect(conn);
    }

    fn on_receive(&self, conn: &Arc<Connection>, data: &mut Vec<u8>) {
        self.reactor.handler.on_receive(conn, data);
    }

    fn on_disconnect(&self, conn: &Arc<Connection>, reason: &str) {
        self.reactor.connections.lock().remove(&conn.id());
        self.reactor.handler.on_disconnect(conn, reason);
    }
}

async fn accept_loop(inner: Arc<ReactorInner>, listener: TcpListener) {
    loop {
        let permit = match inner.connection_sema.clone().acquire_owned().await {
            Ok(permit) => permit,
            // Closed semaphore indicates reactor shutdown.
            Err(_) => return,
        };

        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                trace!("accepted connection from {remote_addr}");

                inner.clone().adopt(stream, remote_addr, Some(permit));
            }
            Err(e) => {
                error!("failed to accept incoming connection: {e}");
            }
        }
    }
}
