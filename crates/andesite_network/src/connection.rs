//! A single TCP connection: ordered sends with completion promises,
//! edge-gated receive delivery, and cooperative disconnect.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Notify;
use tracing::debug;

use crate::pool::TaskPool;
use crate::send_handle::{SendHandle, SendState};
use crate::NetError;

pub(crate) const READ_BUF_SIZE: usize = 4096;

/// Callbacks a [`Reactor`](crate::Reactor) owner supplies for connection
/// lifecycle and data delivery.
///
/// `on_receive` is handed the connection's receive buffer and consumes
/// bytes by draining them from the front of the vector; unconsumed bytes
/// are redelivered together with the next read. Callbacks run on task-pool
/// workers, never on reactor workers, and `on_receive` never overlaps
/// itself for one connection.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connect(&self, conn: &Arc<Connection>);

    fn on_receive(&self, conn: &Arc<Connection>, data: &mut Vec<u8>);

    /// Invoked exactly once per connection, with the recorded disconnect
    /// reason (or an empty string for a silent remote close).
    fn on_disconnect(&self, conn: &Arc<Connection>, reason: &str);
}

pub(crate) struct ReceiveCtx {
    pub(crate) handler: Arc<dyn ConnectionHandler>,
    pub(crate) pool: TaskPool,
}

pub(crate) enum Outgoing {
    Data(BytesMut, SendHandle),
    Shutdown,
}

/// One TCP connection owned by the reactor.
///
/// Bytes handed to [`send`](Self::send) appear on the wire in enqueue
/// order and their handles resolve in the same order.
pub struct Connection {
    // Back-reference to the owning Arc, for handing clones to pool tasks.
    me: Weak<Connection>,
    id: u64,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    outgoing: flume::Sender<Outgoing>,
    queued_bytes: AtomicUsize,
    send_cap: usize,
    recv_limit: usize,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    shutdown: AtomicBool,
    disconnect_fired: AtomicBool,
    reason: Mutex<Option<String>>,
    closed: Notify,
    recv_buf: Mutex<Vec<u8>>,
    recv_idle: AtomicBool,
    ctx: OnceLock<ReceiveCtx>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        send_cap: usize,
        recv_limit: usize,
    ) -> (Arc<Self>, flume::Receiver<Outgoing>) {
        let (outgoing, outgoing_rx) = flume::unbounded();

        let conn = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            remote_addr,
            local_addr,
            outgoing,
            queued_bytes: AtomicUsize::new(0),
            send_cap,
            recv_limit,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            disconnect_fired: AtomicBool::new(false),
            reason: Mutex::new(None),
            closed: Notify::new(),
            recv_buf: Mutex::new(Vec::new()),
            recv_idle: AtomicBool::new(true),
            ctx: OnceLock::new(),
        });

        (conn, outgoing_rx)
    }

    pub(crate) fn set_ctx(&self, ctx: ReceiveCtx) {
        let _ = self.ctx.set(ctx);
    }

    fn arc(&self) -> Arc<Self> {
        // Methods are only reachable through a live Arc.
        self.me.upgrade().expect("connection already dropped")
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// The disconnect reason recorded so far, if any.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Queues `bytes` for transmission.
    ///
    /// Fails with [`NetError::Backpressure`] when the buffered-but-unsent
    /// total would exceed the per-connection cap, and with
    /// [`NetError::Disconnected`] on a closed connection.
    pub fn send(&self, bytes: BytesMut) -> Result<SendHandle, NetError> {
        if self.is_shutdown() {
            return Err(NetError::Disconnected);
        }

        let len = bytes.len();

        if self
            .queued_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued + len <= self.send_cap).then_some(queued + len)
            })
            .is_err()
        {
            return Err(NetError::Backpressure { cap: self.send_cap });
        }

        let handle = SendHandle::new();

        if self
            .outgoing
            .send(Outgoing::Data(bytes, handle.clone()))
            .is_err()
        {
            handle.resolve(SendState::Failed);
            return Err(NetError::Disconnected);
        }

        Ok(handle)
    }

    /// Begins a cooperative close. Idempotent; only the first recorded
    /// reason survives. Sends already queued are flushed before the socket
    /// closes; sends issued afterwards fail with
    /// [`NetError::Disconnected`].
    pub fn disconnect(&self, reason: impl Into<String>) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.reason.lock() = Some(reason.into());

        // The shutdown marker queues behind pending data, so the writer
        // flushes before closing.
        let _ = self.outgoing.send(Outgoing::Shutdown);
        self.closed.notify_one();
    }

    /// Re-arms receive delivery after a receive callback completes. Called
    /// automatically by the reactor's dispatch wrapper; one receive task is
    /// in flight per connection at a time.
    pub fn complete_receive(&self) {
        self.recv_idle.store(true, Ordering::SeqCst);

        if !self.recv_buf.lock().is_empty() {
            self.schedule_receive();
        }
    }

    fn schedule_receive(&self) {
        let Some(ctx) = self.ctx.get() else {
            return;
        };

        if self.is_shutdown() {
            return;
        }

        if !self.recv_idle.swap(false, Ordering::SeqCst) {
            // A receive task is already in flight; it will observe the new
            // bytes via complete_receive.
            return;
        }

        let conn = self.arc();
        let handler = ctx.handler.clone();

        ctx.pool.enqueue(move || {
            let mut data = std::mem::take(&mut *conn.recv_buf.lock());

            if !data.is_empty() {
                handler.on_receive(&conn, &mut data);
            }

            // Unconsumed bytes go back in front of anything that arrived
            // while the callback ran.
            {
                let mut buf = conn.recv_buf.lock();
                if !data.is_empty() {
                    data.extend_from_slice(&buf);
                    *buf = data;
                }
            }

            conn.complete_receive();
        });
    }

    /// Winds the connection down and fires the disconnect callback exactly
    /// once. `io_error` records the terminating OS error when the reason
    /// was not set explicitly.
    pub(crate) fn finish(&self, io_error: Option<String>) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            if let Some(err) = io_error {
                let mut reason = self.reason.lock();
                if reason.is_none() {
                    *reason = Some(err);
                }
            }
            let _ = self.outgoing.send(Outgoing::Shutdown);
        }

        self.closed.notify_one();

        if !self.disconnect_fired.swap(true, Ordering::SeqCst) {
            if let Some(ctx) = self.ctx.get() {
                let conn = self.arc();
                let handler = ctx.handler.clone();

                ctx.pool.enqueue(move || {
                    let reason = conn.reason.lock().clone().unwrap_or_default();
                    handler.on_disconnect(&conn, &reason);
                });
            }
        }
    }
}

/// Reads from the socket into the connection's receive buffer and posts
/// receive tasks, one in flight per readable edge.
pub(crate) async fn run_reader(conn: Arc<Connection>, mut reader: OwnedReadHalf) {
    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
    let mut error = None;

    loop {
        tokio::select! {
            () = conn.closed.notified() => break,
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => break, // Remote closed.
                Ok(n) => {
                    conn.bytes_received.fetch_add(n as u64, Ordering::Relaxed);

                    let over_limit = {
                        let mut recv = conn.recv_buf.lock();
                        recv.extend_from_slice(&buf.split()[..]);
                        recv.len() > conn.recv_limit
                    };

                    if over_limit {
                        conn.disconnect("Receive buffer limit exceeded");
                        break;
                    }

                    conn.schedule_receive();
                    buf.reserve(READ_BUF_SIZE);
                }
                Err(e) if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                ) => {}
                Err(e) => {
                    debug!("error reading from connection {}: {e}", conn.id());
                    error = Some(e.to_string());
                    break;
                }
            }
        }
    }

    conn.finish(error);
}

/// Drains the send queue in order, resolving each handle as its bytes hit
/// the socket. Holds the reactor's connection permit (when one exists) for
/// the connection's lifetime.
pub(crate) async fn run_writer(
    conn: Arc<Connection>,
    mut writer: OwnedWriteHalf,
    outgoing: flume::Receiver<Outgoing>,
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
) {
    let mut error = None;

    while let Ok(msg) = outgoing.recv_async().await {
        match msg {
            Outgoing::Shutdown => break,
            Outgoing::Data(bytes, handle) => {
                handle.mark_sending();

                match writer.write_all(&bytes).await {
                    Ok(()) => {
                        conn.queued_bytes.fetch_sub(bytes.len(), Ordering::SeqCst);
                        conn.bytes_sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                        handle.add_sent(bytes.len());
                        handle.resolve(SendState::Sent);
                    }
                    Err(e) => {
                        debug!("error writing to connection {}: {e}", conn.id());
                        error = Some(e.to_string());
                        handle.resolve(SendState::Failed);
                        break;
                    }
                }
            }
        }
    }

    let _ = writer.shutdown().await;

    // Everything still queued will never be sent.
    while let Ok(msg) = outgoing.try_recv() {
        if let Outgoing::Data(_, handle) = msg {
            handle.resolve(SendState::Failed);
        }
    }

    conn.finish(error);
}
