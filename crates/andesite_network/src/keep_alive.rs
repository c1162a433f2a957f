//! Keep-alive, latency measurement, and inactivity timeouts.
//!
//! Once per cycle the server sends every play-state client a keep-alive
//! with a random non-zero id and expects the same id back. A client that is
//! still owing a reply at the next cycle is dropped, as is any client with
//! no received bytes inside the inactivity timeout. Client-initiated
//! keep-alives carry id zero and are echoed verbatim.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use andesite_protocol::packets::play::{KeepAliveC2s, KeepAliveS2c};
use andesite_protocol::{Packet, ProtocolState};
use andesite_server_common::random_nonzero_i32;
use tracing::debug;

use crate::client::ClientSet;
use crate::pool::TaskPool;
use crate::router::Router;

pub struct KeepAlive {
    inner: Arc<Inner>,
}

struct Inner {
    clients: Arc<ClientSet>,
    pool: TaskPool,
    timeout_ms: u64,
    frequency_ms: u64,
    stopped: AtomicBool,
}

impl KeepAlive {
    pub fn new(clients: Arc<ClientSet>, pool: TaskPool, timeout_ms: u64, frequency_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients,
                pool,
                timeout_ms,
                frequency_ms,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Installs the reply handler.
    pub fn register(&self, router: &Router) {
        router.set_handler(
            KeepAliveC2s::ID,
            ProtocolState::Play,
            move |client, frame| {
                let pkt: KeepAliveC2s = frame.decode()?;

                // Zero is the client's own keep alive; reply in kind.
                if pkt.id == 0 {
                    client.send(&KeepAliveS2c { id: 0 })?;
                    return Ok(());
                }

                let elapsed_ms = {
                    let mut status = client.keep_alive().lock();

                    if !(status.waiting && status.id == pkt.id) {
                        drop(status);
                        client.disconnect("Unexpected keep alive packet");
                        return Ok(());
                    }

                    status.waiting = false;
                    status.sent_at.elapsed().as_millis() as u64
                };

                client.set_ping_ms(elapsed_ms.min(u64::from(u32::MAX)) as u32);

                debug!(
                    "{} replied to keep alive, latency is {elapsed_ms}ms",
                    client.connection().remote_addr()
                );

                Ok(())
            },
        );
    }

    /// Schedules the first cycle on the pool's scheduler. Each cycle
    /// reschedules the next.
    pub fn start(&self) {
        Self::schedule(&self.inner);
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    fn schedule(inner: &Arc<Inner>) {
        let delay = Duration::from_millis(inner.frequency_ms.min(inner.timeout_ms));

        let inner2 = inner.clone();
        inner.pool.enqueue_after(delay, move || Self::tick(&inner2));
    }

    fn tick(inner: &Arc<Inner>) {
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        for client in inner.clients.snapshot() {
            let inactive = client.inactive_ms();

            if inactive > inner.timeout_ms {
                client.disconnect(format!(
                    "Timeout of {}ms exceeded (inactive for {inactive}ms)",
                    inner.timeout_ms
                ));
                continue;
            }

            if client.state() != ProtocolState::Play {
                continue;
            }

            let elapsed = {
                let mut status = client.keep_alive().lock();

                if status.waiting {
                    Some(status.sent_at.elapsed().as_millis() as u64)
                } else {
                    status.id = random_nonzero_i32();
                    status.waiting = true;
                    status.sent_at = Instant::now();
                    None
                }
            };

            match elapsed {
                // Still owing a reply from the previous cycle.
                Some(elapsed) => {
                    client.disconnect(format!("Ping timed out ({elapsed}ms)"));
                }
                None => {
                    let id = client.keep_alive().lock().id;
                    let _ = client.send(&KeepAliveS2c { id });
                }
            }
        }

        Self::schedule(inner);
    }
}
