//! Send-queue semantics at the connection level: ordering, completion
//! promises, the backpressure cap, and disconnect behavior.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use andesite_network::{
    Connection, ConnectionHandler, NetError, PoolConfig, Reactor, ReactorConfig, SendState,
    TaskPool,
};
use bytes::BytesMut;

struct SinkHandler;

impl ConnectionHandler for SinkHandler {
    fn on_connect(&self, _conn: &Arc<Connection>) {}

    fn on_receive(&self, _conn: &Arc<Connection>, data: &mut Vec<u8>) {
        data.clear();
    }

    fn on_disconnect(&self, _conn: &Arc<Connection>, _reason: &str) {}
}

const CHUNK: usize = 4096;

fn reactor_with_cap(cap: usize) -> Reactor {
    let pool = TaskPool::new(PoolConfig {
        workers: 2,
        ..Default::default()
    });

    Reactor::bind(
        ReactorConfig {
            address: "127.0.0.1:0".parse().unwrap(),
            outgoing_byte_limit: cap,
            ..Default::default()
        },
        pool,
        Arc::new(SinkHandler),
    )
    .expect("reactor failed to bind")
}

fn chunk(tag: u8) -> BytesMut {
    BytesMut::from(&vec![tag; CHUNK][..])
}

#[test]
fn sends_hit_backpressure_then_drain_in_order() {
    let reactor = reactor_with_cap(16 * 1024);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let conn = reactor.connect(listener.local_addr().unwrap()).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    // Queue chunks against a peer that is not reading until the cap
    // rejects one.
    let mut handles = Vec::new();
    let mut rejected = None;

    for i in 0..100_000_u32 {
        match conn.send(chunk((i % 251) as u8)) {
            Ok(handle) => handles.push(handle),
            Err(NetError::Backpressure { cap }) => {
                assert_eq!(cap, 16 * 1024);
                rejected = Some(i);
                break;
            }
            Err(e) => panic!("unexpected send error: {e}"),
        }
    }

    let accepted = handles.len();
    assert_eq!(rejected, Some(accepted as u32), "no send was rejected");

    // Now the peer drains everything; the wire must carry the accepted
    // payloads in enqueue order, and every prior handle resolves Sent.
    let mut wire = vec![0_u8; accepted * CHUNK];
    peer.read_exact(&mut wire).unwrap();

    for (i, received) in wire.chunks_exact(CHUNK).enumerate() {
        let tag = (i as u32 % 251) as u8;
        assert!(received.iter().all(|&b| b == tag), "chunk {i} out of order");
    }

    for handle in &handles {
        assert_eq!(handle.wait(), SendState::Sent);
        assert_eq!(handle.sent(), CHUNK);
    }
}

#[test]
fn disconnect_flushes_queued_sends_then_fails_new_ones() {
    let reactor = reactor_with_cap(1024 * 1024);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let conn = reactor.connect(listener.local_addr().unwrap()).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    let queued: Vec<_> = (0..4)
        .map(|i| conn.send(chunk(i)).unwrap())
        .collect();

    conn.disconnect("done here");

    assert!(matches!(
        conn.send(chunk(99)),
        Err(NetError::Disconnected)
    ));
    assert_eq!(conn.reason().as_deref(), Some("done here"));

    // The shutdown marker queues behind the data, so everything already
    // accepted still reaches the wire.
    let mut wire = vec![0_u8; 4 * CHUNK];
    peer.read_exact(&mut wire).unwrap();

    for handle in &queued {
        assert_eq!(handle.wait(), SendState::Sent);
    }

    // And the socket closes afterwards.
    let mut rest = Vec::new();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    assert_eq!(peer.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn disconnect_is_idempotent_and_keeps_the_first_reason() {
    let reactor = reactor_with_cap(1024);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let conn = reactor.connect(listener.local_addr().unwrap()).unwrap();
    let _peer = listener.accept().unwrap();

    conn.disconnect("first");
    conn.disconnect("second");

    assert_eq!(conn.reason().as_deref(), Some("first"));
}
