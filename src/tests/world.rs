//! World behavior observed from the wire: attached clients receive the
//! column packet exactly once when it populates.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use andesite_protocol::packets::play::{
    BlockChangeS2c, ColumnDataS2c, KeepAliveC2s, KeepAliveS2c,
};
use andesite_world::{
    AccessStrategy, Block, BlockId, ColumnGrid, ColumnId, Generator, Populator, WorldHandle,
    WriteStrategy,
};

use super::{start_server, TestClient};

struct FlatGenerator;

impl Generator for FlatGenerator {
    fn generate(&self, _column: ColumnId, grid: &mut ColumnGrid) {
        for (offset, block) in grid.blocks.iter_mut().enumerate() {
            if offset / 256 < 64 {
                *block = Block::new(1, 0);
            }
        }
    }
}

struct CountingPopulator {
    calls: Arc<AtomicUsize>,
}

impl Populator for CountingPopulator {
    fn populate(&self, _handle: &mut WorldHandle, _column: ColumnId) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn attached_client_receives_the_column_exactly_once() {
    let (server, _data, _auth) = start_server(&[], false);

    let populated = Arc::new(AtomicUsize::new(0));
    server
        .world()
        .register_generator("flat", 0, Arc::new(FlatGenerator));
    server.world().register_populator(Arc::new(CountingPopulator {
        calls: populated.clone(),
    }));

    let mut client = TestClient::connect(server.local_addr());
    client.login("alice");

    let server_client = server
        .clients()
        .snapshot()
        .into_iter()
        .find(|c| c.username().as_deref() == Some("alice"))
        .expect("client not registered");

    let target = ColumnId::new(0, 0, 0);
    server.world().attach_client(&server_client, target);

    let column: ColumnDataS2c = client.recv();
    assert_eq!((column.column_x, column.column_z), (0, 0));
    assert_eq!(column.dimension, 0);
    assert!(column.full);
    assert!(!column.data.is_empty());

    assert_eq!(populated.load(Ordering::SeqCst), 1);

    // Nothing else is in flight: the next exchange must be our keep-alive
    // echo, not a duplicate column.
    client.send(&KeepAliveC2s { id: 0 });
    let echo: KeepAliveS2c = client.recv();
    assert_eq!(echo.id, 0);

    // Attaching again on an already-populated column delivers directly,
    // still once per attach.
    server.world().attach_client(&server_client, target);
    let again: ColumnDataS2c = client.recv();
    assert_eq!((again.column_x, again.column_z), (0, 0));
    assert_eq!(populated.load(Ordering::SeqCst), 1);

    // A server-side block set reaches watchers as a block change.
    let changed = BlockId::new(3, 90, 3, 0);
    server
        .world()
        .handle(AccessStrategy::Populate, WriteStrategy::PerBlock)
        .set(changed, Block::new(7, 2), true)
        .unwrap();

    let change: BlockChangeS2c = client.recv();
    assert_eq!((change.x, change.y, change.z), (3, 90, 3));
    assert_eq!((change.block_id, change.metadata), (7, 2));
}
