//! One column of the world and its lifecycle bookkeeping.

use std::sync::atomic::{AtomicUsize, Ordering};

use andesite_network::{Client, TaskPool};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::block::{Block, BlockId, ColumnId, BLOCKS_PER_COLUMN, COLUMN_WIDTH};

/// Lifecycle phases of a column. Observed states only ever advance.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ColumnState {
    Unloaded,
    Loading,
    Generating,
    Generated,
    Populating,
    Populated,
}

/// Dense block and biome storage for one column.
pub struct ColumnGrid {
    pub blocks: Vec<Block>,
    pub biomes: [u8; COLUMN_WIDTH * COLUMN_WIDTH],
}

impl ColumnGrid {
    /// A column of nothing but air.
    pub fn air() -> Self {
        Self {
            blocks: vec![Block::AIR; BLOCKS_PER_COLUMN],
            biomes: [0; COLUMN_WIDTH * COLUMN_WIDTH],
        }
    }
}

struct Lifecycle {
    state: ColumnState,
    /// The highest state any waiter has asked for. The advancer keeps
    /// stepping until the column reaches it.
    goal: ColumnState,
    /// Set while one task owns state advancement. At most one at a time.
    processing: bool,
    dirty: bool,
    async_waiters: Vec<(ColumnState, Box<dyn FnOnce() + Send>)>,
}

struct ClientList {
    clients: Vec<Client>,
    /// Whether the send step has delivered this column. Attaches that race
    /// the send step consult this under the same lock, so every attached
    /// client gets the column exactly once.
    sent: bool,
}

/// A column plus everything the store tracks about it: lifecycle state,
/// waiters, interest, attached clients, and the per-column grid lock.
pub struct ColumnContainer {
    id: ColumnId,
    lifecycle: Mutex<Lifecycle>,
    cond: Condvar,
    grid: RwLock<ColumnGrid>,
    interest: AtomicUsize,
    clients: Mutex<ClientList>,
}

impl ColumnContainer {
    pub(crate) fn new(id: ColumnId) -> Self {
        Self {
            id,
            lifecycle: Mutex::new(Lifecycle {
                state: ColumnState::Unloaded,
                goal: ColumnState::Unloaded,
                processing: false,
                dirty: false,
                async_waiters: Vec::new(),
            }),
            cond: Condvar::new(),
            grid: RwLock::new(ColumnGrid {
                blocks: Vec::new(),
                biomes: [0; COLUMN_WIDTH * COLUMN_WIDTH],
            }),
            interest: AtomicUsize::new(0),
            clients: Mutex::new(ClientList {
                clients: Vec::new(),
                sent: false,
            }),
        }
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn state(&self) -> ColumnState {
        self.lifecycle.lock().state
    }

    pub fn is_dirty(&self) -> bool {
        self.lifecycle.lock().dirty
    }

    pub(crate) fn is_processing(&self) -> bool {
        self.lifecycle.lock().processing
    }

    pub(crate) fn mark_clean(&self) {
        self.lifecycle.lock().dirty = false;
    }

    // Interest keeps a column in memory while handles reference it.

    pub(crate) fn begin_interest(&self) {
        self.interest.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn end_interest(&self) {
        let prev = self.interest.fetch_sub(1, Ordering::SeqCst);
        debug_assert_ne!(prev, 0, "column interest underflowed");
    }

    pub fn interest(&self) -> usize {
        self.interest.load(Ordering::SeqCst)
    }

    // Attached clients receive the column packet when population
    // completes.

    /// Attaches a client. Returns `true` when the send step has already
    /// run, in which case the caller must deliver the column itself.
    pub(crate) fn attach(&self, client: Client) -> bool {
        let mut list = self.clients.lock();
        if !list.clients.iter().any(|c| c.id() == client.id()) {
            list.clients.push(client);
        }
        list.sent
    }

    pub(crate) fn detach(&self, client_id: u64) {
        self.clients.lock().clients.retain(|c| c.id() != client_id);
    }

    pub fn attached_count(&self) -> usize {
        self.clients.lock().clients.len()
    }

    /// Marks the send step as performed and snapshots the recipients.
    pub(crate) fn mark_sent_and_snapshot(&self) -> Vec<Client> {
        let mut list = self.clients.lock();
        list.sent = true;
        list.clients.clone()
    }

    pub(crate) fn attached(&self) -> Vec<Client> {
        self.clients.lock().clients.clone()
    }

    /// Waits until the column reaches `target`, or claims the advancer
    /// role.
    ///
    /// Returns `true` once the state is at least `target`. Returns `false`
    /// when the caller has become the column's single advancer and must
    /// drive [`World::process`](crate::World::process) itself.
    pub(crate) fn wait_until(&self, target: ColumnState) -> bool {
        let mut lc = self.lifecycle.lock();

        if lc.goal < target {
            lc.goal = target;
        }

        loop {
            if lc.state >= target {
                return true;
            }

            if !lc.processing {
                lc.processing = true;
                return false;
            }

            self.cond.wait(&mut lc);
        }
    }

    /// Registers a callback dispatched on the pool once the column reaches
    /// `target`. Fires immediately if it already has.
    pub(crate) fn wait_async(
        &self,
        target: ColumnState,
        pool: &TaskPool,
        callback: impl FnOnce() + Send + 'static,
    ) {
        let mut lc = self.lifecycle.lock();

        if lc.state >= target {
            drop(lc);
            pool.enqueue(callback);
            return;
        }

        if lc.goal < target {
            lc.goal = target;
        }

        lc.async_waiters.push((target, Box::new(callback)));
    }

    /// Advances the column's state, wakes waiters, and reports whether the
    /// advancer can stop.
    ///
    /// Only the task that claimed advancement through
    /// [`wait_until`](Self::wait_until) may call this. Returns `true` when
    /// the goal is reached and the advancer role has been released.
    pub(crate) fn advance_state(&self, new: ColumnState, dirty: bool, pool: &TaskPool) -> bool {
        let mut lc = self.lifecycle.lock();

        debug_assert!(lc.processing, "advance_state without the advancer role");
        debug_assert!(new >= lc.state, "column state went backwards");

        lc.state = new;
        if dirty {
            lc.dirty = true;
        }

        self.cond.notify_all();

        let mut ready = Vec::new();
        let mut i = 0;
        while i < lc.async_waiters.len() {
            if lc.async_waiters[i].0 <= new {
                ready.push(lc.async_waiters.swap_remove(i).1);
            } else {
                i += 1;
            }
        }

        let done = lc.state >= lc.goal || lc.state == ColumnState::Populated;
        if done {
            lc.processing = false;
        }

        drop(lc);

        for callback in ready {
            pool.enqueue(callback);
        }

        done
    }

    /// Releases the advancer role after a failed step, waking a waiter to
    /// retry.
    pub(crate) fn abort_processing(&self) {
        let mut lc = self.lifecycle.lock();
        lc.processing = false;
        self.cond.notify_all();
    }

    // Grid access. The per-column lock serializes readers and writers of
    // the block data itself; logical-range coordination is the world
    // lock's job.

    pub fn get_block(&self, id: BlockId) -> Block {
        debug_assert_eq!(id.containing_column(), self.id);

        let grid = self.grid.read();
        grid.blocks
            .get(id.column_offset())
            .copied()
            .unwrap_or(Block::AIR)
    }

    pub(crate) fn set_block(&self, id: BlockId, block: Block) {
        debug_assert_eq!(id.containing_column(), self.id);

        {
            let mut grid = self.grid.write();
            if grid.blocks.is_empty() {
                *grid = ColumnGrid::air();
            }
            let offset = id.column_offset();
            grid.blocks[offset] = block;
        }

        self.lifecycle.lock().dirty = true;
    }

    /// Runs `f` with read access to the grid.
    pub(crate) fn with_grid<R>(&self, f: impl FnOnce(&ColumnGrid) -> R) -> R {
        f(&self.grid.read())
    }

    /// Runs `f` with write access to the grid, allocating it on first use.
    pub(crate) fn with_grid_mut<R>(&self, f: impl FnOnce(&mut ColumnGrid) -> R) -> R {
        let mut grid = self.grid.write();
        if grid.blocks.is_empty() {
            *grid = ColumnGrid::air();
        }
        f(&mut grid)
    }

    /// Replaces the grid wholesale, as done by the load step.
    pub(crate) fn install_grid(&self, grid: ColumnGrid) {
        *self.grid.write() = grid;
    }
}
