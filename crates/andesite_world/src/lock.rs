//! The world lock: range-based reader/writer coordination above the
//! per-column grid locks.
//!
//! Requests declare which blocks, ranges, and columns they will read and
//! write. Two requests contend iff either's write set intersects the
//! other's read or write set. Grants are FIFO-fair: a pending request is
//! never granted past an incompatible predecessor, which prevents writer
//! starvation. Upgrades that cannot be granted at once move to the front
//! of the pending queue.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use andesite_network::TaskPool;

use crate::block::{BlockId, BlockRange, ColumnId};
use crate::WorldError;

/// One element of a request's read or write set.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum LockArea {
    Block(BlockId),
    Range(BlockRange),
    Column(ColumnId),
    /// The entire world, every dimension. Intersects everything.
    World,
}

impl LockArea {
    fn intersects(&self, other: &LockArea) -> bool {
        use LockArea::*;

        match (self, other) {
            (World, _) | (_, World) => true,

            (Block(a), Block(b)) => a == b,
            (Block(a), Column(c)) | (Column(c), Block(a)) => a.containing_column() == *c,
            (Block(a), Range(r)) | (Range(r), Block(a)) => r.contains(*a),

            (Column(a), Column(b)) => a == b,
            (Column(c), Range(r)) | (Range(r), Column(c)) => r.intersects_column(*c),

            (Range(a), Range(b)) => a.intersects(b),
        }
    }
}

/// A declarative description of the block and column ranges a task intends
/// to read and write.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct WorldLockRequest {
    read: Vec<LockArea>,
    write: Vec<LockArea>,
}

impl WorldLockRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request that writes the whole world. Contends with every
    /// non-empty request.
    pub fn exclusive() -> Self {
        Self::new().write_area(LockArea::World)
    }

    pub fn read_area(mut self, area: LockArea) -> Self {
        self.read.push(area);
        self
    }

    pub fn write_area(mut self, area: LockArea) -> Self {
        self.write.push(area);
        self
    }

    pub fn read_block(self, id: BlockId) -> Self {
        self.read_area(LockArea::Block(id))
    }

    pub fn write_block(self, id: BlockId) -> Self {
        self.write_area(LockArea::Block(id))
    }

    pub fn read_range(self, range: BlockRange) -> Self {
        self.read_area(LockArea::Range(range))
    }

    pub fn write_range(self, range: BlockRange) -> Self {
        self.write_area(LockArea::Range(range))
    }

    pub fn read_column(self, id: ColumnId) -> Self {
        self.read_area(LockArea::Column(id))
    }

    pub fn write_column(self, id: ColumnId) -> Self {
        self.write_area(LockArea::Column(id))
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Folds `other` into this request, as used by upgrades.
    pub fn merge(&mut self, other: WorldLockRequest) {
        self.read.extend(other.read);
        self.write.extend(other.write);
    }

    /// True iff the two requests cannot be held simultaneously.
    pub fn contends_with(&self, other: &WorldLockRequest) -> bool {
        let overlaps = |a: &[LockArea], b: &[LockArea]| {
            a.iter().any(|x| b.iter().any(|y| x.intersects(y)))
        };

        overlaps(&self.write, &other.write)
            || overlaps(&self.write, &other.read)
            || overlaps(&self.read, &other.write)
    }
}

type AsyncGrant = Box<dyn FnOnce(WorldLockHandle) + Send>;

struct LockEntry {
    request: Mutex<WorldLockRequest>,
    granted: Mutex<bool>,
    cond: Condvar,
    callback: Mutex<Option<AsyncGrant>>,
}

impl LockEntry {
    fn new(request: WorldLockRequest) -> Arc<Self> {
        Arc::new(Self {
            request: Mutex::new(request),
            granted: Mutex::new(false),
            cond: Condvar::new(),
            callback: Mutex::new(None),
        })
    }
}

struct LockQueues {
    held: Vec<Arc<LockEntry>>,
    pending: Vec<Arc<LockEntry>>,
}

/// The lock itself. Clones share state.
#[derive(Clone)]
pub struct WorldLock {
    inner: Arc<LockInner>,
}

struct LockInner {
    pool: TaskPool,
    queues: Mutex<LockQueues>,
}

impl WorldLock {
    pub fn new(pool: TaskPool) -> Self {
        Self {
            inner: Arc::new(LockInner {
                pool,
                queues: Mutex::new(LockQueues {
                    held: Vec::new(),
                    pending: Vec::new(),
                }),
            }),
        }
    }

    /// Acquires `request`, blocking until no held lock and no
    /// earlier-queued pending request contends with it.
    pub fn acquire(&self, request: WorldLockRequest) -> WorldLockHandle {
        let entry = LockEntry::new(request);

        if !self.try_insert(&entry) {
            let mut granted = entry.granted.lock();
            while !*granted {
                entry.cond.wait(&mut granted);
            }
        }

        self.handle(entry)
    }

    /// Non-blocking acquire; fails with [`WorldError::Contention`] when
    /// the request cannot be granted immediately.
    pub fn try_acquire(&self, request: WorldLockRequest) -> Result<WorldLockHandle, WorldError> {
        let entry = LockEntry::new(request);

        let mut queues = self.inner.queues.lock();
        if self.contends(&queues, &entry, None) {
            return Err(WorldError::Contention);
        }

        *entry.granted.lock() = true;
        queues.held.push(entry.clone());
        drop(queues);

        Ok(self.handle(entry))
    }

    /// Queues `request` and invokes `callback` with the granted handle on
    /// a pool task once it can be held.
    pub fn acquire_async(
        &self,
        request: WorldLockRequest,
        callback: impl FnOnce(WorldLockHandle) + Send + 'static,
    ) {
        let entry = LockEntry::new(request);
        *entry.callback.lock() = Some(Box::new(callback));

        if self.try_insert(&entry) {
            self.dispatch_grant(entry);
        }
    }

    /// Inserts into held (returning true) or pending (returning false).
    fn try_insert(&self, entry: &Arc<LockEntry>) -> bool {
        let mut queues = self.inner.queues.lock();

        if self.contends(&queues, entry, None) {
            queues.pending.push(entry.clone());
            false
        } else {
            *entry.granted.lock() = true;
            queues.held.push(entry.clone());
            true
        }
    }

    /// Does `entry` contend with anything held or queued? `up_to` limits
    /// the pending scan for fairness checks during re-grant.
    fn contends(&self, queues: &LockQueues, entry: &Arc<LockEntry>, up_to: Option<usize>) -> bool {
        let request = entry.request.lock();

        let held = queues
            .held
            .iter()
            .any(|h| h.request.lock().contends_with(&request));

        if held {
            return true;
        }

        let limit = up_to.unwrap_or(queues.pending.len());
        queues.pending[..limit]
            .iter()
            .any(|p| !Arc::ptr_eq(p, entry) && p.request.lock().contends_with(&request))
    }

    fn release_entry(&self, entry: &Arc<LockEntry>) {
        let mut queues = self.inner.queues.lock();

        if let Some(pos) = queues.held.iter().position(|h| Arc::ptr_eq(h, entry)) {
            queues.held.remove(pos);
        } else if let Some(pos) = queues.pending.iter().position(|p| Arc::ptr_eq(p, entry)) {
            // A cancelled wait; nothing was held, but its slot in the
            // queue may have been blocking someone behind it.
            queues.pending.remove(pos);
        } else {
            return;
        }

        self.grant_pending(&mut queues);
    }

    /// Rescans the pending queue in order, granting every request whose
    /// contention graph permits.
    fn grant_pending(&self, queues: &mut LockQueues) {
        let mut granted = Vec::new();

        let mut i = 0;
        while i < queues.pending.len() {
            let candidate = queues.pending[i].clone();

            if self.contends(queues, &candidate, Some(i)) {
                i += 1;
                continue;
            }

            queues.pending.remove(i);
            *candidate.granted.lock() = true;
            queues.held.push(candidate.clone());
            candidate.cond.notify_all();
            granted.push(candidate);
        }

        for entry in granted {
            self.dispatch_grant(entry);
        }
    }

    /// Merges `extra` into a held lock. If the merged request contends
    /// with another held lock, the holder moves to the **front** of the
    /// pending queue and blocks until everything contending drains.
    pub(crate) fn upgrade_entry(&self, entry: &Arc<LockEntry>, extra: WorldLockRequest) {
        let must_wait = {
            let mut queues = self.inner.queues.lock();

            let Some(idx) = queues.held.iter().position(|h| Arc::ptr_eq(h, entry)) else {
                return;
            };

            entry.request.lock().merge(extra);

            let request = entry.request.lock();
            let contends = queues
                .held
                .iter()
                .enumerate()
                .any(|(i, h)| i != idx && h.request.lock().contends_with(&request));
            drop(request);

            if contends {
                *entry.granted.lock() = false;
                queues.held.remove(idx);
                queues.pending.insert(0, entry.clone());
                true
            } else {
                false
            }
        };

        if must_wait {
            let mut granted = entry.granted.lock();
            while !*granted {
                entry.cond.wait(&mut granted);
            }
        }
    }

    fn dispatch_grant(&self, entry: Arc<LockEntry>) {
        let callback = entry.callback.lock().take();
        if let Some(callback) = callback {
            let handle = self.handle(entry);
            self.inner.pool.enqueue(move || callback(handle));
        }
    }

    fn handle(&self, entry: Arc<LockEntry>) -> WorldLockHandle {
        WorldLockHandle {
            lock: self.clone(),
            entry,
            released: false,
        }
    }

    #[cfg(test)]
    fn held_count(&self) -> usize {
        self.inner.queues.lock().held.len()
    }
}

/// A held (or, mid-upgrade, re-queued) world lock. Released explicitly or
/// on drop.
pub struct WorldLockHandle {
    lock: WorldLock,
    entry: Arc<LockEntry>,
    released: bool,
}

impl WorldLockHandle {
    /// Grows the held request by `extra`, blocking until the merged
    /// request is compatible with all other held locks.
    pub fn upgrade(&self, extra: WorldLockRequest) {
        self.lock.clone().upgrade_entry(&self.entry, extra);
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.clone().release_entry(&self.entry);
        }
    }
}

impl Drop for WorldLockHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use andesite_network::PoolConfig;

    use super::*;

    fn lock() -> WorldLock {
        WorldLock::new(TaskPool::new(PoolConfig {
            workers: 2,
            ..Default::default()
        }))
    }

    fn block(x: i32) -> BlockId {
        BlockId::new(x, 64, 0, 0)
    }

    #[test]
    fn disjoint_requests_are_granted_together() {
        let lock = lock();

        let a = lock.acquire(WorldLockRequest::new().write_block(block(0)));
        let b = lock.acquire(WorldLockRequest::new().write_block(block(1)));

        assert_eq!(lock.held_count(), 2);

        a.release();
        b.release();
    }

    #[test]
    fn readers_share_writers_exclude() {
        let lock = lock();

        let r1 = lock.acquire(WorldLockRequest::new().read_block(block(0)));
        let r2 = lock.acquire(WorldLockRequest::new().read_block(block(0)));
        assert_eq!(lock.held_count(), 2);

        assert!(matches!(
            lock.try_acquire(WorldLockRequest::new().write_block(block(0))),
            Err(WorldError::Contention)
        ));

        r1.release();
        r2.release();

        let w = lock
            .try_acquire(WorldLockRequest::new().write_block(block(0)))
            .unwrap();
        w.release();
    }

    #[test]
    fn write_blocks_until_release() {
        let lock = lock();

        let held = lock.acquire(WorldLockRequest::new().write_block(block(5)));

        let lock2 = lock.clone();
        let acquired = Arc::new(AtomicUsize::new(0));
        let acquired2 = acquired.clone();

        let waiter = std::thread::spawn(move || {
            let handle = lock2.acquire(WorldLockRequest::new().read_block(block(5)));
            acquired2.store(1, Ordering::SeqCst);
            handle.release();
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);

        held.release();
        waiter.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fifo_fairness_blocks_later_compatible_requests() {
        let lock = lock();

        // Held read on block 0; a queued writer on block 0; then a reader
        // on block 0 that is compatible with the held read but must not
        // jump the queued writer.
        let held = lock.acquire(WorldLockRequest::new().read_block(block(0)));

        let lock2 = lock.clone();
        let writer = std::thread::spawn(move || {
            let handle = lock2.acquire(WorldLockRequest::new().write_block(block(0)));
            handle.release();
        });

        std::thread::sleep(Duration::from_millis(50));

        // A late reader is compatible with the held read, but not with the
        // queued writer ahead of it.
        assert!(matches!(
            lock.try_acquire(WorldLockRequest::new().read_block(block(0))),
            Err(WorldError::Contention)
        ));

        // The blocking path must queue behind the writer too.
        let order = Arc::new(Mutex::new(Vec::new()));

        let lock3 = lock.clone();
        let order2 = order.clone();
        let reader = std::thread::spawn(move || {
            let handle = lock3.acquire(WorldLockRequest::new().read_block(block(0)));
            order2.lock().push("reader");
            handle.release();
        });

        std::thread::sleep(Duration::from_millis(50));
        order.lock().push("release");
        held.release();

        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(order.lock()[0], "release");
    }

    #[test]
    fn upgrade_jumps_to_the_front_of_pending() {
        let lock = lock();

        // T1 holds a read over column (0,0,0).
        let t1 = lock.acquire(WorldLockRequest::new().read_column(ColumnId::new(0, 0, 0)));

        // T2 queues a write over the same column and blocks.
        let lock2 = lock.clone();
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();

        let t2 = std::thread::spawn(move || {
            let handle = lock2.acquire(WorldLockRequest::new().write_column(ColumnId::new(0, 0, 0)));
            order2.lock().push("t2");
            handle.release();
        });

        std::thread::sleep(Duration::from_millis(50));

        // T1 upgrades to a write. The upgrade contends with nothing held
        // (T1 itself is the only holder), so it is granted immediately,
        // ahead of the queued T2.
        t1.upgrade(WorldLockRequest::new().write_column(ColumnId::new(0, 0, 0)));
        order.lock().push("t1-upgraded");

        std::thread::sleep(Duration::from_millis(50));
        t1.release();

        t2.join().unwrap();

        let order = order.lock();
        assert_eq!(*order, ["t1-upgraded", "t2"]);
    }

    #[test]
    fn async_grant_fires_on_release() {
        let lock = lock();

        let held = lock.acquire(WorldLockRequest::exclusive());

        let granted = Arc::new(AtomicUsize::new(0));
        let granted2 = granted.clone();

        lock.acquire_async(WorldLockRequest::new().read_block(block(9)), move |handle| {
            granted2.store(1, Ordering::SeqCst);
            handle.release();
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(granted.load(Ordering::SeqCst), 0);

        held.release();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(granted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exclusive_contends_with_everything() {
        let lock = lock();

        let held = lock.acquire(WorldLockRequest::new().read_block(block(3)));

        assert!(matches!(
            lock.try_acquire(WorldLockRequest::exclusive()),
            Err(WorldError::Contention)
        ));

        held.release();

        let all = lock.try_acquire(WorldLockRequest::exclusive()).unwrap();
        assert!(matches!(
            lock.try_acquire(WorldLockRequest::new().read_block(block(100))),
            Err(WorldError::Contention)
        ));
        all.release();
    }
}
