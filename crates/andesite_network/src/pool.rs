//! The worker pool that runs all user-level work: packet handlers, world
//! advancement, and timed callbacks.
//!
//! Reactor workers never run user code; they hand it to this pool. Tasks
//! return their result through a promise-like [`TaskHandle`], and delayed
//! tasks go through a dedicated scheduler thread that keeps them ordered by
//! absolute deadline.

use std::any::Any;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;
use tracing::error;

/// Why a task's promise was not fulfilled with a value.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum PoolError {
    /// The pool shut down before the task could run, or while it was
    /// scheduled for a future deadline.
    #[error("task pool shut down before the task could run")]
    Shutdown,
    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Invoked when the pool itself fails, as opposed to a user task failing.
pub type PanicHook = Arc<dyn Fn(&str) + Send + Sync>;
/// Per-worker init/cleanup hook.
pub type WorkerHook = Arc<dyn Fn() + Send + Sync>;

pub struct PoolConfig {
    pub workers: usize,
    pub panic_hook: Option<PanicHook>,
    pub worker_init: Option<WorkerHook>,
    pub worker_cleanup: Option<WorkerHook>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, Into::into),
            panic_hook: None,
            worker_init: None,
            worker_cleanup: None,
        }
    }
}

/// A pool of worker threads plus a deadline scheduler.
///
/// Cloning is cheap and all clones refer to the same pool.
#[derive(Clone)]
pub struct TaskPool {
    shared: Arc<Shared>,
}

struct Shared {
    jobs_tx: Mutex<Option<flume::Sender<Job>>>,
    jobs_rx: flume::Receiver<Job>,
    sched: Mutex<SchedQueue>,
    sched_cv: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
    panic_hook: Option<PanicHook>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

struct SchedQueue {
    heap: BinaryHeap<Scheduled>,
    stop: bool,
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the BinaryHeap yields the earliest deadline first,
        // with insertion order breaking ties.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl TaskPool {
    pub fn new(config: PoolConfig) -> Self {
        let (jobs_tx, jobs_rx) = flume::unbounded();

        let shared = Arc::new(Shared {
            jobs_tx: Mutex::new(Some(jobs_tx)),
            jobs_rx,
            sched: Mutex::new(SchedQueue {
                heap: BinaryHeap::new(),
                stop: false,
            }),
            sched_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            panic_hook: config.panic_hook,
            threads: Mutex::new(Vec::new()),
        });

        let mut threads = Vec::with_capacity(config.workers + 1);

        for n in 0..config.workers.max(1) {
            let shared2 = shared.clone();
            let init = config.worker_init.clone();
            let cleanup = config.worker_cleanup.clone();

            threads.push(
                std::thread::Builder::new()
                    .name(format!("andesite-worker-{n}"))
                    .spawn(move || worker(&shared2, init, cleanup))
                    .expect("failed to spawn pool worker"),
            );
        }

        let shared2 = shared.clone();
        threads.push(
            std::thread::Builder::new()
                .name("andesite-scheduler".into())
                .spawn(move || scheduler(&shared2))
                .expect("failed to spawn pool scheduler"),
        );

        *shared.threads.lock() = threads;

        Self { shared }
    }

    /// Runs `task` on the next free worker. The returned handle resolves
    /// with the task's result, or with [`PoolError::TaskPanicked`] if the
    /// task panicked, or with [`PoolError::Shutdown`] if the pool went away
    /// first.
    pub fn enqueue<T, F>(&self, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (job, handle) = wrap(task);
        self.submit(job);
        handle
    }

    /// Runs `task` after at least `delay` has elapsed.
    pub fn enqueue_after<T, F>(&self, delay: Duration, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (job, handle) = wrap(task);
        let deadline = Instant::now() + delay;

        let mut sched = self.shared.sched.lock();

        if sched.stop {
            // Dropping the job fails the handle with Shutdown.
            return handle;
        }

        // The scheduler only needs waking when this deadline becomes the
        // soonest; anything else will be seen on its regular wakeup.
        let preempts = sched
            .heap
            .peek()
            .map_or(true, |head| deadline < head.deadline);

        sched.heap.push(Scheduled {
            deadline,
            seq: self.shared.seq.fetch_add(1, Ordering::Relaxed),
            job,
        });

        if preempts {
            self.shared.sched_cv.notify_one();
        }

        handle
    }

    /// The number of tasks waiting for a worker (not counting scheduled
    /// tasks whose deadline has not arrived).
    pub fn queued(&self) -> usize {
        self.shared.jobs_rx.len()
    }

    /// Stops accepting work, fails every queued and scheduled task's handle
    /// with [`PoolError::Shutdown`], and joins all threads.
    ///
    /// Must not be called from a pool thread.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut sched = self.shared.sched.lock();
            sched.stop = true;
            self.shared.sched_cv.notify_one();
        }

        // Disconnect the channel so workers exit once it drains.
        *self.shared.jobs_tx.lock() = None;

        let threads = std::mem::take(&mut *self.shared.threads.lock());
        for thread in threads {
            if thread.join().is_err() {
                self.panic("pool thread terminated abnormally");
            }
        }
    }

    fn submit(&self, job: Job) {
        let guard = self.shared.jobs_tx.lock();
        match guard.as_ref() {
            Some(tx) if !self.shared.shutdown.load(Ordering::SeqCst) => {
                let _ = tx.send(job);
            }
            // Dropping the job fails its handle with Shutdown.
            _ => {}
        }
    }

    fn panic(&self, message: &str) {
        error!("task pool failure: {message}");
        if let Some(hook) = &self.shared.panic_hook {
            hook(message);
        }
    }
}

/// A promise for the result of a pool task. Resolved exactly once.
pub struct TaskHandle<T> {
    rx: flume::Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task completes or the pool shuts down.
    pub fn wait(self) -> Result<T, PoolError> {
        self.rx.recv().map_err(|_| PoolError::Shutdown)?
    }

    /// Awaits the task without blocking the calling thread. For code
    /// running inside an async context, such as the reactor.
    pub async fn wait_async(self) -> Result<T, PoolError> {
        self.rx.recv_async().await.map_err(|_| PoolError::Shutdown)?
    }

    /// Blocks for at most `timeout`. `None` means the task has not
    /// completed yet.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, PoolError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(flume::RecvTimeoutError::Timeout) => None,
            Err(flume::RecvTimeoutError::Disconnected) => Some(Err(PoolError::Shutdown)),
        }
    }

    /// Returns the result if the task has already completed.
    pub fn try_get(&self) -> Option<Result<T, PoolError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => Some(Err(PoolError::Shutdown)),
        }
    }
}

fn wrap<T, F>(task: F) -> (Job, TaskHandle<T>)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = flume::bounded(1);

    let job: Job = Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(task))
            .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())));
        let _ = tx.send(result);
    });

    (job, TaskHandle { rx })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).into()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".into()
    }
}

fn worker(shared: &Arc<Shared>, init: Option<WorkerHook>, cleanup: Option<WorkerHook>) {
    if let Some(init) = init {
        if panic::catch_unwind(AssertUnwindSafe(|| init())).is_err() {
            report(shared, "worker init hook panicked");
        }
    }

    while let Ok(job) = shared.jobs_rx.recv() {
        if shared.shutdown.load(Ordering::SeqCst) {
            // Dropping the job fails its handle with Shutdown.
            continue;
        }

        job();
    }

    if let Some(cleanup) = cleanup {
        if panic::catch_unwind(AssertUnwindSafe(|| cleanup())).is_err() {
            report(shared, "worker cleanup hook panicked");
        }
    }
}

fn scheduler(shared: &Arc<Shared>) {
    let mut sched = shared.sched.lock();

    loop {
        if sched.stop {
            // Dropping the heap fails every scheduled handle with Shutdown.
            sched.heap.clear();
            return;
        }

        let now = Instant::now();

        match sched.heap.peek() {
            None => {
                shared.sched_cv.wait(&mut sched);
            }
            Some(head) if head.deadline <= now => {
                if let Some(due) = sched.heap.pop() {
                    MutexGuard::unlocked(&mut sched, || {
                        submit_from_scheduler(shared, due.job);
                    });
                }
            }
            Some(head) => {
                let deadline = head.deadline;
                let _ = shared.sched_cv.wait_until(&mut sched, deadline);
            }
        }
    }
}

fn submit_from_scheduler(shared: &Arc<Shared>, job: Job) {
    let guard = shared.jobs_tx.lock();
    if let Some(tx) = guard.as_ref() {
        if !shared.shutdown.load(Ordering::SeqCst) {
            let _ = tx.send(job);
        }
    }
}

fn report(shared: &Arc<Shared>, message: &str) {
    error!("task pool failure: {message}");
    if let Some(hook) = &shared.panic_hook {
        hook(message);
    }
}
