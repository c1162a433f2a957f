use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// The states an asynchronous send moves through.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SendState {
    /// The data is pending in the send queue.
    Pending,
    /// The data is being written to the socket.
    Sending,
    /// The data has been sent completely.
    Sent,
    /// The data has not been sent and never will be.
    Failed,
}

impl SendState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SendState::Sent | SendState::Failed)
    }
}

/// A promise representing one queued send on a connection.
///
/// Resolved to [`Sent`](SendState::Sent) or [`Failed`](SendState::Failed)
/// exactly once, in the order the sends were enqueued.
#[derive(Clone)]
pub struct SendHandle {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<HandleState>,
    cond: Condvar,
    sent: AtomicUsize,
}

struct HandleState {
    state: SendState,
    callbacks: Vec<Box<dyn FnOnce(SendState) + Send>>,
}

impl SendHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(HandleState {
                    state: SendState::Pending,
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
                sent: AtomicUsize::new(0),
            }),
        }
    }

    pub fn state(&self) -> SendState {
        self.inner.state.lock().state
    }

    /// The number of payload bytes written to the socket so far.
    pub fn sent(&self) -> usize {
        self.inner.sent.load(Ordering::Acquire)
    }

    /// Blocks until the send reaches a terminal state and returns it.
    pub fn wait(&self) -> SendState {
        let mut guard = self.inner.state.lock();
        while !guard.state.is_terminal() {
            self.inner.cond.wait(&mut guard);
        }
        guard.state
    }

    /// Registers a callback fired on resolution. Fires immediately if the
    /// send has already resolved.
    pub fn on_complete(&self, callback: impl FnOnce(SendState) + Send + 'static) {
        let mut guard = self.inner.state.lock();
        if guard.state.is_terminal() {
            let state = guard.state;
            drop(guard);
            callback(state);
        } else {
            guard.callbacks.push(Box::new(callback));
        }
    }

    pub(crate) fn add_sent(&self, bytes: usize) {
        self.inner.sent.fetch_add(bytes, Ordering::Release);
    }

    /// Marks the payload as in flight. Not a terminal state.
    pub(crate) fn mark_sending(&self) {
        let mut guard = self.inner.state.lock();
        if guard.state == SendState::Pending {
            guard.state = SendState::Sending;
        }
    }

    /// Resolves the handle. Later resolutions are ignored.
    pub(crate) fn resolve(&self, state: SendState) {
        debug_assert!(state.is_terminal());

        let callbacks = {
            let mut guard = self.inner.state.lock();
            if guard.state.is_terminal() {
                return;
            }
            guard.state = state;
            self.inner.cond.notify_all();
            std::mem::take(&mut guard.callbacks)
        };

        for callback in callbacks {
            callback(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exactly_once() {
        let handle = SendHandle::new();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        handle.on_complete(move |state| {
            assert_eq!(state, SendState::Sent);
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        handle.mark_sending();
        handle.resolve(SendState::Sent);
        handle.resolve(SendState::Failed);

        assert_eq!(handle.state(), SendState::Sent);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(handle.wait(), SendState::Sent);
    }

    #[test]
    fn late_callback_fires_immediately() {
        let handle = SendHandle::new();
        handle.resolve(SendState::Failed);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        handle.on_complete(move |state| {
            assert_eq!(state, SendState::Failed);
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_blocks_until_resolution() {
        let handle = SendHandle::new();

        let handle2 = handle.clone();
        let waiter = std::thread::spawn(move || handle2.wait());

        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.add_sent(128);
        handle.resolve(SendState::Sent);

        assert_eq!(waiter.join().unwrap(), SendState::Sent);
        assert_eq!(handle.sent(), 128);
    }
}
