//! Typed event fan-out.
//!
//! Subscribers are invoked in subscription order. Each event carries a
//! `swallow_panics` flag: when set, a panicking subscriber is logged and the
//! fan-out continues; otherwise the panic propagates and aborts the
//! fan-out.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

fn run_guarded<R>(swallow: bool, f: impl FnOnce() -> R) -> Option<R> {
    if swallow {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(r) => Some(r),
            Err(_) => {
                warn!("event subscriber panicked; continuing fan-out");
                None
            }
        }
    } else {
        Some(f())
    }
}

/// An event whose subscribers return nothing.
pub struct Event<A> {
    subscribers: RwLock<Vec<Arc<dyn Fn(&A) + Send + Sync>>>,
    swallow_panics: bool,
}

impl<A> Event<A> {
    pub fn new() -> Self {
        Self::with_swallow_panics(false)
    }

    pub fn with_swallow_panics(swallow_panics: bool) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            swallow_panics,
        }
    }

    pub fn subscribe(&self, f: impl Fn(&A) + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(f));
    }

    pub fn fire(&self, arg: &A) {
        let subscribers = self.subscribers.read().clone();
        for sub in &subscribers {
            run_guarded(self.swallow_panics, || sub(arg));
        }
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// An event whose subscribers vote. The fan-out AND-folds the results,
/// short-circuiting on the first `false`.
pub struct VetoEvent<A> {
    subscribers: RwLock<Vec<Arc<dyn Fn(&A) -> bool + Send + Sync>>>,
    swallow_panics: bool,
}

impl<A> VetoEvent<A> {
    pub fn new() -> Self {
        Self::with_swallow_panics(false)
    }

    pub fn with_swallow_panics(swallow_panics: bool) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            swallow_panics,
        }
    }

    pub fn subscribe(&self, f: impl Fn(&A) -> bool + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(f));
    }

    /// Returns `true` iff no subscriber returned `false`. A swallowed panic
    /// does not count as a veto.
    pub fn fire(&self, arg: &A) -> bool {
        let subscribers = self.subscribers.read().clone();
        for sub in &subscribers {
            if let Some(false) = run_guarded(self.swallow_panics, || sub(arg)) {
                return false;
            }
        }

        true
    }
}

impl<A> Default for VetoEvent<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// An event whose subscribers each produce a result; the fan-out collects
/// them in subscription order.
pub struct CollectEvent<A, R> {
    subscribers: RwLock<Vec<Arc<dyn Fn(&A) -> R + Send + Sync>>>,
    swallow_panics: bool,
}

impl<A, R> CollectEvent<A, R> {
    pub fn new() -> Self {
        Self::with_swallow_panics(false)
    }

    pub fn with_swallow_panics(swallow_panics: bool) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            swallow_panics,
        }
    }

    pub fn subscribe(&self, f: impl Fn(&A) -> R + Send + Sync + 'static) {
        self.subscribers.write().push(Arc::new(f));
    }

    /// Results of swallowed panics are omitted from the output.
    pub fn fire(&self, arg: &A) -> Vec<R> {
        let subscribers = self.subscribers.read().clone();
        subscribers
            .iter()
            .filter_map(|sub| run_guarded(self.swallow_panics, || sub(arg)))
            .collect()
    }
}

impl<A, R> Default for CollectEvent<A, R> {
    fn default() -> Self {
        Self::new()
    }
}
