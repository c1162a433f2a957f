use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

type Callback = Box<dyn Fn() + Send + Sync>;
type FinalCallback = Box<dyn FnOnce() + Send>;

/// A reference-counted scope guard.
///
/// Every clone fires the per-scope callback when it is dropped; the final
/// callback fires exactly once, when the last clone is dropped. Used to
/// observe the completion of a batch of tasks fanned out across the thread
/// pool.
pub struct MultiScopeGuard {
    inner: Arc<Inner>,
}

struct Inner {
    each: Option<Callback>,
    all: Mutex<Option<FinalCallback>>,
}

impl MultiScopeGuard {
    pub fn new(all: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                each: None,
                all: Mutex::new(Some(Box::new(all))),
            }),
        }
    }

    pub fn with_each(
        each: impl Fn() + Send + Sync + 'static,
        all: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                each: Some(Box::new(each)),
                all: Mutex::new(Some(Box::new(all))),
            }),
        }
    }
}

impl Clone for MultiScopeGuard {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for MultiScopeGuard {
    fn drop(&mut self) {
        if let Some(each) = &self.inner.each {
            if panic::catch_unwind(AssertUnwindSafe(|| each())).is_err() {
                error!("multi-scope guard per-scope callback panicked");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(all) = self.all.get_mut().take() {
            if panic::catch_unwind(AssertUnwindSafe(all)).is_err() {
                error!("multi-scope guard final callback panicked");
            }
        }
    }
}
