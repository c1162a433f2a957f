use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Hands out process-unique u64 ids, starting from 1.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A uniformly random i32 that is never zero. Zero is reserved as the
/// client-initiated keep-alive id.
pub fn random_nonzero_i32() -> i32 {
    let n: i32 = rand::thread_rng().gen();
    if n == 0 {
        1
    } else {
        n
    }
}
