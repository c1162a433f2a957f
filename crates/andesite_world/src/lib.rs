#![doc = include_str!("../README.md")]

pub mod block;
pub mod column;
pub mod handle;
pub mod lock;
mod persist;
pub mod store;

use thiserror::Error;

pub use block::{Block, BlockId, BlockRange, ColumnId, BLOCKS_PER_COLUMN, COLUMN_HEIGHT, COLUMN_WIDTH};
pub use column::{ColumnContainer, ColumnGrid, ColumnState};
pub use handle::{AccessStrategy, BlockSetEvent, WorldHandle, WriteStrategy};
pub use lock::{LockArea, WorldLock, WorldLockHandle, WorldLockRequest};
pub use store::{Generator, Populator, World, WorldStats};

#[derive(Debug, Error)]
pub enum WorldError {
    /// The column is absent from the store, or not at the state the access
    /// strategy requires.
    #[error("column {0} is not available from the store")]
    NotFound(ColumnId),
    /// A non-blocking lock acquisition found the range contended.
    #[error("world lock contended")]
    Contention,
    #[error("no generator registered for dimension {0} of world type {1:?}")]
    NoGenerator(i8, String),
    /// A state-advancing step failed; the column may be retried.
    #[error("column {0} failed to advance")]
    ColumnFailed(ColumnId),
}
