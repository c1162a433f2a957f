//! Scoped world access. A handle pairs an access strategy (how far to
//! advance columns on demand) with a write strategy (how the world lock is
//! taken around mutations), caches the column it last touched, and holds
//! interest on that column for its lifetime.

use std::sync::Arc;

use crate::block::{Block, BlockId, ColumnId};
use crate::column::{ColumnContainer, ColumnState};
use crate::lock::{WorldLockHandle, WorldLockRequest};
use crate::store::World;
use crate::WorldError;

/// How far a handle advances columns it touches.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AccessStrategy {
    /// Load from the backing store only; fail reads unless the stored
    /// column was populated.
    Load,
    /// Load from the backing store only; fail unless at least generated.
    LoadGenerated,
    /// Advance to generated on demand.
    Generate,
    /// Advance to populated on demand. The default for gameplay.
    Populate,
    /// Observer: succeed only when the column is already generated.
    Generated,
    /// Observer: succeed only when the column is already populated.
    Populated,
}

/// How mutations interact with the world lock.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WriteStrategy {
    /// Each set takes the world lock for just that block, briefly.
    PerBlock,
    /// The handle holds the exclusive world lock for its entire scope;
    /// all reads and writes under it observe one consistent view.
    Transactional,
}

/// A block mutation, as seen by the veto and notification events.
#[derive(Clone, Debug)]
pub struct BlockSetEvent {
    pub block: BlockId,
    pub old: Block,
    pub new: Block,
}

pub struct WorldHandle {
    world: Arc<World>,
    access: AccessStrategy,
    write: WriteStrategy,
    cache: Option<Arc<ColumnContainer>>,
    tx_lock: Option<WorldLockHandle>,
    /// Non-zero while populators run under this handle. Suppresses the
    /// wait-until-populated target for neighbor columns, which would
    /// otherwise deadlock population against itself.
    populate_depth: u32,
}

impl WorldHandle {
    pub(crate) fn new(world: Arc<World>, access: AccessStrategy, write: WriteStrategy) -> Self {
        let tx_lock = (write == WriteStrategy::Transactional)
            .then(|| world.lock().acquire(WorldLockRequest::exclusive()));

        Self {
            world,
            access,
            write,
            cache: None,
            tx_lock,
            populate_depth: 0,
        }
    }

    pub fn access(&self) -> AccessStrategy {
        self.access
    }

    pub fn write_strategy(&self) -> WriteStrategy {
        self.write
    }

    /// Whether this handle currently holds the exclusive world lock.
    pub fn exclusive(&self) -> bool {
        self.tx_lock.is_some()
    }

    pub(crate) fn begin_populate(&mut self) {
        self.populate_depth += 1;
    }

    pub(crate) fn end_populate(&mut self) {
        self.populate_depth -= 1;
    }

    /// Reads a block, advancing its column per the access strategy.
    pub fn get(&mut self, id: BlockId) -> Result<Block, WorldError> {
        let column = self.column(id.containing_column(), true)?;
        Ok(column.get_block(id))
    }

    /// Like [`get`](Self::get) but flattening every failure to `None`.
    pub fn try_get(&mut self, id: BlockId) -> Option<Block> {
        self.get(id).ok()
    }

    /// Writes a block.
    ///
    /// Unless `force` is set, the world's veto event is consulted first;
    /// a veto returns `Ok(false)` without mutating. On success the
    /// notification event fires and `Ok(true)` is returned.
    pub fn set(&mut self, id: BlockId, block: Block, force: bool) -> Result<bool, WorldError> {
        let column = self.column(id.containing_column(), false)?;

        // Outside a transaction, the world lock is taken for just this
        // block.
        let _guard = if self.tx_lock.is_none() {
            Some(
                self.world
                    .lock()
                    .acquire(WorldLockRequest::new().write_block(id)),
            )
        } else {
            None
        };

        let event = BlockSetEvent {
            block: id,
            old: column.get_block(id),
            new: block,
        };

        if !force && !self.world.can_set().fire(&event) {
            return Ok(false);
        }

        column.set_block(id, block);
        self.world.on_set().fire(&event);
        self.world.broadcast_block_change(&column, id, block);

        Ok(true)
    }

    /// Advances (or verifies) a column per the access strategy without
    /// touching a block.
    pub fn ensure(&mut self, id: ColumnId) -> Result<(), WorldError> {
        self.column(id, true).map(|_| ())
    }

    /// Resolves, and if the strategy says so advances, the column.
    fn column(
        &mut self,
        id: ColumnId,
        for_read: bool,
    ) -> Result<Arc<ColumnContainer>, WorldError> {
        // Observer strategies never create columns.
        let create = !matches!(
            self.access,
            AccessStrategy::Generated | AccessStrategy::Populated
        );

        let refresh = match &self.cache {
            Some(cached) => cached.id() != id,
            None => true,
        };

        if refresh {
            if let Some(old) = self.cache.take() {
                old.end_interest();
            }

            match self.world.get_column(id, create) {
                Some(column) => self.cache = Some(column),
                None => return Err(WorldError::NotFound(id)),
            }
        }

        let column = match &self.cache {
            Some(column) => column.clone(),
            None => return Err(WorldError::NotFound(id)),
        };

        match self.access {
            AccessStrategy::Generated => {
                return if column.state() >= ColumnState::Generated {
                    Ok(column)
                } else {
                    Err(WorldError::NotFound(id))
                };
            }
            AccessStrategy::Populated => {
                let need = if for_read {
                    ColumnState::Populated
                } else {
                    ColumnState::Generated
                };
                return if column.state() >= need {
                    Ok(column)
                } else {
                    Err(WorldError::NotFound(id))
                };
            }
            _ => {}
        }

        let mut target = match self.access {
            AccessStrategy::Load | AccessStrategy::LoadGenerated => ColumnState::Generating,
            AccessStrategy::Generate => ColumnState::Generated,
            _ => {
                if for_read {
                    ColumnState::Populated
                } else {
                    ColumnState::Generated
                }
            }
        };

        if self.populate_depth > 0 && target == ColumnState::Populated {
            target = ColumnState::Generated;
        }

        if !column.wait_until(target) {
            self.world.process(&column)?;
        }

        // The load strategies advance no further than the store contents;
        // verify the result is actually usable.
        match self.access {
            AccessStrategy::Load => {
                let need = if for_read {
                    ColumnState::Populated
                } else {
                    ColumnState::Generated
                };
                if column.state() < need {
                    return Err(WorldError::NotFound(id));
                }
            }
            AccessStrategy::LoadGenerated => {
                if column.state() < ColumnState::Generated {
                    return Err(WorldError::NotFound(id));
                }
            }
            _ => {}
        }

        Ok(column)
    }
}

impl Drop for WorldHandle {
    fn drop(&mut self) {
        // Interest is released exactly once per handle, even when the
        // owning task is unwinding. The transaction lock releases itself.
        if let Some(column) = self.cache.take() {
            column.end_interest();
        }
    }
}
