//! Persistence boundary: the `DataStore` trait every backend implements, plus the
//! in-memory store used when no durable backend can be opened.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use contracts::{BlockPosition, BlockRecord, ChestId, ChestRecord, StoreType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{store} backend error: {source}")]
    Backend {
        store: StoreType,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt {store} record: {message}")]
    Corrupt { store: StoreType, message: String },

    #[error("{0} datastore is not initialized")]
    NotInitialized(StoreType),
}

impl StoreError {
    pub fn backend(
        store: StoreType,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            store,
            source: source.into(),
        }
    }

    pub fn corrupt(store: StoreType, message: impl Into<String>) -> Self {
        Self::Corrupt {
            store,
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable shadow of the chest registry.
///
/// Writes are synchronous: a call returns only once the record is committed to
/// the backend's medium, so callers can treat a transition as complete.
pub trait DataStore: fmt::Debug {
    fn store_type(&self) -> StoreType;

    fn name(&self) -> &'static str {
        self.store_type().display_name()
    }

    /// Open or create the backing medium. Calling it on an initialized store is a no-op.
    fn initialize(&mut self) -> StoreResult<()>;

    fn is_initialized(&self) -> bool;

    /// Whether the backend's artifact is present on disk.
    fn exists(&self) -> bool;

    fn put_chest_record(&mut self, record: &ChestRecord) -> StoreResult<()>;

    fn put_block_record(&mut self, record: &BlockRecord) -> StoreResult<()>;

    /// Write a batch of chests and then their blocks, all or nothing.
    ///
    /// Backends without native transactions get this record-by-record default,
    /// which deletes the chests it added when a later write fails.
    fn put_records(&mut self, chests: &[ChestRecord], blocks: &[BlockRecord]) -> StoreResult<()> {
        let existing: BTreeSet<ChestId> = self
            .get_all_chest_records()?
            .into_iter()
            .map(|record| record.chest_id)
            .collect();

        let mut added = Vec::new();
        let result = write_each(self, chests, blocks, &existing, &mut added);
        if let Err(err) = &result {
            log::warn!(
                "[DataStore] batch write to {} failed, removing {} new chests: {err}",
                self.name(),
                added.len()
            );
            for chest_id in added {
                if let Err(err) = self.delete_chest_record(chest_id) {
                    log::error!("[DataStore] could not roll back chest {chest_id}: {err}");
                }
            }
        }
        result
    }

    /// Remove a chest record together with all of its block records.
    fn delete_chest_record(&mut self, chest_id: ChestId) -> StoreResult<()>;

    fn delete_block_record(&mut self, position: &BlockPosition) -> StoreResult<()>;

    fn get_all_chest_records(&self) -> StoreResult<Vec<ChestRecord>>;

    fn get_all_block_records(&self) -> StoreResult<Vec<BlockRecord>>;

    /// Flush pending writes to the durable medium.
    fn sync(&mut self) -> StoreResult<()>;

    fn close(&mut self) -> StoreResult<()>;

    /// Remove the backend's artifact. The store must be closed first.
    fn delete(&mut self) -> StoreResult<()>;
}

fn write_each<S: DataStore + ?Sized>(
    store: &mut S,
    chests: &[ChestRecord],
    blocks: &[BlockRecord],
    existing: &BTreeSet<ChestId>,
    added: &mut Vec<ChestId>,
) -> StoreResult<()> {
    for chest in chests {
        store.put_chest_record(chest)?;
        if !existing.contains(&chest.chest_id) {
            added.push(chest.chest_id);
        }
    }
    for block in blocks {
        store.put_block_record(block)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryDataStore
// ---------------------------------------------------------------------------

/// Non-durable store. Holds records for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    chests: BTreeMap<ChestId, ChestRecord>,
    blocks: BTreeMap<BlockPosition, BlockRecord>,
    initialized: bool,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that is already initialized and seeded with records.
    pub fn with_records(chests: Vec<ChestRecord>, blocks: Vec<BlockRecord>) -> Self {
        Self {
            chests: chests
                .into_iter()
                .map(|record| (record.chest_id, record))
                .collect(),
            blocks: blocks
                .into_iter()
                .map(|record| (record.position, record))
                .collect(),
            initialized: true,
        }
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(StoreError::NotInitialized(StoreType::Memory))
        }
    }
}

impl DataStore for MemoryDataStore {
    fn store_type(&self) -> StoreType {
        StoreType::Memory
    }

    fn initialize(&mut self) -> StoreResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn exists(&self) -> bool {
        false
    }

    fn put_chest_record(&mut self, record: &ChestRecord) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.chests.insert(record.chest_id, record.clone());
        Ok(())
    }

    fn put_block_record(&mut self, record: &BlockRecord) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.blocks.insert(record.position, *record);
        Ok(())
    }

    fn put_records(&mut self, chests: &[ChestRecord], blocks: &[BlockRecord]) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.chests
            .extend(chests.iter().map(|record| (record.chest_id, record.clone())));
        self.blocks
            .extend(blocks.iter().map(|record| (record.position, *record)));
        Ok(())
    }

    fn delete_chest_record(&mut self, chest_id: ChestId) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.chests.remove(&chest_id);
        self.blocks.retain(|_, block| block.chest_id != chest_id);
        Ok(())
    }

    fn delete_block_record(&mut self, position: &BlockPosition) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.blocks.remove(position);
        Ok(())
    }

    fn get_all_chest_records(&self) -> StoreResult<Vec<ChestRecord>> {
        self.ensure_initialized()?;
        Ok(self.chests.values().cloned().collect())
    }

    fn get_all_block_records(&self) -> StoreResult<Vec<BlockRecord>> {
        self.ensure_initialized()?;
        Ok(self.blocks.values().copied().collect())
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        self.initialized = false;
        Ok(())
    }

    fn delete(&mut self) -> StoreResult<()> {
        self.chests.clear();
        self.blocks.clear();
        Ok(())
    }
}
