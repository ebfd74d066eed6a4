//! Backend selection, startup fallback, and migration between backends.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chest_core::store::{DataStore, MemoryDataStore, StoreError};
use chest_core::ChestError;
use contracts::{BlockRecord, ChestId, StoreType};

use crate::json_store::JsonDataStore;
use crate::sqlite::SqliteDataStore;

/// Outcome of moving one backend's records into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub source: StoreType,
    pub target: StoreType,
    pub chests: usize,
    pub blocks: usize,
    pub skipped_blocks: usize,
}

/// A backend ready for use, plus what happened while opening it.
#[derive(Debug)]
pub struct OpenedStore {
    pub store: Box<dyn DataStore>,
    pub requested: StoreType,
    /// Set when the requested backend could not be initialized.
    pub init_error: Option<ChestError>,
    pub migrations: Vec<MigrationReport>,
}

impl OpenedStore {
    pub fn is_fallback(&self) -> bool {
        self.init_error.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct StoreFactory {
    data_dir: PathBuf,
}

impl StoreFactory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// An uninitialized backend of the given type.
    pub fn create(&self, store_type: StoreType) -> Box<dyn DataStore> {
        match store_type {
            StoreType::Sqlite => Box::new(SqliteDataStore::new(&self.data_dir)),
            StoreType::Json => Box::new(JsonDataStore::new(&self.data_dir)),
            StoreType::Memory => Box::new(MemoryDataStore::new()),
        }
    }

    /// Initialize the requested backend and pull in records left behind by
    /// every other durable backend. Falls back to memory when initialization fails.
    pub fn open(&self, requested: StoreType) -> OpenedStore {
        let mut store = self.create(requested);

        if let Err(source) = store.initialize() {
            let err = ChestError::StoreInit {
                store: requested,
                source,
            };
            log::error!("[DataStore] {err}; chests will NOT survive a restart");
            let mut fallback = self.create(StoreType::Memory);
            if let Err(err) = fallback.initialize() {
                log::error!("[DataStore] memory datastore failed to start: {err}");
            }
            return OpenedStore {
                store: fallback,
                requested,
                init_error: Some(err),
                migrations: Vec::new(),
            };
        }

        log::info!("[DataStore] using {} datastore", store.name());
        let migrations = self.migrate_all_into(store.as_mut());
        OpenedStore {
            store,
            requested,
            init_error: None,
            migrations,
        }
    }

    /// Migrate from every other durable backend whose artifact exists.
    /// A failing source is logged and skipped.
    pub fn migrate_all_into(&self, target: &mut dyn DataStore) -> Vec<MigrationReport> {
        if !target.store_type().is_durable() {
            return Vec::new();
        }

        let mut reports = Vec::new();
        for source_type in StoreType::ALL {
            if source_type == target.store_type() || !source_type.is_durable() {
                continue;
            }
            let mut source = self.create(source_type);
            if !source.exists() {
                continue;
            }

            match migrate(source.as_mut(), target) {
                Ok(report) => reports.push(report),
                Err(err) => log::warn!(
                    "[Migration] {} -> {} failed, leaving the old datastore in place: {err}",
                    source_type,
                    target.store_type()
                ),
            }
        }
        reports
    }
}

/// Copy every record from `source` into `target`, then delete the source artifact.
///
/// Chests and blocks land in the target as one batch; blocks whose chest is
/// missing are skipped. On any failure the target keeps none of the batch and
/// the source artifact is left untouched.
pub fn migrate(
    source: &mut dyn DataStore,
    target: &mut dyn DataStore,
) -> Result<MigrationReport, StoreError> {
    let (source_type, target_type) = (source.store_type(), target.store_type());
    log::info!("[Migration] migrating {source_type} datastore to {target_type}");

    let result = copy_records(source, target);
    if let Err(err) = source.close() {
        log::warn!("[Migration] could not close {source_type} datastore: {err}");
    }
    let report = result?;

    source.delete()?;
    log::info!(
        "[Migration] moved {} chests and {} blocks from {source_type} to {target_type} ({} orphan blocks skipped)",
        report.chests,
        report.blocks,
        report.skipped_blocks
    );
    Ok(report)
}

fn copy_records(
    source: &mut dyn DataStore,
    target: &mut dyn DataStore,
) -> Result<MigrationReport, StoreError> {
    source.initialize()?;
    let chests = source.get_all_chest_records()?;
    let blocks = source.get_all_block_records()?;

    let known: BTreeSet<ChestId> = chests.iter().map(|chest| chest.chest_id).collect();
    let (kept, orphans): (Vec<BlockRecord>, Vec<BlockRecord>) = blocks
        .into_iter()
        .partition(|block| known.contains(&block.chest_id));
    for block in &orphans {
        log::warn!(
            "[Migration] skipping block at {} for unknown chest {}",
            block.position,
            block.chest_id
        );
    }

    target.put_records(&chests, &kept)?;
    target.sync()?;
    Ok(MigrationReport {
        source: source.store_type(),
        target: target.store_type(),
        chests: chests.len(),
        blocks: kept.len(),
        skipped_blocks: orphans.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chest_core::store::StoreResult;
    use contracts::{BlockPosition, ChestBlockRole, ChestRecord, PlayerId, WorldId};

    #[test]
    fn unusable_backend_falls_back_to_memory() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory where the database file should be makes SQLite fail to open.
        std::fs::create_dir(dir.path().join("deathchests.db")).expect("mkdir");

        let opened = StoreFactory::new(dir.path()).open(StoreType::Sqlite);

        assert!(opened.is_fallback());
        assert_eq!(opened.store.store_type(), StoreType::Memory);
        assert!(opened.store.is_initialized());
        assert!(matches!(
            opened.init_error,
            Some(ChestError::StoreInit {
                store: StoreType::Sqlite,
                ..
            })
        ));
    }

    #[test]
    fn memory_target_never_migrates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = StoreFactory::new(dir.path());
        let mut json = factory.create(StoreType::Json);
        json.initialize().expect("json");
        json.sync().expect("write json file");

        let opened = factory.open(StoreType::Memory);
        assert!(opened.migrations.is_empty());
        assert!(factory.create(StoreType::Json).exists());
    }

    /// Durable-looking target whose chest writes start failing after a quota.
    #[derive(Debug)]
    struct FailingTarget {
        inner: MemoryDataStore,
        chest_writes_left: usize,
    }

    impl DataStore for FailingTarget {
        fn store_type(&self) -> StoreType {
            StoreType::Sqlite
        }
        fn initialize(&mut self) -> StoreResult<()> {
            self.inner.initialize()
        }
        fn is_initialized(&self) -> bool {
            self.inner.is_initialized()
        }
        fn exists(&self) -> bool {
            true
        }
        fn put_chest_record(&mut self, record: &ChestRecord) -> StoreResult<()> {
            if self.chest_writes_left == 0 {
                return Err(StoreError::backend(StoreType::Sqlite, "disk full"));
            }
            self.chest_writes_left -= 1;
            self.inner.put_chest_record(record)
        }
        fn put_block_record(&mut self, record: &BlockRecord) -> StoreResult<()> {
            self.inner.put_block_record(record)
        }
        fn delete_chest_record(&mut self, chest_id: ChestId) -> StoreResult<()> {
            self.inner.delete_chest_record(chest_id)
        }
        fn delete_block_record(&mut self, position: &BlockPosition) -> StoreResult<()> {
            self.inner.delete_block_record(position)
        }
        fn get_all_chest_records(&self) -> StoreResult<Vec<ChestRecord>> {
            self.inner.get_all_chest_records()
        }
        fn get_all_block_records(&self) -> StoreResult<Vec<BlockRecord>> {
            self.inner.get_all_block_records()
        }
        fn sync(&mut self) -> StoreResult<()> {
            self.inner.sync()
        }
        fn close(&mut self) -> StoreResult<()> {
            self.inner.close()
        }
        fn delete(&mut self) -> StoreResult<()> {
            self.inner.delete()
        }
    }

    fn chest_record() -> ChestRecord {
        ChestRecord {
            chest_id: ChestId::random(),
            owner_id: Some(PlayerId::random()),
            killer_id: None,
            item_count: 1,
            placement_time: 1_000,
            expiration_time: 0,
        }
    }

    #[test]
    fn failed_migration_leaves_the_target_as_it_was() {
        let dir = tempfile::tempdir().expect("tempdir");
        let factory = StoreFactory::new(dir.path());
        let world_id = WorldId::random();
        let mut legacy = factory.create(StoreType::Json);
        legacy.initialize().expect("json");
        for x in 0..5 {
            let chest = chest_record();
            legacy.put_chest_record(&chest).expect("chest");
            legacy
                .put_block_record(&BlockRecord {
                    position: BlockPosition::new(world_id, x, 64, 0),
                    chest_id: chest.chest_id,
                    role: ChestBlockRole::RightChest,
                })
                .expect("block");
        }
        legacy.close().expect("close");

        let resident = chest_record();
        let mut target = FailingTarget {
            inner: MemoryDataStore::with_records(vec![resident.clone()], Vec::new()),
            chest_writes_left: 3,
        };

        let reports = factory.migrate_all_into(&mut target);

        assert!(reports.is_empty());
        assert_eq!(target.get_all_chest_records().expect("chests"), vec![resident]);
        assert!(target.get_all_block_records().expect("blocks").is_empty());
        assert!(factory.create(StoreType::Json).exists());
    }
}
